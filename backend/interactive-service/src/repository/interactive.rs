//! Cache-aside interactive repository
//!
//! Store first, cache best-effort:
//! - Writes commit to the store before any cache adjustment is attempted;
//!   a store failure aborts before the cache is touched.
//! - Cache failures are logged and swallowed, never returned.
//! - Reads trust a cache hit; a miss reads the store and repopulates the
//!   cache in the background without making the caller wait.
//!
//! The write-back is not ordered against concurrent writes. An increment that
//! lands while the write-back is pending finds no entry, skips the adjustment,
//! and is then hidden by the older snapshot. The entry stays stale until its
//! TTL (`INTERACTIVE_CACHE_TTL_SECS`, 900 s) expires.

use super::cache::InteractiveCache;
use super::store::InteractiveStore;
use crate::background::BackgroundTasks;
use crate::domain::models::{BizKey, CounterField, Interactive};
use crate::error::{CacheError, CacheResult, InteractiveResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait InteractiveRepository: Send + Sync {
    async fn incr_read_cnt(&self, biz_type: &str, biz_id: i64) -> InteractiveResult<()>;

    /// One store transaction for all keys
    async fn batch_incr_read_cnt(&self, keys: &[BizKey]) -> InteractiveResult<()>;

    async fn incr_like(&self, biz_type: &str, biz_id: i64, user_id: i64) -> InteractiveResult<()>;

    async fn decr_like(&self, biz_type: &str, biz_id: i64, user_id: i64) -> InteractiveResult<()>;

    async fn add_collection_item(
        &self,
        biz_type: &str,
        biz_id: i64,
        folder_id: i64,
        user_id: i64,
    ) -> InteractiveResult<()>;

    async fn get(&self, biz_type: &str, biz_id: i64) -> InteractiveResult<Interactive>;

    async fn liked(&self, biz_type: &str, biz_id: i64, user_id: i64) -> InteractiveResult<bool>;

    async fn collected(&self, biz_type: &str, biz_id: i64, user_id: i64)
        -> InteractiveResult<bool>;

    async fn get_by_ids(&self, biz_type: &str, biz_ids: &[i64])
        -> InteractiveResult<Vec<Interactive>>;
}

pub struct CachedInteractiveRepository {
    store: Arc<dyn InteractiveStore>,
    cache: Arc<dyn InteractiveCache>,
    background: BackgroundTasks,
    /// Upper bound for inline cache calls on the request path
    cache_timeout: Duration,
}

impl CachedInteractiveRepository {
    pub fn new(
        store: Arc<dyn InteractiveStore>,
        cache: Arc<dyn InteractiveCache>,
        background: BackgroundTasks,
    ) -> Self {
        let cache_timeout = background.timeout();
        Self {
            store,
            cache,
            background,
            cache_timeout,
        }
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    async fn cache_call<T>(&self, call: impl Future<Output = CacheResult<T>>) -> CacheResult<T> {
        tokio::time::timeout(self.cache_timeout, call)
            .await
            .unwrap_or(Err(CacheError::Timeout))
    }

    /// Adjust the cached `field` after a committed store write, logging any failure.
    async fn adjust_cache(&self, biz_type: &str, biz_id: i64, field: CounterField, incr: bool) {
        let result = if incr {
            self.cache_call(self.cache.incr_if_present(biz_type, biz_id, field))
                .await
        } else {
            self.cache_call(self.cache.decr_if_present(biz_type, biz_id, field))
                .await
        };

        if let Err(e) = result {
            warn!(
                biz_type = %biz_type,
                biz_id,
                field = field.cache_field(),
                error = %e,
                "Failed to adjust interactive cache"
            );
        }
    }
}

#[async_trait]
impl InteractiveRepository for CachedInteractiveRepository {
    async fn incr_read_cnt(&self, biz_type: &str, biz_id: i64) -> InteractiveResult<()> {
        self.store.incr_read_cnt(biz_type, biz_id).await?;
        self.adjust_cache(biz_type, biz_id, CounterField::Read, true)
            .await;
        Ok(())
    }

    async fn batch_incr_read_cnt(&self, keys: &[BizKey]) -> InteractiveResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        self.store.batch_incr_read_cnt(keys).await?;

        for key in keys.iter().cloned() {
            let cache = self.cache.clone();
            self.background.spawn("interactive_cache_incr_read", async move {
                if let Err(e) = cache
                    .incr_if_present(&key.biz_type, key.biz_id, CounterField::Read)
                    .await
                {
                    warn!(
                        biz_type = %key.biz_type,
                        biz_id = key.biz_id,
                        error = %e,
                        "Failed to propagate batch read increment to cache"
                    );
                }
            });
        }

        Ok(())
    }

    async fn incr_like(&self, biz_type: &str, biz_id: i64, user_id: i64) -> InteractiveResult<()> {
        if self.store.upsert_like_mark(biz_type, biz_id, user_id).await? {
            self.adjust_cache(biz_type, biz_id, CounterField::Like, true)
                .await;
        } else {
            debug!(biz_type = %biz_type, biz_id, user_id, "Like already active");
        }
        Ok(())
    }

    async fn decr_like(&self, biz_type: &str, biz_id: i64, user_id: i64) -> InteractiveResult<()> {
        if self.store.retract_like_mark(biz_type, biz_id, user_id).await? {
            self.adjust_cache(biz_type, biz_id, CounterField::Like, false)
                .await;
        } else {
            debug!(biz_type = %biz_type, biz_id, user_id, "No active like to cancel");
        }
        Ok(())
    }

    async fn add_collection_item(
        &self,
        biz_type: &str,
        biz_id: i64,
        folder_id: i64,
        user_id: i64,
    ) -> InteractiveResult<()> {
        if self
            .store
            .insert_collection_mark(biz_type, biz_id, folder_id, user_id)
            .await?
        {
            self.adjust_cache(biz_type, biz_id, CounterField::Collect, true)
                .await;
        } else {
            debug!(biz_type = %biz_type, biz_id, user_id, "Item already collected");
        }
        Ok(())
    }

    async fn get(&self, biz_type: &str, biz_id: i64) -> InteractiveResult<Interactive> {
        match self.cache_call(self.cache.get(biz_type, biz_id)).await {
            Ok(Some(intr)) => {
                debug!(biz_type = %biz_type, biz_id, "Cache HIT for interactive");
                return Ok(intr);
            }
            Ok(None) => {
                debug!(biz_type = %biz_type, biz_id, "Cache MISS for interactive");
            }
            Err(e) => {
                warn!(biz_type = %biz_type, biz_id, error = %e, "Cache error for interactive");
            }
        }

        let intr = Interactive::from(self.store.get(biz_type, biz_id).await?);

        let cache = self.cache.clone();
        let biz_type = biz_type.to_string();
        let snapshot = intr.clone();
        self.background.spawn("interactive_cache_set", async move {
            if let Err(e) = cache.set(&biz_type, biz_id, &snapshot).await {
                warn!(
                    biz_type = %biz_type,
                    biz_id,
                    error = %e,
                    "Failed to write back interactive cache"
                );
            }
        });

        Ok(intr)
    }

    async fn liked(&self, biz_type: &str, biz_id: i64, user_id: i64) -> InteractiveResult<bool> {
        match self.store.get_like_mark(biz_type, biz_id, user_id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn collected(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<bool> {
        match self.store.get_collection_mark(biz_type, biz_id, user_id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_by_ids(
        &self,
        biz_type: &str,
        biz_ids: &[i64],
    ) -> InteractiveResult<Vec<Interactive>> {
        let rows = self.store.get_by_ids(biz_type, biz_ids).await?;
        Ok(rows.into_iter().map(Interactive::from).collect())
    }
}
