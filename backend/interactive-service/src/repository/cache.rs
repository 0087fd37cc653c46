//! Redis counter cache
//!
//! Key: `interactive:{biz_type}:{biz_id}` holding a hash of
//! `read_cnt`, `like_cnt`, `collect_cnt`.
//! TTL: 15 minutes, refreshed whenever the entry is repopulated.
//!
//! Adjustments only touch keys that already exist, so an item that was never
//! read through the cache never gets a partial (zero-based) entry.

use crate::domain::models::{CounterField, Interactive};
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::collections::HashMap;
use tracing::debug;

/// TTL for cached counter hashes (15 minutes)
pub const INTERACTIVE_CACHE_TTL_SECS: i64 = 900;

/// HINCRBY only when the hash already exists
const ADJUST_IF_PRESENT_SCRIPT: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 1 then
        redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
        return 1
    end
    return 0
"#;

/// Format: interactive:{biz_type}:{biz_id}
pub fn cache_key(biz_type: &str, biz_id: i64) -> String {
    format!("interactive:{}:{}", biz_type, biz_id)
}

/// Best-effort counter cache
#[async_trait]
pub trait InteractiveCache: Send + Sync {
    /// `None` on miss
    async fn get(&self, biz_type: &str, biz_id: i64) -> CacheResult<Option<Interactive>>;

    /// Unconditionally overwrite the cached counters
    async fn set(&self, biz_type: &str, biz_id: i64, intr: &Interactive) -> CacheResult<()>;

    /// +1 on `field` if an entry exists. Returns whether an entry was adjusted.
    async fn incr_if_present(
        &self,
        biz_type: &str,
        biz_id: i64,
        field: CounterField,
    ) -> CacheResult<bool>;

    /// -1 on `field` if an entry exists. Returns whether an entry was adjusted.
    async fn decr_if_present(
        &self,
        biz_type: &str,
        biz_id: i64,
        field: CounterField,
    ) -> CacheResult<bool>;
}

#[derive(Clone)]
pub struct RedisInteractiveCache {
    redis: ConnectionManager,
    adjust_script: Script,
}

impl RedisInteractiveCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            adjust_script: Script::new(ADJUST_IF_PRESENT_SCRIPT),
        }
    }

    async fn adjust_if_present(
        &self,
        biz_type: &str,
        biz_id: i64,
        field: CounterField,
        delta: i64,
    ) -> CacheResult<bool> {
        let key = cache_key(biz_type, biz_id);
        let mut conn = self.redis.clone();

        let adjusted: i64 = self
            .adjust_script
            .key(&key)
            .arg(field.cache_field())
            .arg(delta)
            .invoke_async(&mut conn)
            .await?;

        debug!(key = %key, field = field.cache_field(), delta, adjusted = adjusted == 1, "Cache adjust");
        Ok(adjusted == 1)
    }
}

/// Rebuild a snapshot from the cached hash; every counter field must be present.
fn snapshot_from_hash(biz_id: i64, fields: &HashMap<String, i64>) -> CacheResult<Interactive> {
    let field = |f: CounterField| {
        fields.get(f.cache_field()).copied().ok_or_else(|| {
            CacheError::InvalidData(format!("missing field {} for biz_id {}", f.cache_field(), biz_id))
        })
    };

    Ok(Interactive {
        biz_id,
        read_count: field(CounterField::Read)?,
        like_count: field(CounterField::Like)?,
        collect_count: field(CounterField::Collect)?,
        liked: false,
        collected: false,
    })
}

#[async_trait]
impl InteractiveCache for RedisInteractiveCache {
    async fn get(&self, biz_type: &str, biz_id: i64) -> CacheResult<Option<Interactive>> {
        let key = cache_key(biz_type, biz_id);
        let fields: HashMap<String, i64> = self.redis.clone().hgetall(&key).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        snapshot_from_hash(biz_id, &fields).map(Some)
    }

    async fn set(&self, biz_type: &str, biz_id: i64, intr: &Interactive) -> CacheResult<()> {
        let key = cache_key(biz_type, biz_id);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &key,
                &[
                    (CounterField::Read.cache_field(), intr.read_count),
                    (CounterField::Like.cache_field(), intr.like_count),
                    (CounterField::Collect.cache_field(), intr.collect_count),
                ],
            )
            .ignore()
            .expire(&key, INTERACTIVE_CACHE_TTL_SECS)
            .ignore();

        pipe.query_async::<_, ()>(&mut self.redis.clone()).await?;

        debug!(key = %key, ttl = INTERACTIVE_CACHE_TTL_SECS, "Cache set");
        Ok(())
    }

    async fn incr_if_present(
        &self,
        biz_type: &str,
        biz_id: i64,
        field: CounterField,
    ) -> CacheResult<bool> {
        self.adjust_if_present(biz_type, biz_id, field, 1).await
    }

    async fn decr_if_present(
        &self,
        biz_type: &str,
        biz_id: i64,
        field: CounterField,
    ) -> CacheResult<bool> {
        self.adjust_if_present(biz_type, biz_id, field, -1).await
    }
}
