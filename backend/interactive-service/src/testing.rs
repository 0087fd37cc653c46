//! In-memory store and cache, plus repository doubles, used by unit tests.
//!
//! `MemoryStore` applies every operation under one lock, which gives the same
//! per-operation atomicity the PostgreSQL upserts provide, and stages batch
//! writes so an injected failure discards the whole batch.

use crate::domain::models::{
    BizKey, CollectionMark, CounterField, Interactive, InteractiveRow, LikeMark, LikeStatus,
};
use crate::error::{CacheError, CacheResult, InteractiveError, InteractiveResult};
use crate::repository::cache::{cache_key, InteractiveCache};
use crate::repository::interactive::InteractiveRepository;
use crate::repository::store::InteractiveStore;
use async_trait::async_trait;
use mockall::mock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

mock! {
    pub InteractiveRepository {}

    #[async_trait]
    impl InteractiveRepository for InteractiveRepository {
        async fn incr_read_cnt(&self, biz_type: &str, biz_id: i64) -> InteractiveResult<()>;
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
        async fn collected(&self, biz_type: &str, biz_id: i64, user_id: i64) -> InteractiveResult<bool>;
        async fn get_by_ids(&self, biz_type: &str, biz_ids: &[i64]) -> InteractiveResult<Vec<Interactive>>;
    }
}

type MarkKey = (i64, String, i64);

#[derive(Default, Clone)]
struct Tables {
    counters: HashMap<BizKey, InteractiveRow>,
    likes: HashMap<MarkKey, LikeMark>,
    collections: HashMap<MarkKey, CollectionMark>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn apply_delta(&mut self, key: &BizKey, field: CounterField, delta: i64) {
        if delta <= 0 && !self.counters.contains_key(key) {
            return;
        }
        let id = self.next_id();
        let row = self.counters.entry(key.clone()).or_insert_with(|| InteractiveRow {
            id,
            biz_type: key.biz_type.clone(),
            biz_id: key.biz_id,
            read_count: 0,
            like_count: 0,
            collect_count: 0,
            created_at: 0,
            updated_at: 0,
        });
        let value = match field {
            CounterField::Read => &mut row.read_count,
            CounterField::Like => &mut row.like_count,
            CounterField::Collect => &mut row.collect_count,
        };
        *value = (*value + delta).max(0);
    }
}

fn injected(op: &'static str) -> InteractiveError {
    InteractiveError::Transaction {
        op,
        source: sqlx::Error::Protocol("injected failure".to_string()),
    }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: Mutex<Tables>,
    failing_keys: Mutex<HashSet<BizKey>>,
    failing_lookups: AtomicBool,
}

impl MemoryStore {
    /// Any write touching this key fails (and rolls back its transaction)
    pub(crate) fn fail_writes_for(&self, biz_type: &str, biz_id: i64) {
        self.failing_keys
            .lock()
            .unwrap()
            .insert(BizKey::new(biz_type, biz_id));
    }

    pub(crate) fn fail_mark_lookups(&self, failing: bool) {
        self.failing_lookups.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn like_mark_rows(&self, biz_type: &str, biz_id: i64, user_id: i64) -> usize {
        self.tables
            .lock()
            .unwrap()
            .likes
            .keys()
            .filter(|k| **k == (user_id, biz_type.to_string(), biz_id))
            .count()
    }

    fn check_writable(&self, key: &BizKey, op: &'static str) -> InteractiveResult<()> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(injected(op));
        }
        Ok(())
    }

    fn check_lookup(&self) -> InteractiveResult<()> {
        if self.failing_lookups.load(Ordering::SeqCst) {
            return Err(InteractiveError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl InteractiveStore for MemoryStore {
    async fn incr_counter_field(
        &self,
        biz_type: &str,
        biz_id: i64,
        field: CounterField,
        delta: i64,
    ) -> InteractiveResult<()> {
        let key = BizKey::new(biz_type, biz_id);
        self.check_writable(&key, "incr_counter_field")?;
        self.tables.lock().unwrap().apply_delta(&key, field, delta);
        // Yield so concurrent callers interleave between operations
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn batch_incr_read_cnt(&self, keys: &[BizKey]) -> InteractiveResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let mut staged = tables.clone();
        for key in keys {
            self.check_writable(key, "batch_incr_read_cnt")?;
            staged.apply_delta(key, CounterField::Read, 1);
        }
        *tables = staged;
        Ok(())
    }

    async fn upsert_like_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<bool> {
        let key = BizKey::new(biz_type, biz_id);
        self.check_writable(&key, "upsert_like_mark")?;

        let mut tables = self.tables.lock().unwrap();
        let mark_key = (user_id, biz_type.to_string(), biz_id);
        match tables.likes.get(&mark_key).map(LikeMark::status) {
            Some(LikeStatus::Active) => return Ok(false),
            Some(LikeStatus::Inactive) => {
                if let Some(mark) = tables.likes.get_mut(&mark_key) {
                    mark.status = LikeStatus::Active.as_i16();
                }
            }
            None => {
                let id = tables.next_id();
                tables.likes.insert(
                    mark_key,
                    LikeMark {
                        id,
                        user_id,
                        biz_type: biz_type.to_string(),
                        biz_id,
                        status: LikeStatus::Active.as_i16(),
                        created_at: 0,
                        updated_at: 0,
                    },
                );
            }
        }
        tables.apply_delta(&key, CounterField::Like, 1);
        Ok(true)
    }

    async fn retract_like_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<bool> {
        let key = BizKey::new(biz_type, biz_id);
        self.check_writable(&key, "retract_like_mark")?;

        let mut tables = self.tables.lock().unwrap();
        match tables.likes.get_mut(&(user_id, biz_type.to_string(), biz_id)) {
            Some(mark) if mark.status() == LikeStatus::Active => {
                mark.status = LikeStatus::Inactive.as_i16();
            }
            _ => return Ok(false),
        }
        tables.apply_delta(&key, CounterField::Like, -1);
        Ok(true)
    }

    async fn insert_collection_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        folder_id: i64,
        user_id: i64,
    ) -> InteractiveResult<bool> {
        let key = BizKey::new(biz_type, biz_id);
        self.check_writable(&key, "insert_collection_mark")?;

        let mut tables = self.tables.lock().unwrap();
        let mark_key = (user_id, biz_type.to_string(), biz_id);
        if tables.collections.contains_key(&mark_key) {
            return Ok(false);
        }
        let id = tables.next_id();
        tables.collections.insert(
            mark_key,
            CollectionMark {
                id,
                user_id,
                biz_type: biz_type.to_string(),
                biz_id,
                folder_id,
                created_at: 0,
                updated_at: 0,
            },
        );
        tables.apply_delta(&key, CounterField::Collect, 1);
        Ok(true)
    }

    async fn get_like_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<LikeMark> {
        self.check_lookup()?;
        self.tables
            .lock()
            .unwrap()
            .likes
            .get(&(user_id, biz_type.to_string(), biz_id))
            .filter(|mark| mark.status() == LikeStatus::Active)
            .cloned()
            .ok_or(InteractiveError::NotFound)
    }

    async fn get_collection_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<CollectionMark> {
        self.check_lookup()?;
        self.tables
            .lock()
            .unwrap()
            .collections
            .get(&(user_id, biz_type.to_string(), biz_id))
            .cloned()
            .ok_or(InteractiveError::NotFound)
    }

    async fn get(&self, biz_type: &str, biz_id: i64) -> InteractiveResult<InteractiveRow> {
        self.tables
            .lock()
            .unwrap()
            .counters
            .get(&BizKey::new(biz_type, biz_id))
            .cloned()
            .ok_or(InteractiveError::NotFound)
    }

    async fn get_by_ids(
        &self,
        biz_type: &str,
        biz_ids: &[i64],
    ) -> InteractiveResult<Vec<InteractiveRow>> {
        let tables = self.tables.lock().unwrap();
        Ok(biz_ids
            .iter()
            .filter_map(|id| tables.counters.get(&BizKey::new(biz_type, *id)).cloned())
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryCache {
    entries: Mutex<HashMap<String, Interactive>>,
    failing: AtomicBool,
    set_delay: Option<Duration>,
    adjust_calls: AtomicUsize,
}

impl MemoryCache {
    pub(crate) fn with_set_delay(mut self, delay: Duration) -> Self {
        self.set_delay = Some(delay);
        self
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn insert(&self, biz_type: &str, biz_id: i64, intr: Interactive) {
        self.entries
            .lock()
            .unwrap()
            .insert(cache_key(biz_type, biz_id), intr);
    }

    pub(crate) fn entry(&self, biz_type: &str, biz_id: i64) -> Option<Interactive> {
        self.entries
            .lock()
            .unwrap()
            .get(&cache_key(biz_type, biz_id))
            .cloned()
    }

    pub(crate) fn adjust_calls(&self) -> usize {
        self.adjust_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            let err: redis::RedisError = (redis::ErrorKind::IoError, "injected failure").into();
            return Err(CacheError::Redis(err));
        }
        Ok(())
    }

    fn adjust(&self, biz_type: &str, biz_id: i64, field: CounterField, delta: i64) -> CacheResult<bool> {
        self.adjust_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let mut entries = self.entries.lock().unwrap();
        let Some(intr) = entries.get_mut(&cache_key(biz_type, biz_id)) else {
            return Ok(false);
        };
        match field {
            CounterField::Read => intr.read_count += delta,
            CounterField::Like => intr.like_count += delta,
            CounterField::Collect => intr.collect_count += delta,
        }
        Ok(true)
    }
}

#[async_trait]
impl InteractiveCache for MemoryCache {
    async fn get(&self, biz_type: &str, biz_id: i64) -> CacheResult<Option<Interactive>> {
        self.check()?;
        Ok(self.entry(biz_type, biz_id))
    }

    async fn set(&self, biz_type: &str, biz_id: i64, intr: &Interactive) -> CacheResult<()> {
        self.check()?;
        if let Some(delay) = self.set_delay {
            tokio::time::sleep(delay).await;
        }
        self.insert(biz_type, biz_id, intr.clone());
        Ok(())
    }

    async fn incr_if_present(
        &self,
        biz_type: &str,
        biz_id: i64,
        field: CounterField,
    ) -> CacheResult<bool> {
        self.adjust(biz_type, biz_id, field, 1)
    }

    async fn decr_if_present(
        &self,
        biz_type: &str,
        biz_id: i64,
        field: CounterField,
    ) -> CacheResult<bool> {
        self.adjust(biz_type, biz_id, field, -1)
    }
}

/// Repository whose read-count writes never finish within a test deadline
pub(crate) struct StalledRepository;

impl StalledRepository {
    const STALL: Duration = Duration::from_secs(5);
}

#[async_trait]
impl InteractiveRepository for StalledRepository {
    async fn incr_read_cnt(&self, _: &str, _: i64) -> InteractiveResult<()> {
        tokio::time::sleep(Self::STALL).await;
        Ok(())
    }

    async fn batch_incr_read_cnt(&self, _: &[BizKey]) -> InteractiveResult<()> {
        tokio::time::sleep(Self::STALL).await;
        Ok(())
    }

    async fn incr_like(&self, _: &str, _: i64, _: i64) -> InteractiveResult<()> {
        Ok(())
    }

    async fn decr_like(&self, _: &str, _: i64, _: i64) -> InteractiveResult<()> {
        Ok(())
    }

    async fn add_collection_item(&self, _: &str, _: i64, _: i64, _: i64) -> InteractiveResult<()> {
        Ok(())
    }

    async fn get(&self, _: &str, _: i64) -> InteractiveResult<Interactive> {
        Err(InteractiveError::NotFound)
    }

    async fn liked(&self, _: &str, _: i64, _: i64) -> InteractiveResult<bool> {
        Ok(false)
    }

    async fn collected(&self, _: &str, _: i64, _: i64) -> InteractiveResult<bool> {
        Ok(false)
    }

    async fn get_by_ids(&self, _: &str, _: &[i64]) -> InteractiveResult<Vec<Interactive>> {
        Ok(Vec::new())
    }
}
