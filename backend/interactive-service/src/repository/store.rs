//! Authoritative counter store
//!
//! Every counter mutation is a single `INSERT ... ON CONFLICT DO UPDATE` (or a
//! guarded `UPDATE`), so concurrent writers from any number of processes
//! converge without application-level locking. Mark writes and their counter
//! adjustment share one transaction.

use crate::domain::models::{
    now_millis, BizKey, CollectionMark, CounterField, InteractiveRow, LikeMark, LikeStatus,
};
use crate::error::{InteractiveError, InteractiveResult};
use async_trait::async_trait;
use sqlx::{Executor, PgPool, Postgres};
use tracing::debug;

/// Storage operations backing the interactive repository
#[async_trait]
pub trait InteractiveStore: Send + Sync {
    /// Add `delta` to `field`, creating the counter row on first positive increment.
    async fn incr_counter_field(
        &self,
        biz_type: &str,
        biz_id: i64,
        field: CounterField,
        delta: i64,
    ) -> InteractiveResult<()>;

    async fn incr_read_cnt(&self, biz_type: &str, biz_id: i64) -> InteractiveResult<()> {
        self.incr_counter_field(biz_type, biz_id, CounterField::Read, 1)
            .await
    }

    /// Increment read_count for every key in one transaction (all or nothing)
    async fn batch_incr_read_cnt(&self, keys: &[BizKey]) -> InteractiveResult<()>;

    /// Activate the like mark and bump like_count.
    /// Returns false (and writes nothing) if the mark was already active.
    async fn upsert_like_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<bool>;

    /// Deactivate the like mark and drop like_count.
    /// Returns false (and writes nothing) if there was no active mark.
    async fn retract_like_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<bool>;

    /// Insert the collection mark and bump collect_count.
    /// Returns false (and writes nothing) if the item was already collected.
    async fn insert_collection_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        folder_id: i64,
        user_id: i64,
    ) -> InteractiveResult<bool>;

    /// Active like mark, or `NotFound`
    async fn get_like_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<LikeMark>;

    async fn get_collection_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<CollectionMark>;

    async fn get(&self, biz_type: &str, biz_id: i64) -> InteractiveResult<InteractiveRow>;

    /// Every existing counter row among `biz_ids`; missing ids are simply absent.
    async fn get_by_ids(
        &self,
        biz_type: &str,
        biz_ids: &[i64],
    ) -> InteractiveResult<Vec<InteractiveRow>>;
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgInteractiveStore {
    pool: PgPool,
}

impl PgInteractiveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Apply `delta` to one counter column through any executor (pool or open transaction).
///
/// Positive deltas upsert; negative deltas only touch an existing row and clamp at zero.
/// A zero delta writes nothing, so it never creates a row.
async fn apply_counter_delta<'e, E>(
    executor: E,
    biz_type: &str,
    biz_id: i64,
    field: CounterField,
    delta: i64,
    now: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    if delta == 0 {
        return Ok(());
    }

    let column = field.column();

    if delta > 0 {
        let sql = format!(
            r#"
            INSERT INTO interactive_counters (biz_type, biz_id, {column}, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (biz_type, biz_id) DO UPDATE
            SET {column} = interactive_counters.{column} + EXCLUDED.{column},
                updated_at = EXCLUDED.updated_at
            "#
        );
        sqlx::query(&sql)
            .bind(biz_type)
            .bind(biz_id)
            .bind(delta)
            .bind(now)
            .execute(executor)
            .await?;
    } else {
        let sql = format!(
            r#"
            UPDATE interactive_counters
            SET {column} = GREATEST({column} + $3, 0),
                updated_at = $4
            WHERE biz_type = $1 AND biz_id = $2
            "#
        );
        sqlx::query(&sql)
            .bind(biz_type)
            .bind(biz_id)
            .bind(delta)
            .bind(now)
            .execute(executor)
            .await?;
    }

    Ok(())
}

#[async_trait]
impl InteractiveStore for PgInteractiveStore {
    async fn incr_counter_field(
        &self,
        biz_type: &str,
        biz_id: i64,
        field: CounterField,
        delta: i64,
    ) -> InteractiveResult<()> {
        apply_counter_delta(&self.pool, biz_type, biz_id, field, delta, now_millis()).await?;
        Ok(())
    }

    async fn batch_incr_read_cnt(&self, keys: &[BizKey]) -> InteractiveResult<()> {
        const OP: &str = "batch_incr_read_cnt";

        if keys.is_empty() {
            return Ok(());
        }

        let now = now_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(InteractiveError::transaction(OP))?;

        for key in keys {
            apply_counter_delta(
                &mut *tx,
                &key.biz_type,
                key.biz_id,
                CounterField::Read,
                1,
                now,
            )
            .await
            .map_err(InteractiveError::transaction(OP))?;
        }

        tx.commit().await.map_err(InteractiveError::transaction(OP))?;

        debug!(count = keys.len(), "Batch incremented read counts");
        Ok(())
    }

    async fn upsert_like_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<bool> {
        const OP: &str = "upsert_like_mark";

        let now = now_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(InteractiveError::transaction(OP))?;

        // RETURNING yields nothing when the mark was already active
        let activated: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO user_like_marks (user_id, biz_type, biz_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (user_id, biz_type, biz_id) DO UPDATE
            SET status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            WHERE user_like_marks.status <> EXCLUDED.status
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(biz_type)
        .bind(biz_id)
        .bind(LikeStatus::Active.as_i16())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(InteractiveError::transaction(OP))?;

        if activated.is_none() {
            return Ok(false);
        }

        apply_counter_delta(&mut *tx, biz_type, biz_id, CounterField::Like, 1, now)
            .await
            .map_err(InteractiveError::transaction(OP))?;

        tx.commit().await.map_err(InteractiveError::transaction(OP))?;
        Ok(true)
    }

    async fn retract_like_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<bool> {
        const OP: &str = "retract_like_mark";

        let now = now_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(InteractiveError::transaction(OP))?;

        let result = sqlx::query(
            r#"
            UPDATE user_like_marks
            SET status = $4, updated_at = $5
            WHERE user_id = $1 AND biz_type = $2 AND biz_id = $3 AND status = $6
            "#,
        )
        .bind(user_id)
        .bind(biz_type)
        .bind(biz_id)
        .bind(LikeStatus::Inactive.as_i16())
        .bind(now)
        .bind(LikeStatus::Active.as_i16())
        .execute(&mut *tx)
        .await
        .map_err(InteractiveError::transaction(OP))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        apply_counter_delta(&mut *tx, biz_type, biz_id, CounterField::Like, -1, now)
            .await
            .map_err(InteractiveError::transaction(OP))?;

        tx.commit().await.map_err(InteractiveError::transaction(OP))?;
        Ok(true)
    }

    async fn insert_collection_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        folder_id: i64,
        user_id: i64,
    ) -> InteractiveResult<bool> {
        const OP: &str = "insert_collection_mark";

        let now = now_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(InteractiveError::transaction(OP))?;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO user_collection_marks (user_id, biz_type, biz_id, folder_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (user_id, biz_type, biz_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(biz_type)
        .bind(biz_id)
        .bind(folder_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(InteractiveError::transaction(OP))?;

        if inserted.is_none() {
            return Ok(false);
        }

        apply_counter_delta(&mut *tx, biz_type, biz_id, CounterField::Collect, 1, now)
            .await
            .map_err(InteractiveError::transaction(OP))?;

        tx.commit().await.map_err(InteractiveError::transaction(OP))?;
        Ok(true)
    }

    async fn get_like_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<LikeMark> {
        sqlx::query_as::<_, LikeMark>(
            r#"
            SELECT id, user_id, biz_type, biz_id, status, created_at, updated_at
            FROM user_like_marks
            WHERE user_id = $1 AND biz_type = $2 AND biz_id = $3 AND status = $4
            "#,
        )
        .bind(user_id)
        .bind(biz_type)
        .bind(biz_id)
        .bind(LikeStatus::Active.as_i16())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(InteractiveError::NotFound)
    }

    async fn get_collection_mark(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<CollectionMark> {
        sqlx::query_as::<_, CollectionMark>(
            r#"
            SELECT id, user_id, biz_type, biz_id, folder_id, created_at, updated_at
            FROM user_collection_marks
            WHERE user_id = $1 AND biz_type = $2 AND biz_id = $3
            "#,
        )
        .bind(user_id)
        .bind(biz_type)
        .bind(biz_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(InteractiveError::NotFound)
    }

    async fn get(&self, biz_type: &str, biz_id: i64) -> InteractiveResult<InteractiveRow> {
        sqlx::query_as::<_, InteractiveRow>(
            r#"
            SELECT id, biz_type, biz_id, read_count, like_count, collect_count, created_at, updated_at
            FROM interactive_counters
            WHERE biz_type = $1 AND biz_id = $2
            "#,
        )
        .bind(biz_type)
        .bind(biz_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(InteractiveError::NotFound)
    }

    async fn get_by_ids(
        &self,
        biz_type: &str,
        biz_ids: &[i64],
    ) -> InteractiveResult<Vec<InteractiveRow>> {
        if biz_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, InteractiveRow>(
            r#"
            SELECT id, biz_type, biz_id, read_count, like_count, collect_count, created_at, updated_at
            FROM interactive_counters
            WHERE biz_type = $1 AND biz_id = ANY($2)
            "#,
        )
        .bind(biz_type)
        .bind(biz_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
