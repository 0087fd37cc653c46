use crate::domain::models::Interactive;
use crate::error::InteractiveResult;
use crate::repository::InteractiveRepository;
use std::collections::HashMap;
use std::sync::Arc;

/// Client-facing interactive queries and commands.
///
/// `get` merges the counter snapshot with the caller's like/collect status;
/// `get_by_ids` is the cheaper listing shape without per-user fields.
#[derive(Clone)]
pub struct InteractiveService {
    repo: Arc<dyn InteractiveRepository>,
}

impl InteractiveService {
    pub fn new(repo: Arc<dyn InteractiveRepository>) -> Self {
        Self { repo }
    }

    pub async fn incr_read_cnt(&self, biz_type: &str, biz_id: i64) -> InteractiveResult<()> {
        self.repo.incr_read_cnt(biz_type, biz_id).await
    }

    pub async fn like(&self, biz_type: &str, biz_id: i64, user_id: i64) -> InteractiveResult<()> {
        self.repo.incr_like(biz_type, biz_id, user_id).await
    }

    pub async fn cancel_like(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<()> {
        self.repo.decr_like(biz_type, biz_id, user_id).await
    }

    pub async fn collect(
        &self,
        biz_type: &str,
        biz_id: i64,
        folder_id: i64,
        user_id: i64,
    ) -> InteractiveResult<()> {
        self.repo
            .add_collection_item(biz_type, biz_id, folder_id, user_id)
            .await
    }

    /// Counters plus whether `user_id` likes / has collected the item.
    ///
    /// Both checks run concurrently and to completion; if either fails the
    /// call fails (the like check's error wins when both do).
    pub async fn get(
        &self,
        biz_type: &str,
        biz_id: i64,
        user_id: i64,
    ) -> InteractiveResult<Interactive> {
        let mut intr = self.repo.get(biz_type, biz_id).await?;

        let (liked, collected) = tokio::join!(
            self.repo.liked(biz_type, biz_id, user_id),
            self.repo.collected(biz_type, biz_id, user_id),
        );

        intr.liked = liked?;
        intr.collected = collected?;
        Ok(intr)
    }

    pub async fn get_by_ids(
        &self,
        biz_type: &str,
        ids: &[i64],
    ) -> InteractiveResult<HashMap<i64, Interactive>> {
        let intrs = self.repo.get_by_ids(biz_type, ids).await?;
        Ok(intrs.into_iter().map(|intr| (intr.biz_id, intr)).collect())
    }
}
