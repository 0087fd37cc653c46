use serde::{Deserialize, Serialize};

/// Counter column adjusted by an increment or a cache adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CounterField {
    Read,
    Like,
    Collect,
}

impl CounterField {
    /// Column name in `interactive_counters`
    pub fn column(self) -> &'static str {
        match self {
            CounterField::Read => "read_count",
            CounterField::Like => "like_count",
            CounterField::Collect => "collect_count",
        }
    }

    /// Field name inside the cached hash
    pub fn cache_field(self) -> &'static str {
        match self {
            CounterField::Read => "read_cnt",
            CounterField::Like => "like_cnt",
            CounterField::Collect => "collect_cnt",
        }
    }
}

/// (biz_type, biz_id) pair identifying a counted item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BizKey {
    pub biz_type: String,
    pub biz_id: i64,
}

impl BizKey {
    pub fn new(biz_type: impl Into<String>, biz_id: i64) -> Self {
        Self {
            biz_type: biz_type.into(),
            biz_id,
        }
    }
}

/// Counter snapshot returned to callers.
///
/// `liked` and `collected` are only filled in by the per-user aggregation
/// query; every other path leaves them false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interactive {
    pub biz_id: i64,
    pub read_count: i64,
    pub like_count: i64,
    pub collect_count: i64,
    pub liked: bool,
    pub collected: bool,
}

/// Row of `interactive_counters`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InteractiveRow {
    pub id: i64,
    pub biz_type: String,
    pub biz_id: i64,
    pub read_count: i64,
    pub like_count: i64,
    pub collect_count: i64,
    /// Unix millis
    pub created_at: i64,
    /// Unix millis
    pub updated_at: i64,
}

impl From<InteractiveRow> for Interactive {
    fn from(row: InteractiveRow) -> Self {
        Self {
            biz_id: row.biz_id,
            read_count: row.read_count,
            like_count: row.like_count,
            collect_count: row.collect_count,
            liked: false,
            collected: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum LikeStatus {
    Inactive = 0,
    Active = 1,
}

impl LikeStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

impl From<i16> for LikeStatus {
    fn from(value: i16) -> Self {
        if value == LikeStatus::Active as i16 {
            LikeStatus::Active
        } else {
            LikeStatus::Inactive
        }
    }
}

/// Row of `user_like_marks`. Unliking flips `status` instead of deleting the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LikeMark {
    pub id: i64,
    pub user_id: i64,
    pub biz_type: String,
    pub biz_id: i64,
    pub status: i16,
    pub created_at: i64,
    pub updated_at: i64,
}

impl LikeMark {
    pub fn status(&self) -> LikeStatus {
        LikeStatus::from(self.status)
    }
}

/// Row of `user_collection_marks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CollectionMark {
    pub id: i64,
    pub user_id: i64,
    pub biz_type: String,
    pub biz_id: i64,
    pub folder_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Current time in unix millis, as stored in every `*_at` column
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
