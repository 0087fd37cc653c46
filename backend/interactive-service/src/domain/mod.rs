pub mod models;

pub use models::{
    BizKey, CollectionMark, CounterField, Interactive, InteractiveRow, LikeMark, LikeStatus,
};
