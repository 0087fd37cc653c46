pub mod cache;
pub mod interactive;
pub mod store;

pub use cache::{InteractiveCache, RedisInteractiveCache};
pub use interactive::{CachedInteractiveRepository, InteractiveRepository};
pub use store::{InteractiveStore, PgInteractiveStore};
