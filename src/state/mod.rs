pub mod cache;
pub mod dedup;

pub use cache::{Cache, CacheStats};
pub use dedup::{DedupStats, Deduplicator, MomentumSnapshot};
