mod bloom;
mod cache;
mod config;
mod context;
mod engine;
mod error;
mod hashing;
mod index;
mod normalize;
mod types;

pub use bloom::BloomFilter;
pub use cache::{CacheStats, CachedHash, DedupCache, TaskClaim};
pub use config::DedupConfig;
pub use context::{ContextSnapshot, ContextStats, DedupContext};
pub use engine::{DedupEngine, EngineMetrics};
pub use error::DedupError;
pub use hashing::{content_hash, text_similarity};
pub use index::{IndexStore, MemoryIndexStore, PgIndexStore};
pub use normalize::normalize_url;
pub use types::{ContentRecord, DuplicateType, DuplicateVerdict};
