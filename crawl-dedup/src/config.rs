#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Similarity at or above which the semantic layer declares a duplicate.
    pub similarity_threshold: f64,
    /// Base time window in hours for the title and URL time-window layers.
    /// The semantic layer scans 7x this window.
    pub time_window_hours: i64,
    /// Contents under this many characters skip the semantic layer.
    pub min_semantic_length: usize,
    /// How many recent contents the semantic layer compares against.
    pub semantic_candidate_limit: usize,

    /// Bloom filter sizing.
    pub bloom_capacity: usize,
    pub bloom_error_rate: f64,

    /// TTLs for the cache layer, in seconds.
    pub url_cache_ttl_secs: u64,
    pub content_hash_ttl_secs: u64,
    pub task_claim_ttl_secs: u64,
    pub context_ttl_secs: u64,

    /// Cap on the summed size of a context's three in-memory sets.
    pub max_context_items: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            time_window_hours: 24,
            min_semantic_length: 50,
            semantic_candidate_limit: 100,
            bloom_capacity: 1_000_000,
            bloom_error_rate: 0.01,
            url_cache_ttl_secs: 86_400 * 7,
            content_hash_ttl_secs: 86_400 * 30,
            task_claim_ttl_secs: 86_400 * 3,
            context_ttl_secs: 86_400 * 7,
            max_context_items: 10_000,
        }
    }
}
