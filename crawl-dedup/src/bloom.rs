use sha1::{Digest, Sha1};

use common_redis::{Client, CustomRedisError, Pipeline, PipelineResult};

/// Fixed cache-store key holding the URL Bloom filter bits.
pub const URL_BLOOM_KEY: &str = "bloom_filter:urls";

/// Bloom filter over a cache-store bitset. No false negatives; the
/// false-positive rate is tuned by capacity and error rate:
///   m = ceil(-n * ln(eps) / ln(2)^2), k = ceil(m * ln(2) / n)
/// Double hashing (MD5, SHA-1) simulates the k independent hash functions.
///
/// Bit updates are per-bit SETBITs with no surrounding lock; readers
/// tolerate stale bits because every hit is confirmed against the index
/// store.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    pub capacity: usize,
    pub error_rate: f64,
    pub bit_size: u64,
    pub hash_count: u32,
    key: String,
}

impl BloomFilter {
    pub fn new(capacity: usize, error_rate: f64) -> Self {
        Self::with_key(capacity, error_rate, URL_BLOOM_KEY)
    }

    pub fn with_key(capacity: usize, error_rate: f64, key: impl Into<String>) -> Self {
        let ln2 = std::f64::consts::LN_2;
        let bit_size = (-(capacity as f64) * error_rate.ln() / (ln2 * ln2)).ceil() as u64;
        let hash_count = ((bit_size as f64 * ln2 / capacity as f64).ceil() as u32).max(1);
        Self {
            capacity,
            error_rate,
            bit_size: bit_size.max(1),
            hash_count,
            key: key.into(),
        }
    }

    fn bit_positions(&self, item: &str) -> Vec<u64> {
        let h1 = u128::from_be_bytes(md5::compute(item.as_bytes()).0);
        let sha: [u8; 16] = Sha1::digest(item.as_bytes())[..16]
            .try_into()
            .expect("sha1 digest is at least 16 bytes");
        let h2 = u128::from_be_bytes(sha);

        (0..self.hash_count)
            .map(|i| {
                let combined = h1.wrapping_add((i as u128).wrapping_mul(h2));
                (combined % self.bit_size as u128) as u64
            })
            .collect()
    }

    pub async fn add_item(
        &self,
        client: &(dyn Client + Send + Sync),
        item: &str,
    ) -> Result<(), CustomRedisError> {
        let mut pipeline = Pipeline::new(client);
        for position in self.bit_positions(item) {
            pipeline = pipeline.setbit(self.key.clone(), position, true);
        }
        for result in pipeline.execute().await? {
            result?;
        }
        Ok(())
    }

    /// Probabilistic membership: false means definitely never added.
    pub async fn contains(
        &self,
        client: &(dyn Client + Send + Sync),
        item: &str,
    ) -> Result<bool, CustomRedisError> {
        let mut pipeline = Pipeline::new(client);
        for position in self.bit_positions(item) {
            pipeline = pipeline.getbit(self.key.clone(), position);
        }
        for result in pipeline.execute().await? {
            match result? {
                PipelineResult::Bool(true) => continue,
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    pub async fn clear(
        &self,
        client: &(dyn Client + Send + Sync),
    ) -> Result<(), CustomRedisError> {
        client.del(self.key.clone()).await
    }
}
