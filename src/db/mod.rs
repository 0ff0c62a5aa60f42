use std::collections::hash_map::DefaultHasher;
use std::fmt::Display;
use std::hash::{Hash, Hasher};

use uuid::Uuid;

use crate::error::AppResult;

pub mod memory;
pub mod redis;

pub use memory::MemoryCache;
pub use redis::cache::{create_redis_client, CacheWriterHandle, RedisCache};

/// Logical names for the whole-result caches.
///
/// Every expensive aggregate is keyed by a fixed name plus its parameters so
/// concurrent writers always recompute the same value (last-writer-wins).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Shared guest recommendation page
    GuestRecommendations { limit: usize },
    /// Globally-popular works
    PopularWorks { limit: usize },
    /// Quality-filtered new works
    QualityNewWorks { limit: usize },
    /// Popularity fallback page served when the pipeline fails
    PopularityFallback { limit: usize },
    /// Quality score batch, keyed by a digest of the work-id set
    QualityScores { digest: u64 },
}

impl CacheKey {
    /// Key for a quality score batch. Order-insensitive: the same set of
    /// work ids always maps to the same key.
    pub fn quality_scores(work_ids: &[Uuid]) -> Self {
        let mut ids: Vec<Uuid> = work_ids.to_vec();
        ids.sort();
        let mut hasher = DefaultHasher::new();
        ids.hash(&mut hasher);
        CacheKey::QualityScores {
            digest: hasher.finish(),
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::GuestRecommendations { limit } => write!(f, "reco:guest:{}", limit),
            CacheKey::PopularWorks { limit } => write!(f, "reco:popular:{}", limit),
            CacheKey::QualityNewWorks { limit } => write!(f, "reco:newworks:{}", limit),
            CacheKey::PopularityFallback { limit } => write!(f, "reco:fallback:{}", limit),
            CacheKey::QualityScores { digest } => write!(f, "quality:{:016x}", digest),
        }
    }
}

/// Injected cache seam for memoized aggregates.
///
/// Values are JSON strings with a TTL; writes are fire-and-forget upserts.
/// Implementations must never make a cache failure fatal to the caller.
#[async_trait::async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<String>>;

    /// Stores a value without blocking the caller on the write
    fn set(&self, key: &CacheKey, value: String, ttl: u64);
}

/// Reads and deserializes a cached value, treating any cache or decode error
/// as a miss
pub async fn get_cached<T: serde::de::DeserializeOwned>(
    cache: &dyn ResultCache,
    key: &CacheKey,
) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(json)) => match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
            None
        }
    }
}

/// Serializes and stores a value in the background
pub fn put_cached<T: serde::Serialize>(
    cache: &dyn ResultCache,
    key: &CacheKey,
    value: &T,
    ttl: u64,
) {
    match serde_json::to_string(value) {
        Ok(json) => cache.set(key, json, ttl),
        Err(e) => tracing::error!(key = %key, error = %e, "Cache serialization error"),
    }
}
