use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::db::{CacheKey, ResultCache};
use crate::error::AppResult;

/// In-process result cache for tests and Redis-less development.
///
/// Same TTL semantics as the Redis cache, minus the background writer:
/// writes land synchronously since there is no network hop to hide.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<String>> {
        let mut entries = self.entries.lock().expect("memory cache poisoned");
        match entries.get(&key.to_string()) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(&key.to_string());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &CacheKey, value: String, ttl: u64) {
        let expires_at = Instant::now() + Duration::from_secs(ttl);
        self.entries
            .lock()
            .expect("memory cache poisoned")
            .insert(key.to_string(), (value, expires_at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = MemoryCache::new();
        let key = CacheKey::PopularWorks { limit: 30 };

        cache.set(&key, "[1,2,3]".to_string(), 60);
        assert_eq!(cache.get(&key).await.unwrap(), Some("[1,2,3]".to_string()));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryCache::new();
        let key = CacheKey::GuestRecommendations { limit: 9 };

        cache.set(&key, "[]".to_string(), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let cache = MemoryCache::new();
        let key = CacheKey::PopularWorks { limit: 30 };

        cache.set(&key, "old".to_string(), 60);
        cache.set(&key, "new".to_string(), 60);
        assert_eq!(cache.get(&key).await.unwrap(), Some("new".to_string()));
    }
}
