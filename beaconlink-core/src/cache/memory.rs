//! Backend cache en mémoire pour les tests et le développement local.
//!
//! Même contrat que le memcached de production : atomicité par clé
//! uniquement, expiration par TTL vérifiée à la lecture.

use super::Cache;
use crate::error::CacheError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nombre de clés non expirées, pour les assertions de test.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at.map(|t| t > now).unwrap_or(true))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) => {
                if let Some(deadline) = entry.expires_at {
                    if Instant::now() >= deadline {
                        entries.remove(key);
                        return Ok(None);
                    }
                }
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|secs| Instant::now() + Duration::from_secs(secs));
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{get_json, set_json};

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.set("k", b"v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        // delete idempotent
        cache.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let cache = MemoryCache::new();
        set_json(&cache, "nums", &vec![3i64, 7], None).await.unwrap();
        let back: Option<Vec<i64>> = get_json(&cache, "nums").await.unwrap();
        assert_eq!(back, Some(vec![3, 7]));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let cache = MemoryCache::new();
        cache.set("short", b"v", Some(1)).await.unwrap();
        // Force l'expiration sans attendre.
        cache.entries.lock().get_mut("short").unwrap().expires_at =
            Some(Instant::now() - Duration::from_secs(1));
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert!(cache.is_empty());
    }
}
