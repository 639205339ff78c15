/**
 * CACHE - Interface étroite vers le cache partagé
 *
 * RÔLE : Le moteur et le sweeper partagent un memcached. Ce module le
 * modélise comme un service externe derrière un trait get/set/delete(+ttl) :
 * l'atomicité ne vaut que par clé, il n'existe aucune transaction multi-clés.
 *
 * BACKENDS :
 * - MemcachedCache : protocole texte memcached sur TCP (production)
 * - MemoryCache    : HashMap en process (tests et développement local)
 *
 * Les valeurs sont encodées en JSON via serde.
 */

pub mod memcached;
pub mod memory;

pub use memcached::MemcachedCache;
pub use memory::MemoryCache;

use crate::error::CacheError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Opérations élémentaires du cache partagé. Chaque opération est atomique
/// par clé ; toute séquence lecture-modification-écriture reste susceptible
/// d'interférence avec l'autre processus.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// `ttl` en secondes ; None = pas d'expiration.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Vérifie la joignabilité du service au démarrage.
    async fn ping(&self) -> Result<(), CacheError>;
}

/// Lit et désérialise une valeur JSON.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn Cache,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

/// Sérialise et écrit une valeur JSON.
pub async fn set_json<T: Serialize>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Option<u64>,
) -> Result<(), CacheError> {
    let raw = serde_json::to_vec(value)?;
    cache.set(key, &raw, ttl).await
}
