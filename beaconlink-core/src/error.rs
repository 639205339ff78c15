use thiserror::Error;

/// Erreurs de l'interface cache (memcached ou backend mémoire).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache protocol error: {0}")]
    Protocol(String),
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Erreurs du store durable.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("database unavailable after {0} attempts")]
    RetriesExhausted(u32),
}

/// Erreurs du pipeline de traitement.
///
/// Taxonomie : les messages malformés sont jetés et journalisés, les pannes
/// d'infrastructure remontent au processus appelant. Les appareils inconnus
/// ne sont PAS des erreurs (voir `ingest::Outcome`) : un message peut
/// appartenir à un équipement étranger ou pas encore provisionné.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
