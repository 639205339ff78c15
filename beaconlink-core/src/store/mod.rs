/**
 * STORE - Accès au stockage durable (relations hub / beacon / pair)
 *
 * RÔLE : Abstraction du store relationnel partagé par les deux processus.
 * Le moteur ne gère pas le schéma (provisionné en amont) : il lit les
 * entités existantes, rafraîchit leur état et insère/supprime les paires.
 *
 * BACKENDS :
 * - MySqlStore  : sqlx/MySQL (production)
 * - MemoryStore : tables en mémoire avec compteurs d'écriture (tests)
 */

pub mod memory;
pub mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// Délai fixe entre deux tentatives de reconnexion à la base.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Nombre de tentatives avant l'arrêt fatal du processus.
pub const MAX_RETRIES: u32 = 50;

/// Ligne `hub(id, hw_address, last_seen_ts)`.
#[derive(Debug, Clone, PartialEq)]
pub struct HubRow {
    pub id: i64,
    pub mac: String,
    pub last_seen: i64,
}

/// Ligne `beacon(...)`, type compris (nullable tant que non provisionné).
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconRow {
    pub id: i64,
    pub mac: String,
    pub hub_id: Option<i64>,
    pub rssi: i64,
    pub report_ts: i64,
    pub hub_since: i64,
    pub battery: i64,
    pub type_id: Option<i64>,
}

/// Ligne `pair(beacon_id_1 <= beacon_id_2, created_ts, hub_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PairRow {
    pub beacon_a: i64,
    pub beacon_b: i64,
    pub created_ts: i64,
    pub hub_id: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn hub_by_mac(&self, mac: &str) -> Result<Option<HubRow>, StoreError>;
    async fn beacon_by_mac(&self, mac: &str) -> Result<Option<BeaconRow>, StoreError>;

    /// Chargements d'hydratation au démarrage.
    async fn load_hubs(&self) -> Result<Vec<HubRow>, StoreError>;
    async fn load_beacons(&self) -> Result<Vec<BeaconRow>, StoreError>;
    async fn load_compatibility(&self) -> Result<Vec<(i64, i64)>, StoreError>;
    async fn load_pairs(&self) -> Result<Vec<PairRow>, StoreError>;

    async fn update_hub_seen(&self, hub_id: i64, ts: i64) -> Result<(), StoreError>;
    async fn update_beacon(
        &self,
        beacon_id: i64,
        hub_id: i64,
        rssi: i64,
        ts: i64,
        hub_since: i64,
        battery: i64,
    ) -> Result<(), StoreError>;

    /// Insère la paire sous forme canonique (min, max).
    async fn insert_pair(&self, a: i64, b: i64, hub_id: i64, ts: i64) -> Result<(), StoreError>;
    /// Supprime la paire quel que soit l'ordre stocké.
    async fn delete_pair(&self, a: i64, b: i64) -> Result<(), StoreError>;
}

/// Attend que le store réponde, avec délai fixe et nombre de tentatives
/// borné. Au-delà de la borne l'appelant doit terminer le processus :
/// continuer sans durabilité n'est pas acceptable.
pub async fn await_available(store: &dyn Store) -> Result<(), StoreError> {
    let mut attempts = 0u32;
    loop {
        match store.ping().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempts += 1;
                if attempts >= MAX_RETRIES {
                    log::error!("store still unreachable after {attempts} attempts: {e}");
                    return Err(StoreError::RetriesExhausted(attempts));
                }
                log::warn!("store unreachable (attempt {attempts}/{MAX_RETRIES}): {e}");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}
