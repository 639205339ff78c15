//! Store en mémoire pour les tests.
//!
//! Tables sous Mutex + compteurs d'écriture, afin de vérifier les
//! propriétés de persistance (dédoublonnage, cycles de synchronisation)
//! sans base réelle.

use super::{BeaconRow, HubRow, PairRow, Store};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    hubs: Mutex<Vec<HubRow>>,
    beacons: Mutex<Vec<BeaconRow>>,
    compatibility: Mutex<Vec<(i64, i64)>>,
    pairs: Mutex<Vec<PairRow>>,
    beacon_writes: Mutex<u32>,
    hub_writes: Mutex<u32>,
    fail_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hub(&self, row: HubRow) {
        self.hubs.lock().push(row);
    }

    pub fn add_beacon(&self, row: BeaconRow) {
        self.beacons.lock().push(row);
    }

    pub fn add_compatibility(&self, a: i64, b: i64) {
        self.compatibility.lock().push((a, b));
    }

    pub fn add_pair(&self, row: PairRow) {
        self.pairs.lock().push(row);
    }

    pub fn pairs(&self) -> Vec<PairRow> {
        self.pairs.lock().clone()
    }

    pub fn beacon(&self, id: i64) -> Option<BeaconRow> {
        self.beacons.lock().iter().find(|b| b.id == id).cloned()
    }

    pub fn hub(&self, id: i64) -> Option<HubRow> {
        self.hubs.lock().iter().find(|h| h.id == id).cloned()
    }

    /// Nombre d'écritures beacon effectuées (UPDATE).
    pub fn beacon_write_count(&self) -> u32 {
        *self.beacon_writes.lock()
    }

    pub fn hub_write_count(&self) -> u32 {
        *self.hub_writes.lock()
    }

    /// Simule une panne du store : les écritures échouent tant que le
    /// drapeau est levé, les lectures continuent de répondre.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    fn write_gate(&self) -> Result<(), StoreError> {
        if *self.fail_writes.lock() {
            return Err(StoreError::Sql(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn hub_by_mac(&self, mac: &str) -> Result<Option<HubRow>, StoreError> {
        Ok(self.hubs.lock().iter().find(|h| h.mac == mac).cloned())
    }

    async fn beacon_by_mac(&self, mac: &str) -> Result<Option<BeaconRow>, StoreError> {
        Ok(self.beacons.lock().iter().find(|b| b.mac == mac).cloned())
    }

    async fn load_hubs(&self) -> Result<Vec<HubRow>, StoreError> {
        Ok(self.hubs.lock().clone())
    }

    async fn load_beacons(&self) -> Result<Vec<BeaconRow>, StoreError> {
        Ok(self.beacons.lock().clone())
    }

    async fn load_compatibility(&self) -> Result<Vec<(i64, i64)>, StoreError> {
        Ok(self.compatibility.lock().clone())
    }

    async fn load_pairs(&self) -> Result<Vec<PairRow>, StoreError> {
        Ok(self.pairs.lock().clone())
    }

    async fn update_hub_seen(&self, hub_id: i64, ts: i64) -> Result<(), StoreError> {
        self.write_gate()?;
        *self.hub_writes.lock() += 1;
        if let Some(hub) = self.hubs.lock().iter_mut().find(|h| h.id == hub_id) {
            hub.last_seen = ts;
        }
        Ok(())
    }

    async fn update_beacon(
        &self,
        beacon_id: i64,
        hub_id: i64,
        rssi: i64,
        ts: i64,
        hub_since: i64,
        battery: i64,
    ) -> Result<(), StoreError> {
        self.write_gate()?;
        *self.beacon_writes.lock() += 1;
        if let Some(b) = self.beacons.lock().iter_mut().find(|b| b.id == beacon_id) {
            b.hub_id = Some(hub_id);
            b.rssi = rssi;
            b.report_ts = ts;
            b.hub_since = hub_since;
            b.battery = battery;
        }
        Ok(())
    }

    async fn insert_pair(&self, a: i64, b: i64, hub_id: i64, ts: i64) -> Result<(), StoreError> {
        self.write_gate()?;
        self.pairs.lock().push(PairRow {
            beacon_a: a.min(b),
            beacon_b: a.max(b),
            created_ts: ts,
            hub_id,
        });
        Ok(())
    }

    async fn delete_pair(&self, a: i64, b: i64) -> Result<(), StoreError> {
        self.write_gate()?;
        self.pairs.lock().retain(|p| {
            !(p.beacon_a == a && p.beacon_b == b) && !(p.beacon_a == b && p.beacon_b == a)
        });
        Ok(())
    }
}
