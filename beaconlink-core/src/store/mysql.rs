//! Implémentation MySQL du store via sqlx.
//!
//! Requêtes simples avec binds `?` ; le mapping ligne → struct est manuel
//! (Row::try_get), le schéma étant géré en dehors de ce dépôt.

use super::{BeaconRow, HubRow, PairRow, Store};
use crate::config::DbConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Établit le pool (une connexion ouverte immédiatement : l'échec de
    /// connexion doit être fatal au démarrage, pas au premier message).
    pub async fn connect(cfg: &DbConfig) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .connect(&cfg.url())
            .await?;
        Ok(Self { pool })
    }
}

fn hub_row(row: &MySqlRow) -> Result<HubRow, sqlx::Error> {
    Ok(HubRow {
        id: row.try_get("id")?,
        mac: row.try_get("hw_address")?,
        last_seen: row.try_get("last_seen_ts")?,
    })
}

fn beacon_row(row: &MySqlRow) -> Result<BeaconRow, sqlx::Error> {
    Ok(BeaconRow {
        id: row.try_get("id")?,
        mac: row.try_get("hw_address")?,
        hub_id: row.try_get("hub_id")?,
        rssi: row.try_get("rssi")?,
        report_ts: row.try_get("report_ts")?,
        hub_since: row.try_get("hub_assignment_start_ts")?,
        battery: row.try_get("battery")?,
        type_id: row.try_get("type_id")?,
    })
}

#[async_trait]
impl Store for MySqlStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn hub_by_mac(&self, mac: &str) -> Result<Option<HubRow>, StoreError> {
        let row = sqlx::query("SELECT id, hw_address, last_seen_ts FROM hub WHERE hw_address = ?")
            .bind(mac)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(hub_row).transpose()?)
    }

    async fn beacon_by_mac(&self, mac: &str) -> Result<Option<BeaconRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, hw_address, hub_id, rssi, report_ts, \
             hub_assignment_start_ts, battery, type_id \
             FROM beacon WHERE hw_address = ?",
        )
        .bind(mac)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(beacon_row).transpose()?)
    }

    async fn load_hubs(&self) -> Result<Vec<HubRow>, StoreError> {
        let rows = sqlx::query("SELECT id, hw_address, last_seen_ts FROM hub")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(hub_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn load_beacons(&self) -> Result<Vec<BeaconRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, hw_address, hub_id, rssi, report_ts, \
             hub_assignment_start_ts, battery, type_id FROM beacon",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(beacon_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn load_compatibility(&self) -> Result<Vec<(i64, i64)>, StoreError> {
        let rows = sqlx::query("SELECT type_a, type_b FROM type_compatibility")
            .fetch_all(&self.pool)
            .await?;
        let mut edges = Vec::with_capacity(rows.len());
        for row in &rows {
            edges.push((row.try_get("type_a")?, row.try_get("type_b")?));
        }
        Ok(edges)
    }

    async fn load_pairs(&self) -> Result<Vec<PairRow>, StoreError> {
        let rows =
            sqlx::query("SELECT beacon_id_1, beacon_id_2, created_ts, hub_id FROM pair")
                .fetch_all(&self.pool)
                .await?;
        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            pairs.push(PairRow {
                beacon_a: row.try_get("beacon_id_1")?,
                beacon_b: row.try_get("beacon_id_2")?,
                created_ts: row.try_get("created_ts")?,
                hub_id: row.try_get("hub_id")?,
            });
        }
        Ok(pairs)
    }

    async fn update_hub_seen(&self, hub_id: i64, ts: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE hub SET last_seen_ts = ? WHERE id = ?")
            .bind(ts)
            .bind(hub_id)
            .execute(&self.pool)
            .await?;
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
        sqlx::query(
            "UPDATE beacon SET hub_id = ?, rssi = ?, report_ts = ?, \
             hub_assignment_start_ts = ?, battery = ? WHERE id = ?",
        )
        .bind(hub_id)
        .bind(rssi)
        .bind(ts)
        .bind(hub_since)
        .bind(battery)
        .bind(beacon_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_pair(&self, a: i64, b: i64, hub_id: i64, ts: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO pair (beacon_id_1, beacon_id_2, created_ts, hub_id) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(a.min(b))
        .bind(a.max(b))
        .bind(ts)
        .bind(hub_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_pair(&self, a: i64, b: i64) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM pair WHERE (beacon_id_1 = ? AND beacon_id_2 = ?) \
             OR (beacon_id_1 = ? AND beacon_id_2 = ?)",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
