/**
 * BEACONS - Machine à états d'affectation beacon → hub
 *
 * RÔLE : Tient l'état courant de chaque beacon (hub, RSSI, batterie,
 * horodatages) et décide du sort de chaque rapport : première affectation,
 * mise à jour sur place, changement de hub, doublon ou bruit.
 *
 * RÈGLES :
 * - doublon : timestamp identique au dernier rapport → aucune mutation ;
 * - même hub : cache mis à jour, base au plus une fois par cycle ;
 * - autre hub : accepté si RSSI strictement meilleur OU silence plus long
 *   que la fenêtre d'hystérésis, sinon ignoré comme bruit.
 *
 * Les échecs d'écriture en base sont journalisés ; le cache est toujours
 * mis à jour pour rester correct pendant une panne transitoire du store.
 * `last_synced` n'avance que sur écriture réussie : un échec laisse le
 * prochain rapport retenter la persistance.
 */

use crate::cache::{get_json, set_json, Cache};
use crate::error::{EngineError, StoreError};
use crate::keys;
use crate::models::{BeaconState, Report};
use crate::store::Store;
use std::sync::Arc;

/// Issue d'un rapport appliqué à la machine à états.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Adresse inconnue du cache et de la base : équipement étranger.
    Unknown,
    /// Rapport déjà traité (retransmission at-least-once).
    Duplicate,
    /// Première affectation à un hub.
    First { beacon: BeaconState },
    /// Mise à jour sans changement de hub.
    SameHub { beacon: BeaconState },
    /// Changement de hub accepté.
    Moved { beacon: BeaconState },
    /// Changement de hub rejeté par l'hystérésis (bruit).
    Rejected,
}

pub struct BeaconTracker {
    cache: Arc<dyn Cache>,
    store: Arc<dyn Store>,
    sync_cycle: i64,
    hysteresis: i64,
}

impl BeaconTracker {
    pub fn new(
        cache: Arc<dyn Cache>,
        store: Arc<dyn Store>,
        sync_cycle: i64,
        hysteresis: i64,
    ) -> Self {
        Self {
            cache,
            store,
            sync_cycle,
            hysteresis,
        }
    }

    pub async fn apply(&self, report: &Report, hub_id: i64) -> Result<Transition, EngineError> {
        let key = keys::beacon(&report.beacon_mac);
        let mut state = match get_json::<BeaconState>(self.cache.as_ref(), &key).await? {
            Some(state) => state,
            None => match self.store.beacon_by_mac(&report.beacon_mac).await? {
                Some(row) => {
                    // Beacon provisionné après le démarrage : on le charge
                    // depuis la base et on l'installe dans le cache.
                    let state = BeaconState {
                        id: row.id,
                        hub_id: row.hub_id,
                        rssi: row.rssi,
                        last_report: row.report_ts,
                        hub_since: row.hub_since,
                        battery: row.battery,
                        type_id: row.type_id,
                        last_synced: report.ts,
                    };
                    set_json(self.cache.as_ref(), &key, &state, None).await?;
                    state
                }
                None => {
                    log::debug!("unknown beacon {}, report dropped", report.beacon_mac);
                    return Ok(Transition::Unknown);
                }
            },
        };

        if report.ts == state.last_report {
            log::debug!(
                "duplicate report for beacon {} at ts {}",
                state.id,
                report.ts
            );
            return Ok(Transition::Duplicate);
        }

        match state.hub_id {
            None => {
                state.hub_id = Some(hub_id);
                state.rssi = report.rssi;
                state.battery = report.battery;
                state.last_report = report.ts;
                state.hub_since = report.ts;
                match self.persist(&state).await {
                    Ok(()) => state.last_synced = report.ts,
                    Err(e) => log::error!("failed to persist beacon {}: {e}", state.id),
                }
                set_json(self.cache.as_ref(), &key, &state, None).await?;
                log::info!("beacon {} first seen at hub {hub_id}", state.id);
                Ok(Transition::First { beacon: state })
            }
            Some(current) if current == hub_id => {
                state.rssi = report.rssi;
                state.battery = report.battery;
                state.last_report = report.ts;
                if state.last_synced + self.sync_cycle < report.ts {
                    match self.persist(&state).await {
                        Ok(()) => state.last_synced = report.ts,
                        Err(e) => log::error!("failed to persist beacon {}: {e}", state.id),
                    }
                }
                set_json(self.cache.as_ref(), &key, &state, None).await?;
                Ok(Transition::SameHub { beacon: state })
            }
            Some(current) => {
                let stronger = report.rssi > state.rssi;
                let gap_elapsed = state.last_report + self.hysteresis < report.ts;
                if !(stronger || gap_elapsed) {
                    log::debug!(
                        "beacon {} change {current} -> {hub_id} rejected (rssi {} <= {}, within gap)",
                        state.id,
                        report.rssi,
                        state.rssi
                    );
                    return Ok(Transition::Rejected);
                }
                state.hub_id = Some(hub_id);
                state.rssi = report.rssi;
                state.battery = report.battery;
                state.last_report = report.ts;
                state.hub_since = report.ts;
                match self.persist(&state).await {
                    Ok(()) => state.last_synced = report.ts,
                    Err(e) => log::error!("failed to persist beacon {}: {e}", state.id),
                }
                set_json(self.cache.as_ref(), &key, &state, None).await?;
                log::info!("beacon {} moved {current} -> {hub_id}", state.id);
                Ok(Transition::Moved { beacon: state })
            }
        }
    }

    /// Écrit l'état complet en base. L'appelant n'avance `last_synced` que
    /// si l'écriture a réussi.
    async fn persist(&self, state: &BeaconState) -> Result<(), StoreError> {
        let hub_id = match state.hub_id {
            Some(id) => id,
            None => return Ok(()),
        };
        self.store
            .update_beacon(
                state.id,
                hub_id,
                state.rssi,
                state.last_report,
                state.hub_since,
                state.battery,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::{BeaconRow, MemoryStore};

    const SYNC_CYCLE: i64 = 600;
    const HYSTERESIS: i64 = 300;

    fn setup() -> (Arc<MemoryCache>, Arc<MemoryStore>, BeaconTracker) {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        store.add_beacon(BeaconRow {
            id: 1,
            mac: "cc:dd".into(),
            hub_id: None,
            rssi: 0,
            report_ts: 0,
            hub_since: 0,
            battery: 0,
            type_id: Some(1),
        });
        let tracker = BeaconTracker::new(cache.clone(), store.clone(), SYNC_CYCLE, HYSTERESIS);
        (cache, store, tracker)
    }

    fn report(hub_mac: &str, rssi: i64, ts: i64) -> Report {
        Report {
            hub_mac: hub_mac.into(),
            beacon_mac: "cc:dd".into(),
            rssi,
            battery: 80,
            button: false,
            ts,
        }
    }

    async fn cached(cache: &MemoryCache) -> BeaconState {
        get_json(cache, &keys::beacon("cc:dd")).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn first_assignment_persists_immediately() {
        let (cache, store, tracker) = setup();
        let t = tracker.apply(&report("h", 50, 1000), 10).await.unwrap();
        assert!(matches!(t, Transition::First { .. }));
        assert_eq!(store.beacon_write_count(), 1);
        let state = cached(&cache).await;
        assert_eq!(state.hub_id, Some(10));
        assert_eq!(state.hub_since, 1000);
        assert_eq!(store.beacon(1).unwrap().hub_id, Some(10));
    }

    #[tokio::test]
    async fn duplicate_report_never_mutates_nor_writes() {
        let (cache, store, tracker) = setup();
        tracker.apply(&report("h", 50, 1000), 10).await.unwrap();
        let before = cached(&cache).await;
        let writes = store.beacon_write_count();

        let t = tracker.apply(&report("h", 99, 1000), 10).await.unwrap();
        assert_eq!(t, Transition::Duplicate);
        assert_eq!(cached(&cache).await, before);
        assert_eq!(store.beacon_write_count(), writes);
    }

    #[tokio::test]
    async fn same_hub_update_respects_sync_cycle() {
        let (cache, store, tracker) = setup();
        tracker.apply(&report("h", 50, 1000), 10).await.unwrap();
        assert_eq!(store.beacon_write_count(), 1);

        // Dans le cycle : cache seul.
        tracker.apply(&report("h", 55, 1200), 10).await.unwrap();
        assert_eq!(store.beacon_write_count(), 1);
        assert_eq!(cached(&cache).await.rssi, 55);
        assert_eq!(cached(&cache).await.last_synced, 1000);

        // Cycle dépassé : écriture base et avance de last_synced.
        tracker.apply(&report("h", 60, 1700), 10).await.unwrap();
        assert_eq!(store.beacon_write_count(), 2);
        assert_eq!(cached(&cache).await.last_synced, 1700);
    }

    #[tokio::test]
    async fn weaker_signal_change_within_window_is_rejected() {
        let (cache, _store, tracker) = setup();
        tracker.apply(&report("h", 50, 1000), 10).await.unwrap();
        let t = tracker.apply(&report("h2", 40, 1100), 20).await.unwrap();
        assert_eq!(t, Transition::Rejected);
        assert_eq!(cached(&cache).await.hub_id, Some(10));
    }

    #[tokio::test]
    async fn stronger_signal_change_is_accepted_immediately() {
        let (cache, store, tracker) = setup();
        tracker.apply(&report("h", 50, 1000), 10).await.unwrap();
        let t = tracker.apply(&report("h2", 60, 1100), 20).await.unwrap();
        assert!(matches!(t, Transition::Moved { .. }));
        let state = cached(&cache).await;
        assert_eq!(state.hub_id, Some(20));
        assert_eq!(state.hub_since, 1100);
        assert_eq!(store.beacon(1).unwrap().hub_id, Some(20));
    }

    #[tokio::test]
    async fn equal_signal_change_waits_for_hysteresis() {
        let (cache, _store, tracker) = setup();
        tracker.apply(&report("h", 50, 1000), 10).await.unwrap();

        // Même RSSI dans la fenêtre : rejeté.
        let t = tracker.apply(&report("h2", 50, 1200), 20).await.unwrap();
        assert_eq!(t, Transition::Rejected);

        // Même RSSI après la fenêtre : accepté.
        let t = tracker.apply(&report("h2", 50, 1400), 20).await.unwrap();
        assert!(matches!(t, Transition::Moved { .. }));
        assert_eq!(cached(&cache).await.hub_id, Some(20));
    }

    #[tokio::test]
    async fn failed_persist_leaves_last_synced_for_retry() {
        let (cache, store, tracker) = setup();
        tracker.apply(&report("h", 50, 1000), 10).await.unwrap();
        assert_eq!(store.beacon_write_count(), 1);

        // Panne du store au moment où le cycle impose une écriture : le
        // cache est mis à jour mais last_synced ne bouge pas.
        store.set_fail_writes(true);
        tracker.apply(&report("h", 60, 1700), 10).await.unwrap();
        let state = cached(&cache).await;
        assert_eq!(state.rssi, 60);
        assert_eq!(state.last_synced, 1000);
        assert_eq!(store.beacon_write_count(), 1);
        assert_eq!(store.beacon(1).unwrap().rssi, 50);

        // Store rétabli : le rapport suivant retente immédiatement au lieu
        // d'attendre un cycle complet.
        store.set_fail_writes(false);
        tracker.apply(&report("h", 61, 1800), 10).await.unwrap();
        assert_eq!(store.beacon_write_count(), 2);
        assert_eq!(store.beacon(1).unwrap().rssi, 61);
        assert_eq!(cached(&cache).await.last_synced, 1800);
    }

    #[tokio::test]
    async fn unknown_beacon_is_dropped() {
        let (_cache, _store, tracker) = setup();
        let mut r = report("h", 50, 1000);
        r.beacon_mac = "no:pe".into();
        assert_eq!(tracker.apply(&r, 10).await.unwrap(), Transition::Unknown);
    }
}
