/**
 * INGEST - Analyse des messages et pipeline de corrélation
 *
 * RÔLE : Point d'entrée du moteur. Décode la charge utile transport
 * ({time, data} avec data en "clé=valeur" séparés par des virgules),
 * puis enchaîne : vivacité du hub → machine à états du beacon →
 * (bouton pressé) matcher de pairing → (changement de hub) marquage
 * de suspicion.
 *
 * Le transport livre au-moins-une-fois ; l'idempotence est assurée par le
 * dédoublonnage du tracker beacon, pas par le transport.
 */

use crate::beacons::{BeaconTracker, Transition};
use crate::cache::{get_json, set_json, Cache};
use crate::compat::CompatIndex;
use crate::config::Config;
use crate::critical::CriticalMonitor;
use crate::error::EngineError;
use crate::hubs::HubTracker;
use crate::keys;
use crate::models::{BeaconState, HubState, Report};
use crate::pairing::{MatchOutcome, Matcher};
use crate::registry::PairRegistry;
use crate::store::Store;
use serde::Deserialize;
use std::sync::Arc;

/// Charge utile brute du topic d'ingestion.
#[derive(Debug, Deserialize)]
struct RawMessage {
    time: i64,
    data: String,
}

/// Clés reconnues du champ `data`. Tout autre clé est ignorée.
const KEY_HUB_MAC: &str = "MAC_ROOM";
const KEY_BEACON_MAC: &str = "MAC_SENSOR";
const KEY_BATTERY: &str = "BATT";
const KEY_BUTTON: &str = "BUTTON";
const KEY_RSSI: &str = "RSSI";

/// Décode une charge utile transport en rapport structuré.
///
/// Une adresse MAC_ROOM ou MAC_SENSOR absente est un champ requis
/// manquant : le message est malformé et sera jeté.
pub fn parse_report(payload: &[u8]) -> Result<Report, EngineError> {
    let raw: RawMessage = serde_json::from_slice(payload)
        .map_err(|e| EngineError::Malformed(format!("invalid JSON envelope: {e}")))?;

    let mut hub_mac = None;
    let mut beacon_mac = None;
    let mut rssi = 0i64;
    let mut battery = 0i64;
    let mut button = false;
    for part in raw.data.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            KEY_HUB_MAC => hub_mac = Some(value.to_string()),
            KEY_BEACON_MAC => beacon_mac = Some(value.to_string()),
            KEY_RSSI => rssi = parse_int(KEY_RSSI, value)?,
            KEY_BATTERY => battery = parse_int(KEY_BATTERY, value)?,
            KEY_BUTTON => button = parse_int(KEY_BUTTON, value)? == 1,
            _ => {} // clé inconnue, tolérée
        }
    }

    Ok(Report {
        hub_mac: hub_mac
            .ok_or_else(|| EngineError::Malformed("missing MAC_ROOM".into()))?,
        beacon_mac: beacon_mac
            .ok_or_else(|| EngineError::Malformed("missing MAC_SENSOR".into()))?,
        rssi,
        battery,
        button,
        ts: raw.time,
    })
}

fn parse_int(key: &str, value: &str) -> Result<i64, EngineError> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::Malformed(format!("non-integer {key}: {value:?}")))
}

/// Issue du traitement d'un rapport, pour la journalisation du moteur.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Hub non provisionné : message abandonné sans erreur.
    UnknownHub,
    /// Beacon non provisionné : message abandonné sans erreur.
    UnknownBeacon,
    /// Retransmission déjà traitée.
    Duplicate,
    /// Changement de hub rejeté par l'hystérésis.
    Rejected,
    /// État mis à jour, sans pairing ni changement de hub.
    Updated,
    /// Bouton pressé : tentative de pairing et son issue.
    Confirmed(MatchOutcome),
    /// Changement de hub accepté, suspicion marquée.
    Moved,
}

/// Pipeline complet, partagé entre le moteur et les tests.
pub struct Processor {
    cache: Arc<dyn Cache>,
    store: Arc<dyn Store>,
    hubs: HubTracker,
    beacons: BeaconTracker,
    compat: CompatIndex,
    matcher: Matcher,
    monitor: CriticalMonitor,
    registry: PairRegistry,
}

impl Processor {
    pub fn new(cache: Arc<dyn Cache>, store: Arc<dyn Store>, cfg: &Config) -> Self {
        let compat = CompatIndex::new(cache.clone());
        let registry = PairRegistry::new(cache.clone(), store.clone());
        let matcher = Matcher::new(
            cache.clone(),
            compat.clone(),
            registry.clone(),
            cfg.rendezvous_window,
        );
        let monitor = CriticalMonitor::new(cache.clone(), registry.clone(), cfg.critical_age);
        Self {
            hubs: HubTracker::new(cache.clone(), store.clone(), cfg.hub_sync_cycle),
            beacons: BeaconTracker::new(
                cache.clone(),
                store.clone(),
                cfg.beacon_sync_cycle,
                cfg.hub_hysteresis,
            ),
            compat,
            matcher,
            monitor,
            registry,
            cache,
            store,
        }
    }

    /// Précharge le cache depuis la base : état beacon/hub, graphe de
    /// compatibilité et paires existantes. Doit se terminer avant la
    /// consommation du premier rapport ; l'ordre des trois chargements
    /// entre eux est indifférent.
    pub async fn hydrate(&self) -> Result<(), EngineError> {
        let beacons = self.store.load_beacons().await?;
        let beacon_count = beacons.len();
        for row in beacons {
            let key = keys::beacon(&row.mac);
            // Un état déjà en cache plus récent que la base fait foi.
            let keep_cached = get_json::<BeaconState>(self.cache.as_ref(), &key)
                .await?
                .map(|cur| cur.last_report > row.report_ts)
                .unwrap_or(false);
            if keep_cached {
                continue;
            }
            let state = BeaconState {
                id: row.id,
                hub_id: row.hub_id,
                rssi: row.rssi,
                last_report: row.report_ts,
                hub_since: row.hub_since,
                battery: row.battery,
                type_id: row.type_id,
                last_synced: row.report_ts,
            };
            set_json(self.cache.as_ref(), &key, &state, None).await?;
        }

        let hubs = self.store.load_hubs().await?;
        let hub_count = hubs.len();
        for row in hubs {
            let key = keys::hub(&row.mac);
            if get_json::<HubState>(self.cache.as_ref(), &key).await?.is_none() {
                let state = HubState {
                    id: row.id,
                    last_seen: row.last_seen,
                    last_synced: row.last_seen,
                };
                set_json(self.cache.as_ref(), &key, &state, None).await?;
            }
        }

        let edges = self.store.load_compatibility().await?;
        let edge_count = edges.len();
        for (a, b) in edges {
            self.compat.insert(a, b).await?;
        }

        let pairs = self.store.load_pairs().await?;
        let pair_count = pairs.len();
        for pair in pairs {
            self.registry.link(pair.beacon_a, pair.beacon_b).await?;
        }

        log::info!(
            "hydrated {beacon_count} beacons, {hub_count} hubs, \
             {edge_count} compatibility edges, {pair_count} pairs"
        );
        Ok(())
    }

    /// Traite un rapport décodé, un à la fois (aucun pipelining interne :
    /// la contre-pression appartient au transport).
    pub async fn process(&self, report: &Report) -> Result<Outcome, EngineError> {
        let Some(hub_id) = self.hubs.touch(&report.hub_mac, report.ts).await? else {
            return Ok(Outcome::UnknownHub);
        };

        match self.beacons.apply(report, hub_id).await? {
            Transition::Unknown => Ok(Outcome::UnknownBeacon),
            Transition::Duplicate => Ok(Outcome::Duplicate),
            Transition::Rejected => Ok(Outcome::Rejected),
            Transition::First { .. } => Ok(Outcome::Updated),
            Transition::SameHub { beacon } => {
                if report.button {
                    // Sans type provisionné, pas de pairing possible.
                    if let Some(type_id) = beacon.type_id {
                        let outcome = self
                            .matcher
                            .confirm(hub_id, type_id, beacon.id, report.ts)
                            .await?;
                        return Ok(Outcome::Confirmed(outcome));
                    }
                    log::debug!("beacon {} pressed button but has no type", beacon.id);
                }
                Ok(Outcome::Updated)
            }
            Transition::Moved { beacon } => {
                self.monitor
                    .mark_hub_change(beacon.id, hub_id, report.ts)
                    .await?;
                Ok(Outcome::Moved)
            }
        }
    }

    pub fn monitor(&self) -> &CriticalMonitor {
        &self.monitor
    }

    pub fn registry(&self) -> &PairRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::{Config, DbConfig};
    use crate::store::{BeaconRow, HubRow, MemoryStore, PairRow};
    use std::collections::BTreeSet;

    fn test_config() -> Config {
        Config {
            db: DbConfig {
                host: "localhost".into(),
                port: 3306,
                user: "test".into(),
                password: "test".into(),
                database: "test".into(),
            },
            memcache_server: "localhost".into(),
            memcache_port: 11211,
            mqtt: None,
            hub_hysteresis: 300,
            rendezvous_window: 60,
            beacon_sync_cycle: 600,
            hub_sync_cycle: 600,
            critical_age: 30,
            sweep_interval: 60,
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_hub(HubRow { id: 10, mac: "hub-10".into(), last_seen: 0 });
        store.add_hub(HubRow { id: 20, mac: "hub-20".into(), last_seen: 0 });
        store.add_beacon(BeaconRow {
            id: 1,
            mac: "be:ac:01".into(),
            hub_id: None,
            rssi: 0,
            report_ts: 0,
            hub_since: 0,
            battery: 0,
            type_id: Some(1),
        });
        store.add_beacon(BeaconRow {
            id: 2,
            mac: "be:ac:02".into(),
            hub_id: None,
            rssi: 0,
            report_ts: 0,
            hub_since: 0,
            battery: 0,
            type_id: Some(2),
        });
        store.add_compatibility(1, 2);
        store
    }

    async fn setup() -> (Arc<MemoryCache>, Arc<MemoryStore>, Processor) {
        let cache = Arc::new(MemoryCache::new());
        let store = seeded_store();
        let processor = Processor::new(cache.clone(), store.clone(), &test_config());
        processor.hydrate().await.unwrap();
        (cache, store, processor)
    }

    fn payload(ts: i64, data: &str) -> Vec<u8> {
        format!(r#"{{"time": {ts}, "data": "{data}"}}"#).into_bytes()
    }

    #[test]
    fn parses_a_complete_payload() {
        let report = parse_report(&payload(
            1000,
            "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:01, RSSI=50, BATT=80, BUTTON=1",
        ))
        .unwrap();
        assert_eq!(
            report,
            Report {
                hub_mac: "hub-10".into(),
                beacon_mac: "be:ac:01".into(),
                rssi: 50,
                battery: 80,
                button: true,
                ts: 1000,
            }
        );
    }

    #[test]
    fn unknown_keys_are_ignored_and_missing_ints_default_to_zero() {
        let report = parse_report(&payload(
            1000,
            "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:01, FIRMWARE=7",
        ))
        .unwrap();
        assert_eq!(report.rssi, 0);
        assert_eq!(report.battery, 0);
        assert!(!report.button);
    }

    #[test]
    fn missing_mac_or_bad_envelope_is_malformed() {
        assert!(matches!(
            parse_report(&payload(1000, "MAC_ROOM=hub-10, RSSI=50")),
            Err(EngineError::Malformed(_))
        ));
        assert!(matches!(
            parse_report(&payload(1000, "MAC_SENSOR=be:ac:01")),
            Err(EngineError::Malformed(_))
        ));
        assert!(matches!(
            parse_report(b"not json"),
            Err(EngineError::Malformed(_))
        ));
        assert!(matches!(
            parse_report(&payload(1000, "MAC_ROOM=h, MAC_SENSOR=b, RSSI=abc")),
            Err(EngineError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn unknown_hub_or_beacon_is_skipped_without_error() {
        let (_cache, _store, processor) = setup().await;
        let report = parse_report(&payload(1000, "MAC_ROOM=nope, MAC_SENSOR=be:ac:01")).unwrap();
        assert_eq!(processor.process(&report).await.unwrap(), Outcome::UnknownHub);

        let report = parse_report(&payload(1000, "MAC_ROOM=hub-10, MAC_SENSOR=nope")).unwrap();
        assert_eq!(
            processor.process(&report).await.unwrap(),
            Outcome::UnknownBeacon
        );
    }

    #[tokio::test]
    async fn hydration_populates_compat_and_pairs() {
        let cache = Arc::new(MemoryCache::new());
        let store = seeded_store();
        store.add_pair(PairRow { beacon_a: 1, beacon_b: 2, created_ts: 500, hub_id: 10 });
        let processor = Processor::new(cache.clone(), store.clone(), &test_config());
        processor.hydrate().await.unwrap();

        assert_eq!(
            processor.registry().partners(1).await.unwrap(),
            BTreeSet::from([2])
        );
        assert_eq!(
            processor.registry().enumeration().await.unwrap(),
            vec!["1:2"]
        );
        let beacon: BeaconState = get_json(cache.as_ref(), &keys::beacon("be:ac:01"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(beacon.type_id, Some(1));
    }

    #[tokio::test]
    async fn hydration_keeps_fresher_cache_entries() {
        let cache = Arc::new(MemoryCache::new());
        let store = seeded_store();
        let fresher = BeaconState {
            id: 1,
            hub_id: Some(10),
            rssi: 42,
            last_report: 9999,
            hub_since: 9000,
            battery: 50,
            type_id: Some(1),
            last_synced: 9999,
        };
        set_json(cache.as_ref(), &keys::beacon("be:ac:01"), &fresher, None)
            .await
            .unwrap();
        let processor = Processor::new(cache.clone(), store.clone(), &test_config());
        processor.hydrate().await.unwrap();

        let kept: BeaconState = get_json(cache.as_ref(), &keys::beacon("be:ac:01"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept, fresher);
    }

    /// Scénario de bout en bout : affectation, pairing par rendez-vous,
    /// changement de hub, puis dissolution par le balayage.
    #[tokio::test]
    async fn full_lifecycle_pairing_then_dissolution() {
        let (_cache, store, processor) = setup().await;

        // 1. Première affectation du beacon A au hub 10, persistée.
        let r = parse_report(&payload(
            1000,
            "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:01, RSSI=50, BATT=80",
        ))
        .unwrap();
        assert_eq!(processor.process(&r).await.unwrap(), Outcome::Updated);
        assert_eq!(store.beacon(1).unwrap().hub_id, Some(10));

        // 2. Bouton pressé : aucune demande en attente, A dépose la sienne.
        let r = parse_report(&payload(
            1005,
            "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:01, RSSI=60, BATT=80, BUTTON=1",
        ))
        .unwrap();
        assert_eq!(
            processor.process(&r).await.unwrap(),
            Outcome::Confirmed(MatchOutcome::Registered)
        );

        // 3. B confirme au même hub dans la fenêtre : paire formée.
        let r = parse_report(&payload(
            1008,
            "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:02, RSSI=55, BATT=70",
        ))
        .unwrap();
        processor.process(&r).await.unwrap(); // première affectation de B
        let r = parse_report(&payload(
            1010,
            "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:02, RSSI=55, BATT=70, BUTTON=1",
        ))
        .unwrap();
        assert_eq!(
            processor.process(&r).await.unwrap(),
            Outcome::Confirmed(MatchOutcome::Paired { partner: 1 })
        );
        assert_eq!(store.pairs().len(), 1);
        assert_eq!(
            processor.registry().partners(1).await.unwrap(),
            BTreeSet::from([2])
        );

        // 4. A passe au hub 20 avec un signal plus fort : suspicion posée.
        let r = parse_report(&payload(
            2000,
            "MAC_ROOM=hub-20, MAC_SENSOR=be:ac:01, RSSI=70, BATT=80",
        ))
        .unwrap();
        assert_eq!(processor.process(&r).await.unwrap(), Outcome::Moved);

        // 5. Balayage à l'âge 31 > 30 : la paire est dissoute partout.
        assert_eq!(processor.monitor().sweep_at(2031).await.unwrap(), 1);
        assert!(store.pairs().is_empty());
        assert!(processor.registry().partners(1).await.unwrap().is_empty());
        assert!(processor.registry().partners(2).await.unwrap().is_empty());
        assert!(processor.registry().enumeration().await.unwrap().is_empty());
    }

    /// Variante du scénario : le partenaire confirme le même hub avant le
    /// seuil, la paire survit aux balayages suivants.
    #[tokio::test]
    async fn partner_confirmation_preserves_the_pair() {
        let (_cache, store, processor) = setup().await;
        for (ts, data) in [
            (1000, "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:01, RSSI=50, BATT=80"),
            (1005, "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:01, RSSI=60, BATT=80, BUTTON=1"),
            (1008, "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:02, RSSI=55, BATT=70"),
            (1010, "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:02, RSSI=55, BATT=70, BUTTON=1"),
            (2000, "MAC_ROOM=hub-20, MAC_SENSOR=be:ac:01, RSSI=70, BATT=80"),
            // B rejoint le hub 20 à l'âge 15 <= 30 : suspicion levée.
            (2015, "MAC_ROOM=hub-20, MAC_SENSOR=be:ac:02, RSSI=65, BATT=70"),
        ] {
            processor
                .process(&parse_report(&payload(ts, data)).unwrap())
                .await
                .unwrap();
        }

        assert_eq!(processor.monitor().sweep_at(2031).await.unwrap(), 0);
        assert_eq!(processor.monitor().sweep_at(3000).await.unwrap(), 0);
        assert_eq!(store.pairs().len(), 1);
        assert_eq!(
            processor.registry().partners(2).await.unwrap(),
            BTreeSet::from([1])
        );
    }

    /// Réingestion du même rapport : aucune mutation, aucune écriture.
    #[tokio::test]
    async fn reingestion_is_idempotent() {
        let (cache, store, processor) = setup().await;
        let r = parse_report(&payload(
            1000,
            "MAC_ROOM=hub-10, MAC_SENSOR=be:ac:01, RSSI=50, BATT=80",
        ))
        .unwrap();
        processor.process(&r).await.unwrap();
        let writes = store.beacon_write_count();
        let before: BeaconState = get_json(cache.as_ref(), &keys::beacon("be:ac:01"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(processor.process(&r).await.unwrap(), Outcome::Duplicate);
        assert_eq!(store.beacon_write_count(), writes);
        let after: BeaconState = get_json(cache.as_ref(), &keys::beacon("be:ac:01"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after, before);
    }
}
