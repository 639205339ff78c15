/**
 * BEACONLINK ENGINE - Moteur de corrélation des rapports de proximité
 *
 * RÔLE : Consomme le topic MQTT des hubs, maintient l'état d'affectation
 * des beacons, forme les paires par rendez-vous et pose les marques de
 * suspicion. Un seul consommateur ; la dissolution périodique appartient
 * au sweeper.
 *
 * DÉMARRAGE : config → cache joignable → base joignable → hydratation →
 * boucle MQTT. Tout prérequis manquant termine le processus avec le code
 * de sortie dédié, la supervision se charge du redémarrage.
 */

use beaconlink_core::cache::{Cache, MemcachedCache};
use beaconlink_core::config::{Config, MqttConfig};
use beaconlink_core::exit;
use beaconlink_core::ingest::{parse_report, Outcome, Processor};
use beaconlink_core::store::{self, MySqlStore, Store};
use rumqttc::{AsyncClient, Event, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("configuration error: {e}");
            std::process::exit(exit::BAD_CONFIG);
        }
    };
    let Some(mqtt_cfg) = cfg.mqtt.clone() else {
        log::error!("configuration error: MQTT_SERVER is required for the engine");
        std::process::exit(exit::BAD_CONFIG);
    };

    let cache: Arc<dyn Cache> = Arc::new(MemcachedCache::new(cfg.memcache_addr()));
    if let Err(e) = cache.ping().await {
        log::error!("cache {} unreachable: {e}", cfg.memcache_addr());
        std::process::exit(exit::CACHE_UNREACHABLE);
    }

    let store: Arc<dyn Store> = match MySqlStore::connect(&cfg.db).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("store {} unreachable: {e}", cfg.db.host);
            std::process::exit(exit::STORE_UNREACHABLE);
        }
    };

    let processor = Processor::new(cache, store.clone(), &cfg);
    if let Err(e) = processor.hydrate().await {
        log::error!("hydration failed: {e}");
        std::process::exit(exit::STORE_UNREACHABLE);
    }

    let mut opts = MqttOptions::new("beaconlink-engine", &mqtt_cfg.server, mqtt_cfg.port);
    opts.set_keep_alive(Duration::from_secs(15));
    if let Some((user, password)) = credentials(&mqtt_cfg) {
        opts.set_credentials(user, password);
    }
    let (client, mut eventloop) = AsyncClient::new(opts, 10);
    if let Err(e) = client.subscribe(&mqtt_cfg.topic, QoS::AtLeastOnce).await {
        log::error!("MQTT subscribe failed: {e:?}");
        std::process::exit(exit::BAD_CONFIG);
    }
    log::info!(
        "engine started, consuming {} on {}:{}",
        mqtt_cfg.topic,
        mqtt_cfg.server,
        mqtt_cfg.port
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(rumqttc::Incoming::Publish(p))) if p.topic == mqtt_cfg.topic => {
                // La base doit répondre avant de toucher à l'état : sinon on
                // attend, et au-delà de la borne on laisse la supervision
                // relancer le processus.
                if store::await_available(store.as_ref()).await.is_err() {
                    std::process::exit(exit::STORE_RETRIES_EXHAUSTED);
                }
                handle_message(&processor, &p.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("MQTT connection error: {e:?}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Identifiants du broker : appliqués dès qu'un utilisateur est configuré,
/// même sans mot de passe (certains brokers authentifient par nom seul).
fn credentials(cfg: &MqttConfig) -> Option<(String, String)> {
    cfg.user
        .as_ref()
        .map(|user| (user.clone(), cfg.password.clone().unwrap_or_default()))
}

async fn handle_message(processor: &Processor, payload: &[u8]) {
    let report = match parse_report(payload) {
        Ok(report) => report,
        Err(e) => {
            log::warn!("malformed message dropped: {e}");
            return;
        }
    };
    match processor.process(&report).await {
        Ok(Outcome::UnknownHub) => {
            log::debug!("report from unprovisioned hub {}, dropped", report.hub_mac)
        }
        Ok(Outcome::UnknownBeacon) => {
            log::debug!("report for unprovisioned beacon {}, dropped", report.beacon_mac)
        }
        Ok(Outcome::Duplicate) => {
            log::debug!("duplicate report for beacon {}, ignored", report.beacon_mac)
        }
        Ok(Outcome::Rejected) => {
            log::debug!("hub change for beacon {} rejected", report.beacon_mac)
        }
        Ok(Outcome::Updated) => {}
        Ok(Outcome::Confirmed(outcome)) => {
            log::debug!("pairing attempt by beacon {}: {outcome:?}", report.beacon_mac)
        }
        Ok(Outcome::Moved) => {
            log::debug!("beacon {} changed hub, suspicion marked", report.beacon_mac)
        }
        // Une erreur de cache ou de base sur un message n'arrête pas la
        // boucle : le transport relivrera, l'état cache reste cohérent.
        Err(e) => log::error!("error while processing report: {e}"),
    }
}
