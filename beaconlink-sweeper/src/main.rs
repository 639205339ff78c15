/**
 * BEACONLINK SWEEPER - Balayage périodique des suspicions de séparation
 *
 * RÔLE : Second processus du système. Parcourt périodiquement l'énumération
 * des paires vivantes et dissout celles dont une marque de suspicion a
 * dépassé l'âge critique sans être levée par le partenaire.
 *
 * Partage le cache et la base avec le moteur, ne consomme aucun message.
 */

use beaconlink_core::cache::{Cache, MemcachedCache};
use beaconlink_core::config::Config;
use beaconlink_core::critical::CriticalMonitor;
use beaconlink_core::exit;
use beaconlink_core::registry::PairRegistry;
use beaconlink_core::store::{MySqlStore, Store};
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

    let registry = PairRegistry::new(cache.clone(), store);
    let monitor = CriticalMonitor::new(cache, registry, cfg.critical_age);
    log::info!("sweeper started, interval {}s", cfg.sweep_interval);

    loop {
        match monitor.sweep().await {
            Ok(0) => log::debug!("sweep pass: nothing to dissolve"),
            Ok(n) => log::info!("sweep pass dissolved {n} pair(s)"),
            // Une passe en échec n'est pas fatale : la suivante reverra les
            // mêmes marques, la dissolution est simplement retardée.
            Err(e) => log::error!("sweep pass failed: {e}"),
        }
        tokio::time::sleep(Duration::from_secs(cfg.sweep_interval)).await;
    }
}
