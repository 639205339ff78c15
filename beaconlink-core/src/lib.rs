/**
 * BEACONLINK CORE - Bibliothèque partagée du moteur de corrélation
 *
 * RÔLE : Modèle de données, interface cache, store durable et pipeline de
 * traitement partagés entre le moteur (beaconlink-engine) et le processus
 * de balayage (beaconlink-sweeper).
 *
 * ARCHITECTURE : Deux processus indépendants partagent un memcached et une
 * base MySQL. Le cache est modélisé comme un service externe derrière une
 * interface étroite get/set/delete ; aucune mémoire partagée in-process.
 */

pub mod beacons;
pub mod cache;
pub mod compat;
pub mod config;
pub mod critical;
pub mod error;
pub mod hubs;
pub mod ingest;
pub mod keys;
pub mod models;
pub mod pairing;
pub mod registry;
pub mod store;

/// Codes retour consommés par la supervision externe (systemd, etc.).
pub mod exit {
    /// Memcached injoignable au démarrage.
    pub const CACHE_UNREACHABLE: i32 = 50;
    /// Base de données injoignable au démarrage.
    pub const STORE_UNREACHABLE: i32 = 1;
    /// Reconnexions à la base épuisées en régime permanent.
    pub const STORE_RETRIES_EXHAUSTED: i32 = 51;
    /// Configuration invalide ou incomplète.
    pub const BAD_CONFIG: i32 = 2;
}
