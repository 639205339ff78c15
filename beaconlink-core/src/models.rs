use serde::{Deserialize, Serialize};

/// État courant d'un hub, stocké dans le cache sous sa MAC.
///
/// La ligne `hub` correspondante est provisionnée en amont ; le moteur ne
/// crée ni ne supprime jamais de hub, il rafraîchit seulement `last_seen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubState {
    pub id: i64,
    /// Dernière observation (timestamp unix du message).
    pub last_seen: i64,
    /// Dernière écriture de `last_seen` en base (limite l'amplification).
    pub last_synced: i64,
}

/// État courant d'un beacon, stocké dans le cache sous sa MAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconState {
    pub id: i64,
    /// Hub d'affectation courant ; None tant que jamais observé.
    pub hub_id: Option<i64>,
    /// Dernier RSSI accepté, comparé lors des changements de hub.
    pub rssi: i64,
    /// Timestamp du dernier rapport accepté (sert aussi au dédoublonnage).
    pub last_report: i64,
    /// Début de l'affectation au hub courant.
    pub hub_since: i64,
    pub battery: i64,
    /// Catégorie du beacon ; None tant que non provisionné, exclut le pairing.
    pub type_id: Option<i64>,
    /// Dernière synchronisation complète vers la base.
    pub last_synced: i64,
}

/// Rapport de proximité extrait d'un message transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub hub_mac: String,
    pub beacon_mac: String,
    pub rssi: i64,
    pub battery: i64,
    pub button: bool,
    pub ts: i64,
}

/// Demande de pairing en attente, clé (hub, type) dans le cache.
///
/// Auto-expirante : posée avec un TTL égal à la fenêtre de rendez-vous. Le
/// timestamp reste vérifié explicitement côté matcher, le TTL du cache
/// n'étant qu'un filet de sécurité.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub beacon_id: i64,
    pub ts: i64,
}

/// Marque de suspicion sur une paire, clé ordonnée (from, to) dans le cache.
///
/// Posée quand un des deux beacons change de hub ; levée si le partenaire
/// confirme le même hub ; dissout la paire si elle vieillit au-delà du
/// seuil critique sans confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalMark {
    pub ts: i64,
    pub hub_id: i64,
}
