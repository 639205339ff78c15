//! Espace de clés du cache partagé entre le moteur et le sweeper.
//!
//! Toute la cohérence inter-process repose sur ces conventions de nommage :
//! les deux binaires doivent produire exactement les mêmes clés.

/// État d'un beacon, par adresse matérielle.
pub fn beacon(mac: &str) -> String {
    format!("beacon:{mac}")
}

/// État d'un hub, par adresse matérielle.
pub fn hub(mac: &str) -> String {
    format!("hub:{mac}")
}

/// Types compatibles d'un type de beacon (liste ordonnée).
pub fn compat(type_id: i64) -> String {
    format!("typemap:{type_id}")
}

/// Ensemble des partenaires appariés d'un beacon.
pub fn adjacency(beacon_id: i64) -> String {
    format!("pairs:{beacon_id}")
}

/// Liste plate de toutes les paires vivantes (clés canoniques),
/// parcourue par le sweeper.
pub const PAIR_INDEX: &str = "pair_index";

/// Demande de pairing en attente à un hub pour un type donné.
pub fn pending(hub_id: i64, type_id: i64) -> String {
    format!("pending:{hub_id}:{type_id}")
}

/// Marque de suspicion, direction ordonnée (from → to).
pub fn critical(from: i64, to: i64) -> String {
    format!("critical:{from}:{to}")
}

/// Clé canonique d'une paire non ordonnée : "min:max".
pub fn pair_key(a: i64, b: i64) -> String {
    format!("{}:{}", a.min(b), a.max(b))
}

/// Relit les deux identifiants d'une clé canonique.
pub fn parse_pair_key(key: &str) -> Option<(i64, i64)> {
    let (a, b) = key.split_once(':')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}
