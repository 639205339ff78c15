//! Index symétrique des compatibilités de types de beacons.
//!
//! Chargé au démarrage depuis la relation `type_compatibility` ; le moteur
//! ne crée jamais d'arête lui-même, seul le provisionnement externe en
//! ajoute. La liste par type garde son ordre d'insertion : le matcher
//! parcourt les types compatibles dans cet ordre fixe.

use crate::cache::{get_json, set_json, Cache};
use crate::error::EngineError;
use crate::keys;
use std::sync::Arc;

#[derive(Clone)]
pub struct CompatIndex {
    cache: Arc<dyn Cache>,
}

impl CompatIndex {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Ajoute l'arête dans les deux directions, sans doublon.
    pub async fn insert(&self, type_a: i64, type_b: i64) -> Result<(), EngineError> {
        for (from, to) in [(type_a, type_b), (type_b, type_a)] {
            let key = keys::compat(from);
            let mut allowed: Vec<i64> = get_json(self.cache.as_ref(), &key)
                .await?
                .unwrap_or_default();
            if !allowed.contains(&to) {
                allowed.push(to);
                set_json(self.cache.as_ref(), &key, &allowed, None).await?;
            }
        }
        Ok(())
    }

    /// Types autorisés à s'apparier avec `type_id`, dans l'ordre fixe de
    /// chargement. Vide si aucun partenaire n'est permis.
    pub async fn compatible_types(&self, type_id: i64) -> Result<Vec<i64>, EngineError> {
        Ok(get_json(self.cache.as_ref(), &keys::compat(type_id))
            .await?
            .unwrap_or_default())
    }
}
