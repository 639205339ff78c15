/**
 * REGISTRY - Registre des paires confirmées
 *
 * RÔLE : Tient l'adjacence bidirectionnelle des paires (un ensemble de
 * partenaires par beacon), la liste plate des paires vivantes que parcourt
 * le sweeper, et la ligne durable `pair` en base.
 *
 * INVARIANTS : après chaque opération, b ∈ adjacence(a) ⇔ a ∈ adjacence(b),
 * et l'énumération contient exactement une clé canonique par paire vivante.
 *
 * LIMITE CONNUE : ces mises à jour couvrent plusieurs clés du cache sans
 * transaction multi-clés. Le moteur (formation) et le sweeper (dissolution)
 * peuvent s'entrelacer sur un même beacon et perdre une mise à jour ; un
 * correctif demanderait du versionnage optimiste (CAS) côté cache.
 */

use crate::cache::{get_json, set_json, Cache};
use crate::error::EngineError;
use crate::keys;
use crate::store::Store;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct PairRegistry {
    cache: Arc<dyn Cache>,
    store: Arc<dyn Store>,
}

impl PairRegistry {
    pub fn new(cache: Arc<dyn Cache>, store: Arc<dyn Store>) -> Self {
        Self { cache, store }
    }

    /// Forme une paire : adjacence + énumération + ligne durable.
    pub async fn add_pair(&self, a: i64, b: i64, hub_id: i64, ts: i64) -> Result<(), EngineError> {
        self.link(a, b).await?;
        // L'échec d'insertion est journalisé, pas propagé : l'état cache est
        // déjà posé et doit rester correct pendant une panne transitoire.
        if let Err(e) = self.store.insert_pair(a, b, hub_id, ts).await {
            log::error!("failed to persist pair {}: {e}", keys::pair_key(a, b));
        }
        log::info!("pair {} formed at hub {hub_id}", keys::pair_key(a, b));
        Ok(())
    }

    /// Pose la paire dans le cache uniquement (hydratation de paires déjà
    /// en base, ou formation avant insertion).
    pub async fn link(&self, a: i64, b: i64) -> Result<(), EngineError> {
        for (from, to) in [(a, b), (b, a)] {
            let key = keys::adjacency(from);
            let mut partners: BTreeSet<i64> = get_json(self.cache.as_ref(), &key)
                .await?
                .unwrap_or_default();
            if partners.insert(to) {
                set_json(self.cache.as_ref(), &key, &partners, None).await?;
            }
        }

        let mut index: Vec<String> = get_json(self.cache.as_ref(), keys::PAIR_INDEX)
            .await?
            .unwrap_or_default();
        let pair = keys::pair_key(a, b);
        if !index.contains(&pair) {
            index.push(pair);
            set_json(self.cache.as_ref(), keys::PAIR_INDEX, &index, None).await?;
        }
        Ok(())
    }

    /// Dissout une paire : ligne durable, adjacence des deux côtés (clé
    /// supprimée si l'ensemble se vide) et entrée d'énumération.
    pub async fn remove_pair(&self, a: i64, b: i64) -> Result<(), EngineError> {
        if let Err(e) = self.store.delete_pair(a, b).await {
            log::error!("failed to delete pair {} from store: {e}", keys::pair_key(a, b));
        }

        for (from, to) in [(a, b), (b, a)] {
            let key = keys::adjacency(from);
            if let Some(mut partners) =
                get_json::<BTreeSet<i64>>(self.cache.as_ref(), &key).await?
            {
                if partners.remove(&to) {
                    if partners.is_empty() {
                        self.cache.delete(&key).await?;
                    } else {
                        set_json(self.cache.as_ref(), &key, &partners, None).await?;
                    }
                }
            }
        }

        let mut index: Vec<String> = get_json(self.cache.as_ref(), keys::PAIR_INDEX)
            .await?
            .unwrap_or_default();
        let pair = keys::pair_key(a, b);
        let before = index.len();
        index.retain(|k| k != &pair);
        if index.len() != before {
            set_json(self.cache.as_ref(), keys::PAIR_INDEX, &index, None).await?;
        }
        log::info!("pair {} dissolved", pair);
        Ok(())
    }

    /// Partenaires appariés d'un beacon (vide si aucun).
    pub async fn partners(&self, beacon_id: i64) -> Result<BTreeSet<i64>, EngineError> {
        Ok(get_json(self.cache.as_ref(), &keys::adjacency(beacon_id))
            .await?
            .unwrap_or_default())
    }

    /// Instantané de l'énumération des paires vivantes.
    pub async fn enumeration(&self) -> Result<Vec<String>, EngineError> {
        Ok(get_json(self.cache.as_ref(), keys::PAIR_INDEX)
            .await?
            .unwrap_or_default())
    }
}
