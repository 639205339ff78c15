/**
 * CRITICAL - Suspicion de séparation et balayage périodique
 *
 * RÔLE : Protocole en deux phases gouvernant la durée de vie des paires.
 * Phase 1 (marquage, côté moteur) : le changement de hub d'un beacon pose
 * une marque de suspicion sur chacune de ses paires ; le partenaire lève la
 * marque en confirmant le même hub. Phase 2 (balayage, côté sweeper) :
 * toute marque plus vieille que le seuil critique dissout la paire.
 *
 * L'âge des marques est vérifié explicitement à la lecture plutôt que par
 * TTL passif : la dissolution a des effets de bord (nettoyage du registre,
 * suppression en base) qu'une expiration silencieuse ne déclencherait pas.
 */

use crate::cache::{get_json, set_json, Cache};
use crate::error::EngineError;
use crate::keys;
use crate::models::CriticalMark;
use crate::registry::PairRegistry;
use std::sync::Arc;
use time::OffsetDateTime;

pub struct CriticalMonitor {
    cache: Arc<dyn Cache>,
    registry: PairRegistry,
    critical_age: i64,
}

impl CriticalMonitor {
    pub fn new(cache: Arc<dyn Cache>, registry: PairRegistry, critical_age: i64) -> Self {
        Self {
            cache,
            registry,
            critical_age,
        }
    }

    /// Phase de marquage : le beacon `beacon_id` vient d'être accepté sur
    /// `new_hub`. Pour chaque partenaire, une direction de marque au plus
    /// subsiste après l'appel.
    pub async fn mark_hub_change(
        &self,
        beacon_id: i64,
        new_hub: i64,
        ts: i64,
    ) -> Result<(), EngineError> {
        let partners = self.registry.partners(beacon_id).await?;
        if partners.is_empty() {
            log::debug!("beacon {beacon_id} has no pairs, nothing to mark");
            return Ok(());
        }

        for partner in partners {
            let inbound = keys::critical(partner, beacon_id);
            let outbound = keys::critical(beacon_id, partner);
            let mark_in = get_json::<CriticalMark>(self.cache.as_ref(), &inbound).await?;
            let mark_out = get_json::<CriticalMark>(self.cache.as_ref(), &outbound).await?;

            match (mark_in, mark_out) {
                (Some(mark), _) if mark.hub_id == new_hub => {
                    // Le partenaire avait signalé ce hub : les deux beacons
                    // se retrouvent, la suspicion est levée.
                    self.cache.delete(&inbound).await?;
                    self.cache.delete(&outbound).await?;
                    log::info!("pair ({partner},{beacon_id}) reunited at hub {new_hub}");
                }
                (Some(_), _) => {
                    // Les deux ont bougé vers des hubs différents : la
                    // preuve la plus récente remplace l'ancienne direction.
                    set_json(
                        self.cache.as_ref(),
                        &outbound,
                        &CriticalMark { ts, hub_id: new_hub },
                        None,
                    )
                    .await?;
                    self.cache.delete(&inbound).await?;
                }
                (None, Some(mark)) if mark.hub_id == new_hub => {
                    self.cache.delete(&inbound).await?;
                    self.cache.delete(&outbound).await?;
                    log::info!("pair ({beacon_id},{partner}) reunited at hub {new_hub}");
                }
                (None, Some(_)) => {
                    set_json(
                        self.cache.as_ref(),
                        &inbound,
                        &CriticalMark { ts, hub_id: new_hub },
                        None,
                    )
                    .await?;
                    self.cache.delete(&outbound).await?;
                }
                (None, None) => {
                    // Première preuve d'une séparation possible.
                    set_json(
                        self.cache.as_ref(),
                        &outbound,
                        &CriticalMark { ts, hub_id: new_hub },
                        None,
                    )
                    .await?;
                    log::debug!(
                        "suspicion raised on pair ({beacon_id},{partner}), hub {new_hub}"
                    );
                }
            }
        }
        Ok(())
    }

    /// Phase de balayage : parcourt un instantané de l'énumération pris en
    /// début de passe et dissout chaque paire dont une marque dépasse le
    /// seuil critique. Retourne le nombre de paires dissoutes.
    pub async fn sweep(&self) -> Result<u32, EngineError> {
        self.sweep_at(OffsetDateTime::now_utc().unix_timestamp())
            .await
    }

    pub async fn sweep_at(&self, now: i64) -> Result<u32, EngineError> {
        let snapshot = self.registry.enumeration().await?;
        let mut dissolved = 0u32;
        for entry in snapshot {
            let Some((a, b)) = keys::parse_pair_key(&entry) else {
                log::warn!("malformed enumeration entry {entry:?}, skipped");
                continue;
            };
            let forward = keys::critical(a, b);
            let backward = keys::critical(b, a);
            let stale = |mark: &Option<CriticalMark>| {
                mark.as_ref().map(|m| now - m.ts > self.critical_age).unwrap_or(false)
            };
            let mark_fwd = get_json::<CriticalMark>(self.cache.as_ref(), &forward).await?;
            let mark_bwd = get_json::<CriticalMark>(self.cache.as_ref(), &backward).await?;
            if stale(&mark_fwd) || stale(&mark_bwd) {
                self.registry.remove_pair(a, b).await?;
                self.cache.delete(&forward).await?;
                self.cache.delete(&backward).await?;
                dissolved += 1;
                log::info!("pair {entry} dissolved: suspicion unresolved past {}s", self.critical_age);
            }
        }
        Ok(dissolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryStore;

    const CRITICAL_AGE: i64 = 30;

    async fn setup_with_pair() -> (Arc<MemoryCache>, Arc<MemoryStore>, CriticalMonitor) {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        let registry = PairRegistry::new(cache.clone(), store.clone());
        registry.add_pair(1, 2, 10, 1010).await.unwrap();
        let monitor = CriticalMonitor::new(cache.clone(), registry, CRITICAL_AGE);
        (cache, store, monitor)
    }

    async fn mark(cache: &MemoryCache, from: i64, to: i64) -> Option<CriticalMark> {
        get_json(cache, &keys::critical(from, to)).await.unwrap()
    }

    #[tokio::test]
    async fn hub_change_raises_suspicion() {
        let (cache, _store, monitor) = setup_with_pair().await;
        monitor.mark_hub_change(1, 20, 2000).await.unwrap();
        assert_eq!(
            mark(&cache, 1, 2).await,
            Some(CriticalMark { ts: 2000, hub_id: 20 })
        );
        assert_eq!(mark(&cache, 2, 1).await, None);
    }

    #[tokio::test]
    async fn partner_confirming_same_hub_clears_suspicion() {
        let (cache, _store, monitor) = setup_with_pair().await;
        monitor.mark_hub_change(1, 20, 2000).await.unwrap();
        monitor.mark_hub_change(2, 20, 2015).await.unwrap();
        assert_eq!(mark(&cache, 1, 2).await, None);
        assert_eq!(mark(&cache, 2, 1).await, None);
    }

    #[tokio::test]
    async fn diverging_hubs_keep_only_the_latest_direction() {
        let (cache, _store, monitor) = setup_with_pair().await;
        monitor.mark_hub_change(1, 20, 2000).await.unwrap();
        // Le partenaire part ailleurs : la preuve la plus récente remplace
        // l'ancienne, une seule direction subsiste.
        monitor.mark_hub_change(2, 30, 2010).await.unwrap();
        assert_eq!(mark(&cache, 1, 2).await, None);
        assert_eq!(
            mark(&cache, 2, 1).await,
            Some(CriticalMark { ts: 2010, hub_id: 30 })
        );
    }

    #[tokio::test]
    async fn unpaired_beacon_marks_nothing() {
        let (cache, _store, monitor) = setup_with_pair().await;
        monitor.mark_hub_change(9, 20, 2000).await.unwrap();
        assert_eq!(mark(&cache, 9, 1).await, None);
        assert_eq!(cache.get(&keys::critical(9, 2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sweep_dissolves_pair_past_critical_age() {
        let (cache, store, monitor) = setup_with_pair().await;
        monitor.mark_hub_change(1, 20, 2000).await.unwrap();

        // Âge 31 > 30 : dissolution.
        let dissolved = monitor.sweep_at(2031).await.unwrap();
        assert_eq!(dissolved, 1);
        assert!(store.pairs().is_empty());
        assert_eq!(mark(&cache, 1, 2).await, None);
        let registry = PairRegistry::new(cache.clone(), store.clone());
        assert!(registry.enumeration().await.unwrap().is_empty());
        assert!(registry.partners(1).await.unwrap().is_empty());
        assert!(registry.partners(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_preserves_pair_within_critical_age() {
        let (_cache, store, monitor) = setup_with_pair().await;
        monitor.mark_hub_change(1, 20, 2000).await.unwrap();

        // Âge 30 = seuil : strictement supérieur requis, rien ne bouge.
        assert_eq!(monitor.sweep_at(2030).await.unwrap(), 0);
        assert_eq!(store.pairs().len(), 1);
    }

    #[tokio::test]
    async fn sweep_without_marks_is_a_no_op() {
        let (_cache, store, monitor) = setup_with_pair().await;
        assert_eq!(monitor.sweep_at(5000).await.unwrap(), 0);
        assert_eq!(store.pairs().len(), 1);
    }

    #[tokio::test]
    async fn cleared_suspicion_survives_later_sweeps() {
        let (_cache, store, monitor) = setup_with_pair().await;
        monitor.mark_hub_change(1, 20, 2000).await.unwrap();
        monitor.mark_hub_change(2, 20, 2015).await.unwrap();
        assert_eq!(monitor.sweep_at(2100).await.unwrap(), 0);
        assert_eq!(store.pairs().len(), 1);
    }
}
