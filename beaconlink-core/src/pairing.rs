/**
 * PAIRING - Rendez-vous de deux beacons compatibles au même hub
 *
 * RÔLE : Quand un beacon confirme (bouton pressé), chercher parmi les types
 * compatibles une demande en attente au même hub. La première demande
 * trouvée dans la fenêtre de rendez-vous gagne : pas de scoring entre
 * candidats simultanés. Sans partenaire, le beacon dépose sa propre demande
 * avec un TTL égal à la fenêtre, auto-expirante côté cache.
 *
 * CAS LIMITE PRÉSERVÉ : une demande trouvée mais déjà plus vieille que la
 * fenêtre interrompt toute la tentative, sans déposer de nouvelle demande.
 * Comportement hérité du système d'origine, conservé tel quel.
 */

use crate::cache::{get_json, set_json, Cache};
use crate::compat::CompatIndex;
use crate::error::EngineError;
use crate::keys;
use crate::models::PendingRequest;
use crate::registry::PairRegistry;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Paire formée avec le beacon en attente.
    Paired { partner: i64 },
    /// Aucune demande compatible : la demande du requérant est déposée.
    Registered,
    /// Demande trouvée mais expirée : tentative abandonnée.
    StalePending,
    /// Le type du requérant n'a aucun partenaire autorisé.
    NoPartnerTypes,
}

pub struct Matcher {
    cache: Arc<dyn Cache>,
    compat: CompatIndex,
    registry: PairRegistry,
    rendezvous_window: i64,
}

impl Matcher {
    pub fn new(
        cache: Arc<dyn Cache>,
        compat: CompatIndex,
        registry: PairRegistry,
        rendezvous_window: i64,
    ) -> Self {
        Self {
            cache,
            compat,
            registry,
            rendezvous_window,
        }
    }

    pub async fn confirm(
        &self,
        hub_id: i64,
        type_id: i64,
        beacon_id: i64,
        ts: i64,
    ) -> Result<MatchOutcome, EngineError> {
        let candidate_types = self.compat.compatible_types(type_id).await?;
        if candidate_types.is_empty() {
            log::debug!("beacon {beacon_id}: type {type_id} has no allowed partners");
            return Ok(MatchOutcome::NoPartnerTypes);
        }

        for candidate in candidate_types {
            let key = keys::pending(hub_id, candidate);
            let Some(pending) = get_json::<PendingRequest>(self.cache.as_ref(), &key).await?
            else {
                continue;
            };
            if ts - pending.ts <= self.rendezvous_window {
                self.registry
                    .add_pair(beacon_id, pending.beacon_id, hub_id, ts)
                    .await?;
                self.cache.delete(&key).await?;
                return Ok(MatchOutcome::Paired {
                    partner: pending.beacon_id,
                });
            }
            // Demande périmée encore présente malgré son TTL.
            log::warn!(
                "pending request at hub {hub_id} for type {candidate} is older than {}s, \
                 aborting pairing attempt",
                self.rendezvous_window
            );
            return Ok(MatchOutcome::StalePending);
        }

        let request = PendingRequest { beacon_id, ts };
        set_json(
            self.cache.as_ref(),
            &keys::pending(hub_id, type_id),
            &request,
            Some(self.rendezvous_window as u64),
        )
        .await?;
        log::debug!("beacon {beacon_id} waiting for a partner at hub {hub_id}");
        Ok(MatchOutcome::Registered)
    }
}
