/**
 * HUBS - Traqueur de vivacité des hubs
 *
 * RÔLE : Résout l'identifiant d'un hub depuis son adresse matérielle et
 * maintient son horodatage de dernière observation. La persistance du
 * last_seen est limitée à un passage par cycle configuré.
 *
 * Un hub absent de la base est un équipement étranger : le message qui le
 * mentionne est abandonné sans erreur.
 */

use crate::cache::{get_json, set_json, Cache};
use crate::error::EngineError;
use crate::keys;
use crate::models::HubState;
use crate::store::Store;
use std::sync::Arc;

pub struct HubTracker {
    cache: Arc<dyn Cache>,
    store: Arc<dyn Store>,
    sync_cycle: i64,
}

impl HubTracker {
    pub fn new(cache: Arc<dyn Cache>, store: Arc<dyn Store>, sync_cycle: i64) -> Self {
        Self {
            cache,
            store,
            sync_cycle,
        }
    }

    /// Rafraîchit le hub observé à `ts` et retourne son identifiant, ou
    /// None si l'adresse n'est résoluble ni en cache ni en base.
    pub async fn touch(&self, mac: &str, ts: i64) -> Result<Option<i64>, EngineError> {
        let key = keys::hub(mac);
        if let Some(mut hub) = get_json::<HubState>(self.cache.as_ref(), &key).await? {
            if hub.last_synced + self.sync_cycle < ts {
                // Trace de vivacité en base ; l'échec n'empêche pas la mise
                // à jour du cache, le comportement reste correct hors ligne.
                match self.store.update_hub_seen(hub.id, ts).await {
                    Ok(()) => hub.last_synced = ts,
                    Err(e) => log::error!("failed to persist hub {} last_seen: {e}", hub.id),
                }
                hub.last_seen = ts;
                set_json(self.cache.as_ref(), &key, &hub, None).await?;
            } else if hub.last_seen < ts {
                // Le temps ne recule pas : un message en retard ne doit pas
                // rajeunir l'observation.
                hub.last_seen = ts;
                set_json(self.cache.as_ref(), &key, &hub, None).await?;
            }
            return Ok(Some(hub.id));
        }

        match self.store.hub_by_mac(mac).await? {
            Some(row) => {
                let hub = HubState {
                    id: row.id,
                    last_seen: ts,
                    last_synced: ts,
                };
                set_json(self.cache.as_ref(), &key, &hub, None).await?;
                log::debug!("hub {mac} loaded from store as id {}", row.id);
                Ok(Some(row.id))
            }
            None => {
                log::debug!("unknown hub {mac}, report dropped");
                Ok(None)
            }
        }
    }
}
