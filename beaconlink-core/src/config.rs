/**
 * CONFIG - Paramètres d'environnement du moteur et du sweeper
 *
 * RÔLE : Lecture et validation au démarrage de toute la surface de
 * configuration : endpoints (MySQL, memcached, MQTT), fenêtres temporelles
 * (hystérésis, rendez-vous, cycles de persistance) et seuils du balayage.
 *
 * Les variables sont fournies par l'environnement (chargées via dotenvy
 * dans les binaires). Une valeur manquante ou invalide est une erreur de
 * démarrage, jamais un défaut silencieux pour les fenêtres métier.
 */

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(String),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl DbConfig {
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub server: String,
    pub port: u16,
    pub topic: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub memcache_server: String,
    pub memcache_port: u16,
    /// Absent pour le sweeper, obligatoire pour le moteur.
    pub mqtt: Option<MqttConfig>,
    /// Fenêtre d'hystérésis avant d'accepter un changement de hub à signal
    /// plus faible (ROOM_TIMEGAP, secondes).
    pub hub_hysteresis: i64,
    /// Fenêtre de rendez-vous du pairing (TIMEGAP, secondes). Sert aussi de
    /// TTL aux demandes en attente dans le cache.
    pub rendezvous_window: i64,
    /// Ancienneté minimale entre deux écritures du même beacon en base.
    pub beacon_sync_cycle: i64,
    /// Ancienneté minimale entre deux écritures du même hub en base.
    pub hub_sync_cycle: i64,
    /// Âge au-delà duquel une suspicion non levée dissout la paire.
    pub critical_age: i64,
    /// Période du balayage du sweeper, en secondes.
    pub sweep_interval: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mqtt = match optional("MQTT_SERVER") {
            Some(server) => Some(MqttConfig {
                server,
                port: parsed("MQTT_PORT")?,
                topic: required("MQTT_TOPIC")?,
                user: optional("MQTT_USER"),
                password: optional("MQTT_PW"),
            }),
            None => None,
        };

        let cfg = Self {
            db: DbConfig {
                host: required("DB_HOST")?,
                port: parsed("DB_PORT")?,
                user: required("DB_USER")?,
                password: required("DB_PASSWORD")?,
                database: required("DB_DATABASE")?,
            },
            memcache_server: required("MEMCACHE_SERVER")?,
            memcache_port: parsed("MEMCACHE_PORT")?,
            mqtt,
            hub_hysteresis: parsed("ROOM_TIMEGAP")?,
            rendezvous_window: parsed("TIMEGAP")?,
            beacon_sync_cycle: parsed("DB_UPDATE_CYCLE_BEACON")?,
            hub_sync_cycle: parsed("DB_UPDATE_CYCLE_HUB")?,
            critical_age: parsed_or("CRITICAL_AGE", 30)?,
            sweep_interval: parsed_or("SWEEP_INTERVAL", 60)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("ROOM_TIMEGAP", self.hub_hysteresis),
            ("TIMEGAP", self.rendezvous_window),
            ("DB_UPDATE_CYCLE_BEACON", self.beacon_sync_cycle),
            ("DB_UPDATE_CYCLE_HUB", self.hub_sync_cycle),
            ("CRITICAL_AGE", self.critical_age),
        ] {
            if value <= 0 {
                return Err(ConfigError::Invalid {
                    name: name.into(),
                    value: value.to_string(),
                });
            }
        }
        if self.sweep_interval == 0 {
            return Err(ConfigError::Invalid {
                name: "SWEEP_INTERVAL".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn memcache_addr(&self) -> String {
        format!("{}:{}", self.memcache_server, self.memcache_port)
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name.into()))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str) -> Result<T, ConfigError> {
    let raw = required(name)?;
    raw.parse().map_err(|_| ConfigError::Invalid {
        name: name.into(),
        value: raw,
    })
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name: name.into(),
            value: raw,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Les variables d'environnement sont globales au process.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn set_base_env() {
        for (k, v) in [
            ("DB_HOST", "localhost"),
            ("DB_PORT", "3306"),
            ("DB_USER", "beaconlink"),
            ("DB_PASSWORD", "secret"),
            ("DB_DATABASE", "beaconlink"),
            ("MEMCACHE_SERVER", "localhost"),
            ("MEMCACHE_PORT", "11211"),
            ("ROOM_TIMEGAP", "300"),
            ("TIMEGAP", "60"),
            ("DB_UPDATE_CYCLE_BEACON", "600"),
            ("DB_UPDATE_CYCLE_HUB", "600"),
        ] {
            std::env::set_var(k, v);
        }
        for k in [
            "MQTT_SERVER",
            "MQTT_PORT",
            "MQTT_TOPIC",
            "MQTT_USER",
            "MQTT_PW",
            "CRITICAL_AGE",
            "SWEEP_INTERVAL",
        ] {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn loads_without_mqtt_section() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_base_env();
        let cfg = Config::from_env().unwrap();
        assert!(cfg.mqtt.is_none());
        assert_eq!(cfg.critical_age, 30);
        assert_eq!(cfg.sweep_interval, 60);
        assert_eq!(cfg.memcache_addr(), "localhost:11211");
    }

    #[test]
    fn loads_mqtt_when_server_present() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_base_env();
        std::env::set_var("MQTT_SERVER", "broker");
        std::env::set_var("MQTT_PORT", "1883");
        std::env::set_var("MQTT_TOPIC", "sensors/reports");
        let cfg = Config::from_env().unwrap();
        let mqtt = cfg.mqtt.unwrap();
        assert_eq!(mqtt.server, "broker");
        assert_eq!(mqtt.topic, "sensors/reports");
        assert!(mqtt.user.is_none());
    }

    #[test]
    fn rejects_non_positive_windows() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_base_env();
        std::env::set_var("TIMEGAP", "0");
        assert!(Config::from_env().is_err());
        std::env::set_var("TIMEGAP", "60");
    }

    #[test]
    fn rejects_missing_database() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_base_env();
        std::env::remove_var("DB_HOST");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing(name)) if name == "DB_HOST"
        ));
    }
}
