//! Bridge configuration: `config.yaml` over built-in defaults, with every
//! leaf overridable from the environment as `SNMP_BRIDGE_<GROUP>_<KEY>`.

use crate::domain::SnmpVersion;
use crate::secret::SecretString;
use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "SNMP_BRIDGE_";

/// Locations searched for `config.yaml` when no explicit path is given.
const SEARCH_PATHS: [&str; 3] = ["/data/config.yaml", "./config.yaml", "./config/config.yaml"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub mqtt: MqttConfig,
    pub snmp: SnmpConfig,
    pub logging: LoggingConfig,
}

/// Bind address for the external HTTP surface (not served by the core).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite` or `postgres`; this build ships the sqlite store.
    pub driver: String,
    pub dsn: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub dbname: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            dsn: "./data/snmp-bridge.db".to_string(),
            host: String::new(),
            port: 5432,
            user: String::new(),
            password: SecretString::default(),
            dbname: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub client_id: String,
    pub topic_prefix: String,
    pub discovery: bool,
    pub discovery_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: SecretString::default(),
            client_id: "snmp-mqtt-bridge".to_string(),
            topic_prefix: "snmp-bridge".to_string(),
            discovery: true,
            discovery_prefix: "homeassistant".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnmpConfig {
    pub default_community: String,
    pub default_version: SnmpVersion,
    pub default_timeout_seconds: u64,
    pub default_retries: u32,
    pub trap_port: u16,
    pub poll_interval_seconds: u64,
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            default_community: "public".to_string(),
            default_version: SnmpVersion::V2c,
            default_timeout_seconds: 5,
            default_retries: 2,
            trap_port: 162,
            poll_interval_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration: file (explicit path or first search hit) over
    /// defaults, then environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match Self::config_file(path)? {
            Some(file) => {
                let contents = fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("failed to parse {}", file.display()))?
            }
            None => Config::default(),
        };

        config.apply_env_overrides(std::env::vars());
        Ok(config)
    }

    fn config_file(path: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("config file {} does not exist", path.display());
            }
            return Ok(Some(path.to_path_buf()));
        }
        Ok(SEARCH_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists()))
    }

    /// Apply `SNMP_BRIDGE_*` environment overrides. Unknown keys are
    /// ignored; unparsable numeric values keep the previous setting.
    pub fn apply_env_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            let Some(key) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match key {
                "SERVER_HOST" => self.server.host = value,
                "SERVER_PORT" => set_number(&mut self.server.port, key, &value),
                "DATABASE_DRIVER" => self.database.driver = value,
                "DATABASE_DSN" => self.database.dsn = value,
                "DATABASE_HOST" => self.database.host = value,
                "DATABASE_PORT" => set_number(&mut self.database.port, key, &value),
                "DATABASE_USER" => self.database.user = value,
                "DATABASE_PASSWORD" => self.database.password = SecretString::new(value),
                "DATABASE_DBNAME" => self.database.dbname = value,
                "MQTT_BROKER" => self.mqtt.broker = value,
                "MQTT_PORT" => set_number(&mut self.mqtt.port, key, &value),
                "MQTT_USERNAME" => self.mqtt.username = value,
                "MQTT_PASSWORD" => self.mqtt.password = SecretString::new(value),
                "MQTT_CLIENT_ID" => self.mqtt.client_id = value,
                "MQTT_TOPIC_PREFIX" => self.mqtt.topic_prefix = value,
                "MQTT_DISCOVERY" => match value.parse() {
                    Ok(flag) => self.mqtt.discovery = flag,
                    Err(_) => warn!("Ignoring non-boolean {}{}={:?}", ENV_PREFIX, key, value),
                },
                "MQTT_DISCOVERY_PREFIX" => self.mqtt.discovery_prefix = value,
                "SNMP_DEFAULT_COMMUNITY" => self.snmp.default_community = value,
                "SNMP_DEFAULT_VERSION" => match value.parse() {
                    Ok(version) => self.snmp.default_version = version,
                    Err(e) => warn!("Ignoring {}{}: {}", ENV_PREFIX, key, e),
                },
                "SNMP_DEFAULT_TIMEOUT_SECONDS" => {
                    set_number(&mut self.snmp.default_timeout_seconds, key, &value)
                }
                "SNMP_DEFAULT_RETRIES" => set_number(&mut self.snmp.default_retries, key, &value),
                "SNMP_TRAP_PORT" => set_number(&mut self.snmp.trap_port, key, &value),
                "SNMP_POLL_INTERVAL_SECONDS" => {
                    set_number(&mut self.snmp.poll_interval_seconds, key, &value)
                }
                "LOGGING_LEVEL" => self.logging.level = value,
                "LOGGING_FORMAT" => self.logging.format = value,
                _ => {}
            }
        }
    }
}

fn set_number<T: std::str::FromStr>(target: &mut T, key: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!("Ignoring non-numeric {}{}={:?}", ENV_PREFIX, key, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.driver, "sqlite");
        assert_eq!(config.mqtt.broker, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic_prefix, "snmp-bridge");
        assert_eq!(config.mqtt.discovery_prefix, "homeassistant");
        assert!(config.mqtt.discovery);
        assert_eq!(config.snmp.default_version, SnmpVersion::V2c);
        assert_eq!(config.snmp.trap_port, 162);
        assert_eq!(config.snmp.poll_interval_seconds, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let yaml = r#"
mqtt:
  broker: broker.lan
  username: bridge
  password: hunter2
snmp:
  poll_interval_seconds: 10
  default_version: v1
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mqtt.broker, "broker.lan");
        assert_eq!(config.mqtt.password.expose(), "hunter2");
        // Unset groups keep their defaults
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.snmp.poll_interval_seconds, 10);
        assert_eq!(config.snmp.default_version, SnmpVersion::V1);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(
            vec![
                ("SNMP_BRIDGE_MQTT_BROKER".to_string(), "mqtt.lan".to_string()),
                ("SNMP_BRIDGE_MQTT_PORT".to_string(), "8883".to_string()),
                ("SNMP_BRIDGE_SNMP_TRAP_PORT".to_string(), "1162".to_string()),
                ("SNMP_BRIDGE_MQTT_DISCOVERY".to_string(), "false".to_string()),
                ("SNMP_BRIDGE_LOGGING_FORMAT".to_string(), "json".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ]
            .into_iter(),
        );

        assert_eq!(config.mqtt.broker, "mqtt.lan");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.snmp.trap_port, 1162);
        assert!(!config.mqtt.discovery);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_env_override_bad_number_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(
            vec![("SNMP_BRIDGE_MQTT_PORT".to_string(), "not-a-port".to_string())].into_iter(),
        );
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn test_missing_explicit_config_errors() {
        assert!(Config::load(Some(Path::new("/nonexistent/config.yaml"))).is_err());
    }
}
