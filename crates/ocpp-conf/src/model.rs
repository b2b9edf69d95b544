//! The gateway's configuration schema, confirmed field-for-field against
//! the original `internal/config/models.go`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Configuration {
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub mq: MqConfig,
    #[serde(default)]
    pub db_config: DbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub csms_server: CsmsServerConfig,
    #[serde(default)]
    pub message_manager: MessageManagerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub device_manager: DeviceManagerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsmsServerConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub enable_auth: bool,
    #[serde(default)]
    pub standalone_mode: bool,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_csms_listen_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for CsmsServerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            enable_auth: false,
            standalone_mode: false,
            listen_address: default_listen_address(),
            listen_port: default_csms_listen_port(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub host_port: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageManagerConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub storage_account_name: String,
    #[serde(default)]
    pub storage_account_key: String,
    #[serde(default)]
    pub store_messages: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceManagerConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub http: DeviceManagerHttpConfig,
}

impl Default for DeviceManagerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            http: DeviceManagerHttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceManagerHttpConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_device_manager_listen_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub http_user: String,
    #[serde(default)]
    pub http_password: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for DeviceManagerHttpConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_device_manager_listen_port(),
            http_user: String::new(),
            http_password: String::new(),
            timeout_ms: default_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// OTLP collector endpoint. Empty disables OpenTelemetry export,
    /// replacing the original's `AppInsightsInstrumentationKey` gate.
    #[serde(default)]
    pub otlp_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqConfig {
    #[serde(default = "default_mq_type")]
    pub r#type: String,
    #[serde(default)]
    pub mangos_mq: MangosMqConfig,
    #[serde(default)]
    pub rabbit_mq: RabbitMqConfig,
    #[serde(default)]
    pub redis_mq: RedisMqConfig,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            r#type: default_mq_type(),
            mangos_mq: MangosMqConfig::default(),
            rabbit_mq: RabbitMqConfig::default(),
            redis_mq: RedisMqConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MangosMqConfig {
    #[serde(default)]
    pub csms_listen_url: String,
    #[serde(default)]
    pub csms_listen_request_url: String,
    #[serde(default)]
    pub session_listen_url: String,
    #[serde(default)]
    pub message_listen_url: String,
    #[serde(default)]
    pub device_listen_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RabbitMqConfig {
    #[serde(default)]
    pub server_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedisMqConfig {
    #[serde(default)]
    pub host_port: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_type")]
    pub db_type: String,
    #[serde(default)]
    pub db_connection_string: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_csms_listen_port() -> u16 {
    8080
}

fn default_device_manager_listen_port() -> u16 {
    8081
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_mq_type() -> String {
    "mangos_mq".to_string()
}

fn default_db_type() -> String {
    "postgres".to_string()
}

impl DbConfig {
    pub fn with_defaults() -> Self {
        Self {
            db_type: default_db_type(),
            db_connection_string: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Configuration::default();
        assert_eq!(cfg.services.csms_server.listen_port, 8080);
        assert_eq!(cfg.services.device_manager.http.listen_port, 8081);
        assert_eq!(cfg.mq.r#type, "mangos_mq");
    }

    #[test]
    fn deserializes_partial_yaml() {
        let yaml = r#"
services:
  csms_server:
    enable_auth: true
    listen_port: 9000
mq:
  type: rabbit_mq
  rabbit_mq:
    server_url: "amqp://localhost:5672"
"#;
        let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.services.csms_server.enable_auth);
        assert_eq!(cfg.services.csms_server.listen_port, 9000);
        assert_eq!(cfg.mq.r#type, "rabbit_mq");
        assert_eq!(cfg.mq.rabbit_mq.server_url, "amqp://localhost:5672");
        // untouched sections still get their defaults
        assert_eq!(cfg.services.device_manager.http.listen_port, 8081);
    }
}
