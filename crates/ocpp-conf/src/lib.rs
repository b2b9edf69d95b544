//! Configuration loading for the OCPP gateway services.
//!
//! # Config file locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/ocpp-gateway/conf.yaml` (system)
//! 2. `~/.config/ocpp-gateway/conf.yaml` (user)
//! 3. `../cfg/conf.yaml`, or a `--config` CLI override (local)
//! 4. Environment variables (`OCPP_*`)
//!
//! # Example
//!
//! ```rust,no_run
//! use ocpp_conf::Configuration;
//!
//! let config = Configuration::load().expect("failed to load config");
//! println!("CSMS listens on {}", config.services.csms_server.listen_port);
//! ```

pub mod loader;
pub mod model;

pub use loader::ConfigSources;
pub use model::{
    CacheConfig, Configuration, CsmsServerConfig, DbConfig, DeviceManagerConfig,
    DeviceManagerHttpConfig, LoggingConfig, MangosMqConfig, MessageManagerConfig, MqConfig,
    RabbitMqConfig, RedisMqConfig, ServicesConfig, SessionConfig,
};

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl Configuration {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `../cfg/conf.yaml` default. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about where each value
    /// came from.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from an optional path and return source info.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = Configuration::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_ports() {
        let config = Configuration::default();
        assert_eq!(config.services.csms_server.listen_port, 8080);
        assert_eq!(config.services.device_manager.http.listen_port, 8081);
    }

    #[test]
    fn load_works_with_no_config_files_present() {
        let config = Configuration::load().unwrap();
        assert_eq!(config.mq.r#type, "mangos_mq");
    }
}
