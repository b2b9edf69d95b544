//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, Configuration};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/ocpp-gateway/conf.yaml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("ocpp-gateway/conf.yaml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over the local default.
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    // Local override, matching the original's default relative path.
    let local = PathBuf::from("../cfg/conf.yaml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a YAML file.
pub fn load_from_file(path: &Path) -> Result<Configuration, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_yaml(&contents, path)
}

/// Parse config from a YAML string.
fn parse_yaml(contents: &str, path: &Path) -> Result<Configuration, ConfigError> {
    serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge two configs, with `overlay` taking precedence field-by-field via a
/// YAML value deep-merge, then re-deserialized into the typed schema.
pub fn merge_configs(base: Configuration, overlay: Configuration) -> Configuration {
    let base_value = serde_yaml::to_value(&base).unwrap_or(serde_yaml::Value::Null);
    let overlay_value = serde_yaml::to_value(&overlay).unwrap_or(serde_yaml::Value::Null);
    let merged = deep_merge(base_value, overlay_value);
    serde_yaml::from_value(merged).unwrap_or(overlay)
}

fn deep_merge(base: serde_yaml::Value, overlay: serde_yaml::Value) -> serde_yaml::Value {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(mut base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged_val = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged_val);
            }
            serde_yaml::Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Apply environment variable overrides to config.
///
/// Mirrors the original's `OCPP_<SECTION>_<FIELD>` convention, plus a
/// pass-through for `RUST_LOG`/`OTEL_EXPORTER_OTLP_ENDPOINT` matching the
/// ambient tracing stack.
pub fn apply_env_overrides(config: &mut Configuration, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("OCPP_CSMS_SERVER_LISTEN_ADDRESS") {
        config.services.csms_server.listen_address = v;
        sources
            .env_overrides
            .push("OCPP_CSMS_SERVER_LISTEN_ADDRESS".to_string());
    }
    if let Ok(v) = env::var("OCPP_CSMS_SERVER_LISTEN_PORT") {
        if let Ok(port) = v.parse() {
            config.services.csms_server.listen_port = port;
            sources
                .env_overrides
                .push("OCPP_CSMS_SERVER_LISTEN_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("OCPP_CSMS_SERVER_ENABLE_AUTH") {
        if let Ok(b) = v.parse() {
            config.services.csms_server.enable_auth = b;
            sources
                .env_overrides
                .push("OCPP_CSMS_SERVER_ENABLE_AUTH".to_string());
        }
    }
    if let Ok(v) = env::var("OCPP_CSMS_SERVER_STANDALONE_MODE") {
        if let Ok(b) = v.parse() {
            config.services.csms_server.standalone_mode = b;
            sources
                .env_overrides
                .push("OCPP_CSMS_SERVER_STANDALONE_MODE".to_string());
        }
    }
    if let Ok(v) = env::var("OCPP_CACHE_HOST_PORT") {
        config.services.csms_server.cache.host_port = v;
        sources
            .env_overrides
            .push("OCPP_CACHE_HOST_PORT".to_string());
    }
    if let Ok(v) = env::var("OCPP_CACHE_PASSWORD") {
        config.services.csms_server.cache.password = v;
        sources.env_overrides.push("OCPP_CACHE_PASSWORD".to_string());
    }

    if let Ok(v) = env::var("OCPP_DEVICE_MANAGER_LISTEN_PORT") {
        if let Ok(port) = v.parse() {
            config.services.device_manager.http.listen_port = port;
            sources
                .env_overrides
                .push("OCPP_DEVICE_MANAGER_LISTEN_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("OCPP_DEVICE_MANAGER_HTTP_USER") {
        config.services.device_manager.http.http_user = v;
        sources
            .env_overrides
            .push("OCPP_DEVICE_MANAGER_HTTP_USER".to_string());
    }
    if let Ok(v) = env::var("OCPP_DEVICE_MANAGER_HTTP_PASSWORD") {
        config.services.device_manager.http.http_password = v;
        sources
            .env_overrides
            .push("OCPP_DEVICE_MANAGER_HTTP_PASSWORD".to_string());
    }

    if let Ok(v) = env::var("OCPP_MESSAGE_MANAGER_STORE_MESSAGES") {
        if let Ok(b) = v.parse() {
            config.services.message_manager.store_messages = b;
            sources
                .env_overrides
                .push("OCPP_MESSAGE_MANAGER_STORE_MESSAGES".to_string());
        }
    }

    if let Ok(v) = env::var("OCPP_MQ_TYPE") {
        config.mq.r#type = v;
        sources.env_overrides.push("OCPP_MQ_TYPE".to_string());
    }
    if let Ok(v) = env::var("OCPP_RABBIT_MQ_SERVER_URL") {
        config.mq.rabbit_mq.server_url = v;
        sources
            .env_overrides
            .push("OCPP_RABBIT_MQ_SERVER_URL".to_string());
    }
    if let Ok(v) = env::var("OCPP_REDIS_MQ_HOST_PORT") {
        config.mq.redis_mq.host_port = v;
        sources
            .env_overrides
            .push("OCPP_REDIS_MQ_HOST_PORT".to_string());
    }

    if let Ok(v) = env::var("OCPP_DB_TYPE") {
        config.db_config.db_type = v;
        sources.env_overrides.push("OCPP_DB_TYPE".to_string());
    }
    if let Ok(v) = env::var("OCPP_DB_CONNECTION_STRING") {
        config.db_config.db_connection_string = v;
        sources
            .env_overrides
            .push("OCPP_DB_CONNECTION_STRING".to_string());
    }

    if let Ok(v) = env::var("OCPP_OTLP_ENDPOINT") {
        config.logging.otlp_endpoint = v;
        sources
            .env_overrides
            .push("OCPP_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.logging.otlp_endpoint = v;
        sources
            .env_overrides
            .push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        return if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            match env::var(var_name) {
                Ok(var_value) => PathBuf::from(var_value).join(&stripped[slash_pos + 1..]),
                Err(_) => PathBuf::from(path),
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        };
    }

    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn discover_config_files_does_not_panic() {
        let _files = discover_config_files();
    }

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
services:
  csms_server:
    listen_port: 9000
"#;
        let config = parse_yaml(yaml, Path::new("test.yaml")).unwrap();
        assert_eq!(config.services.csms_server.listen_port, 9000);
        assert_eq!(config.services.device_manager.http.listen_port, 8081);
    }

    #[test]
    fn merge_overlays_only_the_fields_it_sets() {
        let base = Configuration::default();
        let mut overlay = Configuration::default();
        overlay.services.csms_server.listen_port = 9999;
        overlay.mq.r#type = "redis_mq".to_string();

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.services.csms_server.listen_port, 9999);
        assert_eq!(merged.mq.r#type, "redis_mq");
        assert_eq!(merged.services.device_manager.http.listen_port, 8081);
    }
}
