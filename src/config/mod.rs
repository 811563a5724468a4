//! Service configuration persisted as TOML.
//!
//! Resolution order: built-in defaults, then the config file (explicit
//! `--config` path, or `<config_dir>/eps-dashboard/config.toml` when it
//! exists), then `EPS_DASHBOARD_*` environment variables. CLI flags are
//! applied last by `main`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_HOST: &str = "EPS_DASHBOARD_HOST";
pub const ENV_PORT: &str = "EPS_DASHBOARD_PORT";
pub const ENV_DB: &str = "EPS_DASHBOARD_DB";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Allow binding to a non-loopback address.
    pub allow_public_bind: bool,
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            allow_public_bind: false,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the JSON document holding users, devices and notifications.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let path = project_dirs()
            .map(|d| d.data_dir().join("database.json"))
            .unwrap_or_else(|| PathBuf::from("database.json"));
        Self { path }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Account that can be neither deleted nor demoted.
    pub root_email: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            root_email: crate::store::DEFAULT_ROOT_ADMIN.to_string(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "eps", "eps-dashboard")
}

impl Config {
    /// Default config file location, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|d| d.config_dir().join("config.toml"))
    }

    /// Load from `explicit`, else from the default location when present,
    /// else defaults; then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_file(&path)?,
                _ => {
                    tracing::debug!("no config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        tracing::info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Apply `EPS_DASHBOARD_*` overrides using `lookup` to read variables.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.is_empty()) {
            self.gateway.host = host;
        }
        if let Some(port) = lookup(ENV_PORT).filter(|p| !p.is_empty()) {
            self.gateway.port = port
                .parse()
                .with_context(|| format!("{ENV_PORT} is not a valid port: {port}"))?;
        }
        if let Some(db) = lookup(ENV_DB).filter(|p| !p.is_empty()) {
            self.store.path = PathBuf::from(db);
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_legacy_server() {
        let config = Config::default();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.admin.root_email, "admin@eps.com");
        assert!(config.store.path.ends_with("database.json"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nport = 8080\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.admin, AdminConfig::default());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[gateway\nport = ").unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            (ENV_HOST, "0.0.0.0"),
            (ENV_PORT, "9000"),
            (ENV_DB, "/tmp/eps.json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.store.path, PathBuf::from("/tmp/eps.json"));
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides(|k| (k == ENV_PORT).then(|| "http".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
