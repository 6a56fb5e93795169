use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::detection::SPEED_THRESHOLD_MPH;

/// Overrides `storage.database_file`
pub const DATABASE_FILE_ENV: &str = "DATABASE_FILE";
/// Overrides `geoip.database_path`
pub const GEO_IP_DB_ENV: &str = "GEO_IP_DB";

/// Configuration for the geovelocity daemon and CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub geoip: GeoIpConfig,
    pub detection: DetectionConfig,
    #[serde(default)]
    pub alerting: AlertConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

/// Event store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file holding login events
    pub database_file: PathBuf,
}

/// GeoIP database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    /// Path to the GeoLite2-City.mmdb database file
    pub database_path: PathBuf,
}

/// Detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Implied speeds above this are suspicious
    pub speed_threshold_mph: f64,
    /// Per-request deadline in seconds; 0 disables it
    pub request_timeout_secs: u64,
}

impl DetectionConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Alert dispatch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    pub enabled: bool,
    pub slack: Option<SlackConfig>,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

/// Slack incoming-webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: Option<String>,
}

/// Generic webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    /// "POST" (default) or "PUT"
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                database_file: PathBuf::from("logins.db"),
            },
            geoip: GeoIpConfig {
                database_path: PathBuf::from("/GeoLite2/GeoLite2-City.mmdb"),
            },
            detection: DetectionConfig {
                speed_threshold_mph: SPEED_THRESHOLD_MPH,
                request_timeout_secs: 10,
            },
            alerting: AlertConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load from `path` if it exists, otherwise defaults, then apply env overrides
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if path.exists() {
            Config::from_file(path)?
        } else {
            log::warn!("Config file {:?} not found, using defaults", path);
            Config::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `DATABASE_FILE` / `GEO_IP_DB` style overrides from a lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(file) = lookup(DATABASE_FILE_ENV).filter(|v| !v.is_empty()) {
            self.storage.database_file = PathBuf::from(file);
        }
        if let Some(path) = lookup(GEO_IP_DB_ENV).filter(|v| !v.is_empty()) {
            self.geoip.database_path = PathBuf::from(path);
        }
    }
}
