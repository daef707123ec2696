//! Configuration for the monitor.

use std::path::Path;

use serde::{Deserialize, Serialize};

use tagstream_core::ProviderConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Provider selection and connection settings.
    pub provider: ProviderSection,
    /// Tags subscribed at startup.
    pub tags: Vec<String>,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// Provider backend: "localsense" or "simulated".
    pub kind: String,
    /// Server address as host:port. LocalSense only.
    pub server_url: String,
    pub username: String,
    pub password: String,
    /// Digest salt issued alongside the credentials.
    pub salt: String,
    /// Simulation update cadence in milliseconds.
    pub update_interval_ms: u64,
    /// Delay between reconnect attempts in milliseconds.
    pub reconnect_interval_ms: u64,
    /// How long to wait for the auth verdict in milliseconds.
    pub auth_timeout_ms: u64,
    /// Simulation walk seed. Zero draws a fresh seed per run.
    pub seed: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSection::default(),
            tags: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: "simulated".into(),
            server_url: String::new(),
            username: String::new(),
            password: String::new(),
            salt: String::new(),
            update_interval_ms: 2000,
            reconnect_interval_ms: 5000,
            auth_timeout_ms: 10_000,
            seed: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl MonitorConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let cfg = Self::default();
        let text = toml::to_string_pretty(&cfg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, text)
    }

    /// Convert the provider section into a core `ProviderConfig`.
    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            server_url: self.provider.server_url.clone(),
            username: non_empty(&self.provider.username),
            password: non_empty(&self.provider.password),
            salt: non_empty(&self.provider.salt),
            update_interval_ms: self.provider.update_interval_ms,
            reconnect_interval_ms: self.provider.reconnect_interval_ms,
            auth_timeout_ms: self.provider.auth_timeout_ms,
            seed: self.provider.seed,
            ..ProviderConfig::default()
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = MonitorConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("kind"));
        assert!(text.contains("reconnect_interval_ms"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = MonitorConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: MonitorConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.provider.kind, "simulated");
        assert_eq!(parsed.provider.reconnect_interval_ms, 5000);
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn to_provider_config_maps_empty_credentials_to_none() {
        let mut cfg = MonitorConfig::default();
        cfg.provider.username = "ops".into();
        let provider = cfg.to_provider_config();
        assert_eq!(provider.username.as_deref(), Some("ops"));
        assert!(provider.password.is_none());
        assert!(provider.salt.is_none());
    }
}
