//! Configuration for the standalone emulator.

use std::path::Path;

use serde::{Deserialize, Serialize};

use tagstream_core::EmulatorConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorFileConfig {
    /// Server and traffic settings.
    pub emulator: EmulatorConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for EmulatorFileConfig {
    fn default() -> Self {
        Self {
            emulator: EmulatorConfig::default(),
            logging: LoggingConfig::default(),
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

impl EmulatorFileConfig {
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
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = EmulatorFileConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("bind_addr"));
        assert!(text.contains("update_interval_ms"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = EmulatorFileConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: EmulatorFileConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.emulator.bind_addr, "127.0.0.1:9100");
        assert_eq!(parsed.emulator.update_interval_ms, 2000);
        assert_eq!(parsed.logging.level, "info");
    }
}
