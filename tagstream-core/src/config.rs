//! Provider configuration.
//!
//! Plain serde structs with full defaults, so a TOML file can specify any
//! subset of fields. The binaries layer file loading and CLI overrides on
//! top; the library only consumes the resolved values.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::Credentials;
use crate::error::Error;

/// Which provider implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Real positioning hardware over the LocalSense push protocol.
    LocalSense,
    /// Socket-free simulator with the same contract.
    Simulated,
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "localsense" | "hardware" => Ok(ProviderKind::LocalSense),
            "simulated" | "mock" => Ok(ProviderKind::Simulated),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::LocalSense => write!(f, "localsense"),
            ProviderKind::Simulated => write!(f, "simulated"),
        }
    }
}

/// Settings shared by every provider implementation.
///
/// Every field has a default, so a source file may specify any subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// `host:port` of the positioning server. Required for hardware,
    /// ignored by the simulator.
    pub server_url: String,
    /// Account name presented in the auth frame.
    pub username: Option<String>,
    /// Password the credential digest is derived from.
    pub password: Option<String>,
    /// Per-deployment salt issued by the vendor.
    pub salt: Option<String>,
    /// Reserved for deployments that authenticate by key instead.
    pub api_key: Option<String>,
    /// Simulator tick period in milliseconds.
    pub update_interval_ms: u64,
    /// Fixed delay between reconnect attempts in milliseconds.
    pub reconnect_interval_ms: u64,
    /// How long to wait for the auth verdict in milliseconds.
    pub auth_timeout_ms: u64,
    /// Simulated connect latency in milliseconds.
    pub connect_delay_ms: u64,
    /// RNG seed for the simulator; 0 draws one from the OS.
    pub seed: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            username: None,
            password: None,
            salt: None,
            api_key: None,
            update_interval_ms: 2000,
            reconnect_interval_ms: 5000,
            auth_timeout_ms: 10_000,
            connect_delay_ms: 500,
            seed: 0,
        }
    }
}

impl ProviderConfig {
    /// Credentials for the auth frame; unset fields become empty strings.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            salt: self.salt.clone().unwrap_or_default(),
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }
}
