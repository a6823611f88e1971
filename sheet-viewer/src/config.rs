//! Viewer configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sheet_core::error::SheetError;
use sheet_core::signaling::{ConnectionCode, Credential};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host link address (IP:port).
    pub host_address: String,
    /// Connect and handshake timeout in milliseconds.
    pub timeout_ms: u64,
}

/// How to authenticate with the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 8-character connection code; dashes and case are ignored.
    pub code: String,
    /// Log in instead of using a code when set.
    pub username: String,
    pub password: String,
}

/// Size of the surface the remote screen is drawn into. Pointer
/// positions are given in this space.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
    /// Optional log file.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_address: "127.0.0.1:3000".into(),
            timeout_ms: 5000,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ViewerConfig {
    /// Load from a TOML file, falling back to defaults.
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

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.network.timeout_ms.max(1))
    }

    /// The credential to present. Codes are validated locally before
    /// anything is sent.
    pub fn credential(&self) -> Result<Credential, SheetError> {
        if !self.session.username.is_empty() {
            return Ok(Credential::Login {
                username: self.session.username.clone(),
                password: self.session.password.clone(),
            });
        }
        ConnectionCode::parse(&self.session.code)
            .map(|code| Credential::Code(code.to_string()))
            .ok_or_else(|| {
                SheetError::Configuration("connection code must be 8 letters or digits".into())
            })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ViewerConfig::default()).unwrap();
        assert!(text.contains("host_address"));
        assert!(text.contains("width"));
    }

    #[test]
    fn code_is_normalised() {
        let mut cfg = ViewerConfig::default();
        cfg.session.code = "ab12-cd34".into();
        assert_eq!(cfg.credential().unwrap(), Credential::Code("AB12CD34".into()));
    }

    #[test]
    fn short_code_is_rejected_locally() {
        let mut cfg = ViewerConfig::default();
        cfg.session.code = "ABC".into();
        assert!(matches!(cfg.credential(), Err(SheetError::Configuration(_))));
    }

    #[test]
    fn login_wins_over_code() {
        let mut cfg = ViewerConfig::default();
        cfg.session.code = "AB12CD34".into();
        cfg.session.username = "alice".into();
        cfg.session.password = "hunter2".into();
        assert!(matches!(cfg.credential(), Ok(Credential::Login { .. })));
    }
}
