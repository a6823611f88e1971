//! Configuration for the sharing host.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sheet_core::error::SheetError;
use sheet_core::session::{HostConfig, RegistryConfig};
use sheet_core::stream::capture::CaptureConstraints;
use sheet_core::stream::pipeline::PipelineConfig;
use sheet_core::transport::{RelayMode, RelayedOptions, TransportKind};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetHostConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub screen: ScreenConfig,
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to accept viewer links on.
    pub listen_address: String,
    pub port: u16,
    /// Concurrent viewer links; extra links are refused.
    pub max_links: usize,
}

/// Session policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Only "relayed" is served. "direct" is reserved for a peer-connection
    /// stack and refused at startup.
    pub transport: String,
    /// "diff" or "continuous".
    pub relay_mode: String,
    /// Approve every request carrying a valid code.
    pub auto_approve: bool,
    /// Seconds a manual approval may take before the viewer gets 408.
    pub approval_timeout_secs: u64,
    /// Deadline for one handshake step, in milliseconds.
    pub handshake_timeout_ms: u64,
    pub audio_enabled: bool,
    /// Let viewers drive the host's pointer and keyboard.
    pub remote_control: bool,
}

/// Capture and encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub fps: u32,
    /// Diff block edge in pixels.
    pub block_size: u32,
    /// Region encode quality, 1..=100.
    pub quality: u8,
    /// Codec preference list for continuous mode.
    pub codecs: Vec<String>,
    pub keyframe_interval: u32,
    /// Send the first raster whole when a viewer joins.
    pub seed_full_frame: bool,
    /// Test-pattern resolution.
    pub width: u32,
    pub height: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".into(),
            port: 3000,
            max_links: 8,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: "relayed".into(),
            relay_mode: "diff".into(),
            auto_approve: true,
            approval_timeout_secs: 30,
            handshake_timeout_ms: 10_000,
            audio_enabled: false,
            remote_control: true,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            block_size: 64,
            quality: 70,
            codecs: vec!["xor-zstd".into()],
            keyframe_interval: 60,
            seed_full_frame: true,
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

impl SheetHostConfig {
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
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.network.listen_address, self.network.port)
    }

    /// The transport sessions are served over. A reserved kind this host
    /// cannot serve is a configuration error.
    pub fn transport_kind(&self) -> Result<TransportKind, SheetError> {
        match self.session.transport.to_ascii_lowercase().as_str() {
            "relayed" => Ok(TransportKind::Relayed),
            "direct" => Err(SheetError::Configuration(
                "direct transport needs a peer-connection stack; this host only relays".into(),
            )),
            other => Err(SheetError::Configuration(format!(
                "unknown transport {other:?}"
            ))),
        }
    }

    pub fn relay_mode(&self) -> Result<RelayMode, SheetError> {
        match self.session.relay_mode.to_ascii_lowercase().as_str() {
            "diff" => Ok(RelayMode::Diff),
            "continuous" => Ok(RelayMode::Continuous),
            other => Err(SheetError::Configuration(format!(
                "unknown relay mode {other:?}"
            ))),
        }
    }

    /// Stream settings for relayed sessions, clamped to sane ranges.
    pub fn to_relayed_options(&self) -> Result<RelayedOptions, SheetError> {
        Ok(RelayedOptions {
            mode: self.relay_mode()?,
            fps: self.screen.fps.clamp(1, 60),
            pipeline: PipelineConfig {
                block_size: self.screen.block_size.max(8),
                quality: self.screen.quality.clamp(1, 100),
            },
            codec_preferences: self.screen.codecs.clone(),
            keyframe_interval: self.screen.keyframe_interval.max(1),
            seed_full_frame: self.screen.seed_full_frame,
        })
    }

    pub fn to_host_config(&self) -> HostConfig {
        HostConfig {
            auto_approve: self.session.auto_approve,
            approval_timeout: Duration::from_secs(self.session.approval_timeout_secs.max(1)),
        }
    }

    pub fn to_registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            capture_constraints: CaptureConstraints {
                audio: self.session.audio_enabled,
                fps: self.screen.fps.clamp(1, 60),
            },
            audio_enabled: self.session.audio_enabled,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.session.handshake_timeout_ms.max(1))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&SheetHostConfig::default()).unwrap();
        assert!(text.contains("port = 3000"));
        assert!(text.contains("relay_mode"));
        assert!(text.contains("block_size"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: SheetHostConfig = toml::from_str(
            r#"
            [screen]
            fps = 30

            [session]
            relay_mode = "continuous"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.screen.fps, 30);
        assert_eq!(cfg.screen.block_size, 64);
        assert_eq!(cfg.network.port, 3000);
        assert_eq!(cfg.relay_mode().unwrap(), RelayMode::Continuous);
    }

    #[test]
    fn relayed_options_are_clamped() {
        let mut cfg = SheetHostConfig::default();
        cfg.screen.fps = 240;
        cfg.screen.block_size = 2;
        cfg.screen.quality = 0;
        let opts = cfg.to_relayed_options().unwrap();
        assert_eq!(opts.fps, 60);
        assert_eq!(opts.pipeline.block_size, 8);
        assert_eq!(opts.pipeline.quality, 1);
    }

    #[test]
    fn unknown_relay_mode_is_a_configuration_error() {
        let mut cfg = SheetHostConfig::default();
        cfg.session.relay_mode = "mjpeg".into();
        let err = cfg.to_relayed_options().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn only_relayed_transport_is_served() {
        let mut cfg = SheetHostConfig::default();
        assert_eq!(cfg.transport_kind().unwrap(), TransportKind::Relayed);
        cfg.session.transport = "Relayed".into();
        assert_eq!(cfg.transport_kind().unwrap(), TransportKind::Relayed);

        for name in ["direct", "webrtc"] {
            cfg.session.transport = name.into();
            let err = cfg.transport_kind().unwrap_err();
            assert!(matches!(err, SheetError::Configuration(_)));
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = SheetHostConfig::load(Path::new("/nonexistent/sheet-host.toml"));
        assert_eq!(cfg.listen_addr(), "0.0.0.0:3000");
    }
}
