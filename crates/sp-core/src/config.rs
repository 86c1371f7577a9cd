//! Configuration types and file resolution.
//!
//! One TOML file configures both processes: the `[server]` table for the
//! central service and the `[agent]` table for the sidecar. Every field has a
//! default, so an absent file yields a fully working local setup.
//!
//! Resolution order: an explicit `--config` path (must exist and parse), else
//! `~/.session-pulse/config.toml` when present, else built-in defaults.

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Central service configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Sidecar agent configuration
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Central service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Store directory; defaults to `~/.session-pulse/data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<PathBuf>,
    /// HTTP listening port
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Terminal-session retention horizon in days
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// Retention sweeper cadence in hours
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
    /// Heartbeat silence threshold in seconds (serves as both the suspend
    /// and the hung threshold in v1)
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,
    /// Heartbeat sweeper cadence in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Shared bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Enforce the bearer token on every request except `/health`
    #[serde(default)]
    pub require_api_key: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            server_port: default_server_port(),
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            api_key: None,
            require_api_key: false,
        }
    }
}

impl ServerConfig {
    /// Effective store directory.
    pub fn data_path(&self) -> PathBuf {
        self.data_path
            .clone()
            .unwrap_or_else(|| default_home().join("data"))
    }

    /// Heartbeat age at which a session is marked suspended.
    pub fn suspend_threshold(&self) -> Duration {
        Duration::seconds(self.heartbeat_timeout_seconds as i64)
    }

    /// Heartbeat age at which a session is additionally marked hung.
    /// v1 uses the same knob for both thresholds.
    pub fn hung_threshold(&self) -> Duration {
        Duration::seconds(self.heartbeat_timeout_seconds as i64)
    }

    /// How long terminal sessions are kept before deletion.
    pub fn retention_horizon(&self) -> Duration {
        Duration::days(self.retention_days as i64)
    }
}

/// Sidecar agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Loopback port for the local client surface
    #[serde(default = "default_daemon_port")]
    pub daemon_port: u16,
    /// Base URL of the central service
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Flush cadence in seconds
    #[serde(default = "default_batch_interval")]
    pub batch_interval_seconds: u64,
    /// Optional cap on events/metrics forwarded per flush
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<usize>,
    /// Optional per-session bound on buffered items while offline; when hit,
    /// the oldest entries are dropped and the drop count is reported on
    /// recovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_buffered_items: Option<usize>,
    /// gzip outbound request bodies
    #[serde(default)]
    pub enable_compression: bool,
    /// Client-side heartbeat silence threshold in seconds
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,
    /// Parent process poll cadence in seconds
    #[serde(default = "default_parent_poll")]
    pub parent_poll_seconds: u64,
    /// How long to keep retrying a queued crash-mark before the agent exits
    #[serde(default = "default_crash_grace")]
    pub crash_grace_seconds: u64,
    /// Deadline for every outbound request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Bearer token presented to the central service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Verify the service certificate (default on)
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,
    /// Skip TLS certificate verification (testing only)
    #[serde(default)]
    pub tls_insecure_skip_verify: bool,
}

impl AgentConfig {
    /// Whether outbound TLS should accept invalid certificates. Either knob
    /// can disable verification; `tls_verify = true` alone keeps it on.
    pub fn accept_invalid_certs(&self) -> bool {
        self.tls_insecure_skip_verify || !self.tls_verify
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            daemon_port: default_daemon_port(),
            server_url: default_server_url(),
            batch_interval_seconds: default_batch_interval(),
            max_batch_size: None,
            max_buffered_items: None,
            enable_compression: false,
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            parent_poll_seconds: default_parent_poll(),
            crash_grace_seconds: default_crash_grace(),
            request_timeout_seconds: default_request_timeout(),
            api_key: None,
            tls_verify: default_tls_verify(),
            tls_insecure_skip_verify: false,
        }
    }
}

fn default_tls_verify() -> bool {
    true
}

fn default_server_port() -> u16 {
    7600
}

fn default_daemon_port() -> u16 {
    7601
}

fn default_server_url() -> String {
    "http://127.0.0.1:7600".to_string()
}

fn default_retention_days() -> u64 {
    365
}

fn default_cleanup_interval_hours() -> u64 {
    24
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_batch_interval() -> u64 {
    5
}

fn default_parent_poll() -> u64 {
    5
}

fn default_crash_grace() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

/// Root directory for configuration and data.
///
/// `SP_HOME` overrides the home directory for tests and custom deployments.
pub fn default_home() -> PathBuf {
    let home = if let Ok(sp_home) = std::env::var("SP_HOME") {
        PathBuf::from(sp_home)
    } else {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    };
    home.join(".session-pulse")
}

/// Well-known config file path.
pub fn default_config_path() -> PathBuf {
    default_home().join("config.toml")
}

/// Resolve the effective configuration.
///
/// An explicit path must exist and parse; the well-known path is optional;
/// otherwise defaults apply. A malformed file is always an error.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = default_config_path();
            if !path.exists() {
                return Ok(Config::default());
            }
            path
        }
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.server_port, 7600);
        assert_eq!(config.server.retention_days, 365);
        assert_eq!(config.server.heartbeat_timeout_seconds, 60);
        assert_eq!(config.server.sweep_interval_seconds, 5);
        assert!(!config.server.require_api_key);
        assert_eq!(config.agent.daemon_port, 7601);
        assert_eq!(config.agent.batch_interval_seconds, 5);
        assert_eq!(config.agent.request_timeout_seconds, 30);
        assert!(config.agent.max_batch_size.is_none());
        assert!(!config.agent.enable_compression);
    }

    #[test]
    fn test_tls_verification_knobs() {
        let agent = AgentConfig::default();
        assert!(agent.tls_verify);
        assert!(!agent.accept_invalid_certs());

        let skipping = AgentConfig {
            tls_insecure_skip_verify: true,
            ..AgentConfig::default()
        };
        assert!(skipping.accept_invalid_certs());

        let unverified = AgentConfig {
            tls_verify: false,
            ..AgentConfig::default()
        };
        assert!(unverified.accept_invalid_certs());
    }

    #[test]
    fn test_thresholds_derive_from_single_knob() {
        let server = ServerConfig {
            heartbeat_timeout_seconds: 30,
            ..ServerConfig::default()
        };
        assert_eq!(server.suspend_threshold(), Duration::seconds(30));
        assert_eq!(server.hung_threshold(), Duration::seconds(30));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            server_port = 9000
            api_key = "secret"
            require_api_key = true

            [agent]
            enable_compression = true
            "#,
        )
        .unwrap();
        assert_eq!(config.server.server_port, 9000);
        assert_eq!(config.server.api_key.as_deref(), Some("secret"));
        assert!(config.server.require_api_key);
        assert_eq!(config.server.retention_days, 365);
        assert!(config.agent.enable_compression);
        assert_eq!(config.agent.daemon_port, 7601);
    }

    #[test]
    fn test_explicit_config_file_resolution() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nserver_port = 8123\n").unwrap();
        let config = resolve_config(Some(&path)).unwrap();
        assert_eq!(config.server.server_port, 8123);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(resolve_config(Some(&path)).is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not valid toml [").unwrap();
        assert!(resolve_config(Some(&path)).is_err());
    }
}
