//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::resolver::DEFAULT_EXCLUDED_PATHS;
use crate::http::request::{DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_HEADER_BYTES};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Backend the gateway protects.
    pub target: TargetConfig,

    /// Static token and user credentials.
    pub auth: AuthConfig,

    /// Browser session settings.
    pub session: SessionConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_connections: 10_000,
        }
    }
}

/// The protected backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Backend base URL. The socket adapter only uses its host and port.
    pub url: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost".to_string(),
        }
    }
}

/// Credentials accepted by the gateway.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Static API token for `Bearer`/`ApiKey`/empty-user `Basic`.
    /// A random token is generated at startup when unset.
    pub api_token: Option<String>,

    /// Username → password. Values starting with `$argon2` are PHC hashes.
    pub users: BTreeMap<String, String>,

    /// Paths forwarded without authentication.
    pub excluded_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            users: BTreeMap::new(),
            excluded_paths: DEFAULT_EXCLUDED_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .field("excluded_paths", &self.excluded_paths)
            .finish()
    }
}

/// Session lifetime and housekeeping.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hours a signed-in session stays valid.
    pub lifetime_hours: u64,

    /// Interval between sweeps of stale sessions, in seconds.
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime_hours: 24,
            sweep_interval_secs: 300,
        }
    }
}

/// Size limits applied while buffering a request for the auth decision.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum bytes for the request line plus headers.
    pub max_header_bytes: usize,

    /// Maximum request body buffered before deciding.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Time allowed for in-flight connections to finish on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.listener.bind_address, "0.0.0.0:3000");
        assert_eq!(config.session.lifetime(), Duration::from_secs(24 * 3600));
        assert_eq!(config.auth.excluded_paths, vec!["/favicon.ico".to_string()]);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [target]
            url = "http://127.0.0.1:8080"

            [auth]
            api_token = "abc"
            users = { demo = "test" }

            [session]
            lifetime_hours = 1

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.target.url, "http://127.0.0.1:8080");
        assert_eq!(config.auth.api_token.as_deref(), Some("abc"));
        assert_eq!(config.auth.users.get("demo").map(String::as_str), Some("test"));
        assert_eq!(config.auth.excluded_paths, vec!["/favicon.ico".to_string()]);
        assert_eq!(config.session.lifetime(), Duration::from_secs(3600));
        assert_eq!(config.session.sweep_interval_secs, 300);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.listener.max_connections, 10_000);
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut auth = AuthConfig::default();
        auth.api_token = Some("topsecret".into());
        auth.users.insert("demo".into(), "hunter2".into());
        let out = format!("{auth:?}");
        assert!(!out.contains("topsecret"));
        assert!(!out.contains("hunter2"));
        assert!(out.contains("demo"));
    }
}
