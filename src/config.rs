//! Configuration file shape and loading.
//!
//! Out of scope for the core per the specification, but its shape is load
//! bearing: the dispatcher, fetcher, and listeners are all constructed from
//! a parsed [`Config`].

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration file shape, matching `config.toml`.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Initial process log level (`trace`, `debug`, `info`, `warn`, `error`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Control socket settings.
    #[serde(default)]
    pub control_server: ControlServerConfig,
    /// Outbound HTTP client timeouts and pool sizing.
    #[serde(default)]
    pub http_client: HttpClientSection,
    /// One entry per listener.
    pub servers: Vec<ServerConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Control socket configuration.
#[derive(Debug, Deserialize)]
pub struct ControlServerConfig {
    /// Whether the control socket is started at all.
    #[serde(default)]
    pub enabled: bool,
    /// `"unix"` or `"tcp"`.
    #[serde(default = "default_network")]
    pub network: String,
    /// Socket path (`unix`) or address (`tcp`).
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ControlServerConfig {
    fn default() -> Self {
        Self { enabled: false, network: default_network(), bind: default_bind() }
    }
}

fn default_network() -> String {
    "unix".to_string()
}

fn default_bind() -> String {
    "/tmp/proxy.sock".to_string()
}

/// Outbound HTTP client timeouts and pool sizing, as read from TOML.
/// Duration fields accept human-readable strings ("30s", "2m") via
/// `humantime_serde`.
#[derive(Debug, Deserialize)]
pub struct HttpClientSection {
    /// TCP connect timeout.
    #[serde(with = "humantime_serde", default = "default_timeout_tcp")]
    pub timeout_tcp: Duration,
    /// TLS handshake timeout.
    #[serde(with = "humantime_serde", default = "default_timeout_tls")]
    pub timeout_tls: Duration,
    /// Time to wait for response headers.
    #[serde(with = "humantime_serde", default = "default_timeout_headers")]
    pub timeout_headers: Duration,
    /// Idle pooled connection lifetime.
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,
    /// Maximum idle connections kept per host.
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,
}

impl Default for HttpClientSection {
    fn default() -> Self {
        Self {
            timeout_tcp: default_timeout_tcp(),
            timeout_tls: default_timeout_tls(),
            timeout_headers: default_timeout_headers(),
            idle_timeout: default_idle_timeout(),
            max_idle_conns: default_max_idle_conns(),
        }
    }
}

fn default_timeout_tcp() -> Duration {
    Duration::from_secs(5)
}
fn default_timeout_tls() -> Duration {
    Duration::from_secs(5)
}
fn default_timeout_headers() -> Duration {
    Duration::from_secs(10)
}
fn default_idle_timeout() -> Duration {
    Duration::from_secs(90)
}
fn default_max_idle_conns() -> usize {
    100
}

impl From<&HttpClientSection> for crate::fetcher::HttpClientConfig {
    fn from(section: &HttpClientSection) -> Self {
        Self {
            timeout_tcp: section.timeout_tcp,
            timeout_tls: section.timeout_tls,
            timeout_headers: section.timeout_headers,
            idle_timeout: section.idle_timeout,
            max_idle_conns: section.max_idle_conns,
        }
    }
}

/// One listener and its routes.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address this listener binds to.
    pub bind: String,
    /// Routes served by this listener.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// One route entry within a [`ServerConfig`].
#[derive(Debug, Deserialize)]
pub struct RouteConfig {
    /// Upstream base URL this route forwards to.
    pub target: String,
    /// Path prefix this route matches.
    pub path: String,
    /// If present, only these response headers are forwarded.
    #[serde(default)]
    pub keep_headers: Option<HashSet<String>>,
    /// If present, these response headers are stripped.
    #[serde(default)]
    pub drop_headers: Option<HashSet<String>>,
    /// If present and positive, this route is cached with this TTL.
    #[serde(default, with = "humantime_serde::option")]
    pub time_to_live: Option<Duration>,
}

/// Reads and parses the configuration file at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path_ref = path.as_ref();
    let contents = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.display().to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path_ref.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let toml = r#"
            [[servers]]
            bind = "127.0.0.1:8080"

            [[servers.routes]]
            target = "http://localhost:9000"
            path = "/api/"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(!config.control_server.enabled);
        assert_eq!(config.http_client.max_idle_conns, 100);
        assert_eq!(config.servers[0].routes[0].time_to_live, None);
    }

    #[test]
    fn route_with_ttl_and_header_policy_parses() {
        let toml = r#"
            [[servers]]
            bind = "127.0.0.1:8080"

            [[servers.routes]]
            target = "http://localhost:9000"
            path = "/api/"
            keep_headers = ["Content-Type"]
            time_to_live = "30s"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let route = &config.servers[0].routes[0];
        assert_eq!(route.time_to_live, Some(Duration::from_secs(30)));
        assert!(route.keep_headers.as_ref().unwrap().contains("Content-Type"));
    }

    #[test]
    fn load_reports_read_error_for_missing_file() {
        let err = load("/nonexistent/config.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
