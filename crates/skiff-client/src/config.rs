//! Client configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use skiff_core::defaults::{
    DEFAULT_LISTEN, DEFAULT_POOL_IDLE_TIMEOUT_SECS, DEFAULT_POOL_INITIAL, DEFAULT_POOL_MAX,
    DEFAULT_POOL_MAX_IDLE, DEFAULT_POOL_MAX_LIFETIME_SECS, DEFAULT_TCP_KEEPALIVE_SECS,
    DEFAULT_TCP_NO_DELAY, DEFAULT_TIMEOUT_SECS,
};
use skiff_pool::PoolConfig;

use crate::error::ClientError;

/// Top-level client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client: ClientSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Core client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    /// Local SOCKS5 listen address, e.g. "127.0.0.1:1080".
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Remote relay server address, e.g. "example.com:9999".
    pub server: String,

    /// Shared password; session keys are derived from it at startup.
    pub password: String,

    /// Deadline in seconds for the post-error drain and the reuse
    /// negotiation at the end of each session.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection pool sizing and expiry.
    #[serde(default)]
    pub pool: PoolSettings,

    /// TLS configuration.
    #[serde(default)]
    pub tls: ClientTlsConfig,

    /// TCP socket options.
    #[serde(default)]
    pub tcp: TcpConfig,
}

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_pool_initial")]
    pub initial: usize,
    #[serde(default = "default_pool_max")]
    pub max: usize,
    #[serde(default = "default_pool_max_idle")]
    pub max_idle: usize,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_pool_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

impl PoolSettings {
    /// Convert to the pool crate's configuration type.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            initial: self.initial,
            max: self.max,
            max_idle: self.max_idle,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_lifetime: Duration::from_secs(self.max_lifetime_secs),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            initial: DEFAULT_POOL_INITIAL,
            max: DEFAULT_POOL_MAX,
            max_idle: DEFAULT_POOL_MAX_IDLE,
            idle_timeout_secs: DEFAULT_POOL_IDLE_TIMEOUT_SECS,
            max_lifetime_secs: DEFAULT_POOL_MAX_LIFETIME_SECS,
        }
    }
}

/// Client-side TLS configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientTlsConfig {
    /// TLS SNI hostname. Defaults to the host portion of `server`.
    pub sni: Option<String>,

    /// Skip certificate verification (for testing only).
    #[serde(default)]
    pub skip_verify: bool,

    /// Custom CA certificate path (PEM).
    pub ca: Option<String>,
}

/// TCP socket configuration options.
#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    /// Disable Nagle's algorithm (TCP_NODELAY) for lower latency.
    #[serde(default = "default_tcp_no_delay")]
    pub no_delay: bool,
    /// TCP Keep-Alive interval in seconds (0 = disabled).
    #[serde(default = "default_tcp_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            no_delay: DEFAULT_TCP_NO_DELAY,
            keepalive_secs: DEFAULT_TCP_KEEPALIVE_SECS,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Base log level ("trace".."error"). Defaults to "info".
    pub level: Option<String>,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Output stream.
    #[serde(default)]
    pub output: LogOutput,
    /// Per-module level overrides.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Log destination stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stderr,
    Stdout,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_pool_initial() -> usize {
    DEFAULT_POOL_INITIAL
}

fn default_pool_max() -> usize {
    DEFAULT_POOL_MAX
}

fn default_pool_max_idle() -> usize {
    DEFAULT_POOL_MAX_IDLE
}

fn default_pool_idle_timeout_secs() -> u64 {
    DEFAULT_POOL_IDLE_TIMEOUT_SECS
}

fn default_pool_max_lifetime_secs() -> u64 {
    DEFAULT_POOL_MAX_LIFETIME_SECS
}

fn default_tcp_no_delay() -> bool {
    DEFAULT_TCP_NO_DELAY
}

fn default_tcp_keepalive_secs() -> u64 {
    DEFAULT_TCP_KEEPALIVE_SECS
}

/// Load client configuration from a file path.
///
/// Supports TOML, JSON, and JSONC formats (detected by extension).
pub fn load_client_config(path: &std::path::Path) -> Result<ClientConfig, ClientError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ClientError::Config(format!("failed to read config: {e}")))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    let config: ClientConfig = match ext {
        "json" | "jsonc" => serde_json::from_str(&strip_jsonc_comments(&content))
            .map_err(|e| ClientError::Config(format!("JSON parse error: {e}")))?,
        _ => toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("TOML parse error: {e}")))?,
    };

    validate_config(&config)?;
    Ok(config)
}

/// Remove `//` line comments from JSONC input so serde_json can parse
/// it. Tracks string-literal and escape state while scanning, so a
/// comment marker inside a string value survives untouched.
fn strip_jsonc_comments(input: &str) -> String {
    enum Scan {
        Plain,
        InString,
        Escape,
    }

    let mut out = String::with_capacity(input.len());
    let mut state = Scan::Plain;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Scan::Plain => {
                if c == '/' && chars.peek() == Some(&'/') {
                    // Drop everything up to the line break.
                    for skipped in chars.by_ref() {
                        if skipped == '\n' {
                            out.push('\n');
                            break;
                        }
                    }
                    continue;
                }
                if c == '"' {
                    state = Scan::InString;
                }
                out.push(c);
            }
            Scan::InString => {
                state = match c {
                    '\\' => Scan::Escape,
                    '"' => Scan::Plain,
                    _ => Scan::InString,
                };
                out.push(c);
            }
            Scan::Escape => {
                state = Scan::InString;
                out.push(c);
            }
        }
    }

    out
}

/// Reject configurations that cannot work.
pub fn validate_config(config: &ClientConfig) -> Result<(), ClientError> {
    let client = &config.client;
    if client.server.is_empty() || !client.server.contains(':') {
        return Err(ClientError::Config(
            "client.server must be a host:port address".into(),
        ));
    }
    if client.password.is_empty() {
        return Err(ClientError::Config("client.password must not be empty".into()));
    }
    if client.pool.max == 0 {
        return Err(ClientError::Config("client.pool.max must be at least 1".into()));
    }
    if client.pool.initial > client.pool.max {
        return Err(ClientError::Config(
            "client.pool.initial must not exceed client.pool.max".into(),
        ));
    }
    Ok(())
}

/// A commented example configuration, printed by `--show-config-example`.
pub const EXAMPLE_CONFIG: &str = r#"[client]
listen = "127.0.0.1:1080"
server = "example.com:9999"
password = "change-me"
timeout_secs = 60

[client.pool]
initial = 10
max = 50
max_idle = 10
idle_timeout_secs = 300
max_lifetime_secs = 1800

[client.tls]
# sni = "example.com"
# ca = "/path/to/ca.pem"
skip_verify = false

[client.tcp]
no_delay = true
keepalive_secs = 300

[logging]
level = "info"
format = "pretty"
output = "stderr"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses_with_defaults() {
        let config: ClientConfig = toml::from_str(EXAMPLE_CONFIG).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.client.listen, "127.0.0.1:1080");
        assert_eq!(config.client.pool.max, 50);
        assert_eq!(config.logging.level.as_deref(), Some("info"));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.output, LogOutput::Stderr);
    }

    #[test]
    fn jsonc_comments_are_stripped() {
        let input = r#"{
            // leading comment
            "client": { "server": "relay.example.com:443" } // trailing
        }"#;
        let stripped = strip_jsonc_comments(input);
        assert!(!stripped.contains("comment"));
        assert!(!stripped.contains("trailing"));
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["client"]["server"], "relay.example.com:443");
    }

    #[test]
    fn jsonc_stripper_keeps_slashes_inside_strings() {
        let input = r#"{ "ca": "//ca/path.pem", "note": "say \"//\" here" }"#;
        let stripped = strip_jsonc_comments(input);
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["ca"], "//ca/path.pem");
        assert_eq!(value["note"], "say \"//\" here");
    }

    #[test]
    fn jsonc_config_loads() {
        let stripped = strip_jsonc_comments(
            r#"{
                "client": {
                    "server": "relay.example.com:443", // the relay
                    "password": "secret"
                }
            }"#,
        );
        let config: ClientConfig = serde_json::from_str(&stripped).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.client.server, "relay.example.com:443");
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [client]
            server = "relay.example.com:443"
            password = "secret"
            "#,
        )
        .unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.client.listen, DEFAULT_LISTEN);
        assert_eq!(config.client.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.client.pool.initial, DEFAULT_POOL_INITIAL);
        assert!(config.client.tcp.no_delay);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut config: ClientConfig = toml::from_str(
            r#"
            [client]
            server = "relay.example.com:443"
            password = "secret"
            "#,
        )
        .unwrap();

        config.client.server = "no-port".into();
        assert!(validate_config(&config).is_err());

        config.client.server = "relay.example.com:443".into();
        config.client.password = String::new();
        assert!(validate_config(&config).is_err());

        config.client.password = "secret".into();
        config.client.pool.initial = 100;
        assert!(validate_config(&config).is_err());
    }
}
