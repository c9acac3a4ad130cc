//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use courier_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAX_MESSAGE_LENGTH};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API and websocket endpoint.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Directory holding conversation documents and the presence snapshot.
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Maximum message body length in characters. Longer messages are
    /// rejected, never truncated.
    /// Env: `MAX_MESSAGE_LENGTH`
    /// Default: `2000`
    pub max_message_length: usize,

    /// Presence records without a live connection are pruned once their
    /// `lastSeen` is older than this.
    /// Env: `PRESENCE_STALE_SECS`
    /// Default: `300`
    pub presence_stale_after: Duration,

    /// How often the presence maintenance task runs.
    /// Env: `PRESENCE_SWEEP_SECS`
    /// Default: `60`
    pub presence_sweep_interval: Duration,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Courier"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            data_dir: PathBuf::from("./data"),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            presence_stale_after: Duration::from_secs(300),
            presence_sweep_interval: Duration::from_secs(60),
            instance_name: "Courier".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Some(parsed) = parse_or_warn::<SocketAddr>("HTTP_ADDR", &addr) {
                config.http_addr = parsed;
            }
        }

        if let Some(path) = lookup("DATA_DIR") {
            if !path.trim().is_empty() {
                config.data_dir = PathBuf::from(path);
            }
        }

        if let Some(val) = lookup("MAX_MESSAGE_LENGTH") {
            match parse_or_warn::<usize>("MAX_MESSAGE_LENGTH", &val) {
                Some(0) => tracing::warn!("MAX_MESSAGE_LENGTH must be positive, using default"),
                Some(n) => config.max_message_length = n,
                None => {}
            }
        }

        if let Some(val) = lookup("PRESENCE_STALE_SECS") {
            if let Some(secs) = parse_or_warn::<u64>("PRESENCE_STALE_SECS", &val) {
                config.presence_stale_after = Duration::from_secs(secs);
            }
        }

        if let Some(val) = lookup("PRESENCE_SWEEP_SECS") {
            match parse_or_warn::<u64>("PRESENCE_SWEEP_SECS", &val) {
                Some(0) => tracing::warn!("PRESENCE_SWEEP_SECS must be positive, using default"),
                Some(secs) => config.presence_sweep_interval = Duration::from_secs(secs),
                None => {}
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value, "Invalid configuration value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_message_length, 2000);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATA_DIR", "/var/lib/courier"),
            ("MAX_MESSAGE_LENGTH", "140"),
            ("PRESENCE_STALE_SECS", "30"),
            ("INSTANCE_NAME", "test node"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/courier"));
        assert_eq!(config.max_message_length, 140);
        assert_eq!(config.presence_stale_after, Duration::from_secs(30));
        assert_eq!(config.instance_name, "test node");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "nowhere"),
            ("MAX_MESSAGE_LENGTH", "0"),
            ("PRESENCE_SWEEP_SECS", "soon"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.max_message_length, defaults.max_message_length);
        assert_eq!(config.presence_sweep_interval, defaults.presence_sweep_interval);
    }
}
