//! Relay configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RELAY_*)
//! - TOML configuration file (`RELAY_CONFIG`, then the default search paths)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use voice_relay_core::{RouterConfig, DESTINATIONS_FILE, MESSAGES_FILE, SUBSCRIBERS_FILE};
use voice_relay_transport::{BotApiConfig, MAX_MESSAGE_LENGTH};

/// Relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Messaging API configuration.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Persisted state and message catalog locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Presence feed listener.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Liveness reporter.
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Shutdown behaviour.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Messaging API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token. Required.
    #[serde(default = "default_token")]
    pub token: String,

    /// API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Minimum spacing between outbound calls in milliseconds.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Total timeout of one call in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Server-side long-poll timeout in seconds.
    #[serde(default = "default_long_poll")]
    pub long_poll_secs: u64,

    /// Maximum simultaneous API connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Platform message ceiling in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Pause between polling iterations in milliseconds.
    #[serde(default = "default_poll_idle")]
    pub poll_idle_ms: u64,

    /// Pause after a failed polling iteration in milliseconds.
    #[serde(default = "default_poll_backoff")]
    pub poll_backoff_ms: u64,
}

/// File locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Registered destinations.
    #[serde(default = "default_destinations_path")]
    pub destinations_path: PathBuf,

    /// Subscribed members.
    #[serde(default = "default_subscribers_path")]
    pub subscribers_path: PathBuf,

    /// Message catalog.
    #[serde(default = "default_messages_path")]
    pub messages_path: PathBuf,
}

/// Presence feed listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Host to bind to.
    #[serde(default = "default_feed_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_feed_port")]
    pub port: u16,

    /// Path of the WebSocket endpoint.
    #[serde(default = "default_feed_path")]
    pub path: String,
}

/// Liveness reporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Report interval in seconds.
    #[serde(default = "default_liveness_interval")]
    pub interval_secs: u64,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long each task gets to stop after cancellation, in milliseconds.
    #[serde(default = "default_grace")]
    pub grace_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// Default value functions
fn default_token() -> String {
    std::env::var("RELAY_TELEGRAM_TOKEN")
        .or_else(|_| std::env::var("TG_TOKEN"))
        .unwrap_or_default()
}

fn default_api_base_url() -> String {
    std::env::var("RELAY_API_BASE_URL").unwrap_or_else(|_| "https://api.telegram.org".to_string())
}

fn default_min_interval() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    15_000
}

fn default_long_poll() -> u64 {
    30
}

fn default_max_connections() -> usize {
    10
}

fn default_max_message_length() -> usize {
    MAX_MESSAGE_LENGTH
}

fn default_poll_idle() -> u64 {
    100
}

fn default_poll_backoff() -> u64 {
    1_000
}

fn default_destinations_path() -> PathBuf {
    std::env::var("RELAY_DESTINATIONS_PATH")
        .unwrap_or_else(|_| DESTINATIONS_FILE.to_string())
        .into()
}

fn default_subscribers_path() -> PathBuf {
    std::env::var("RELAY_SUBSCRIBERS_PATH")
        .unwrap_or_else(|_| SUBSCRIBERS_FILE.to_string())
        .into()
}

fn default_messages_path() -> PathBuf {
    std::env::var("RELAY_MESSAGES_PATH")
        .unwrap_or_else(|_| MESSAGES_FILE.to_string())
        .into()
}

fn default_feed_host() -> String {
    std::env::var("RELAY_FEED_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_feed_port() -> u16 {
    env_parse("RELAY_FEED_PORT").unwrap_or(7070)
}

fn default_feed_path() -> String {
    "/feed".to_string()
}

fn default_liveness_interval() -> u64 {
    60
}

fn default_grace() -> u64 {
    5_000
}

fn default_metrics_enabled() -> bool {
    env_parse("RELAY_METRICS_ENABLED").unwrap_or(false)
}

fn default_metrics_port() -> u16 {
    env_parse("RELAY_METRICS_PORT").unwrap_or(9090)
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: default_token(),
            api_base_url: default_api_base_url(),
            min_interval_ms: default_min_interval(),
            request_timeout_ms: default_request_timeout(),
            long_poll_secs: default_long_poll(),
            max_connections: default_max_connections(),
            max_message_length: default_max_message_length(),
            poll_idle_ms: default_poll_idle(),
            poll_backoff_ms: default_poll_backoff(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            destinations_path: default_destinations_path(),
            subscribers_path: default_subscribers_path(),
            messages_path: default_messages_path(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: default_feed_host(),
            port: default_feed_port(),
            path: default_feed_path(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_liveness_interval(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// `RELAY_CONFIG` names a file that cannot be read.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("RELAY_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = [
            "voice-relay.toml",
            "/etc/voice-relay/voice-relay.toml",
            "~/.config/voice-relay/voice-relay.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check settings the relay cannot start without.
    ///
    /// # Errors
    ///
    /// Returns an error if the bot token is missing or the feed path is not
    /// absolute.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.token.trim().is_empty() {
            bail!("No bot token configured: set telegram.token, RELAY_TELEGRAM_TOKEN or TG_TOKEN");
        }
        if !self.feed.path.starts_with('/') {
            bail!("feed.path must start with '/': {}", self.feed.path);
        }
        Ok(())
    }

    /// Get the socket address the presence feed binds to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn feed_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.feed.host, self.feed.port)
            .parse()
            .with_context(|| format!("Invalid feed address {}:{}", self.feed.host, self.feed.port))
    }

    /// Messaging API client settings.
    #[must_use]
    pub fn bot_api_config(&self) -> BotApiConfig {
        let telegram = &self.telegram;
        BotApiConfig {
            base_url: telegram.api_base_url.trim_end_matches('/').to_string(),
            token: telegram.token.trim().to_string(),
            min_interval: Duration::from_millis(telegram.min_interval_ms),
            request_timeout: Duration::from_millis(telegram.request_timeout_ms),
            long_poll: Duration::from_secs(telegram.long_poll_secs),
            max_connections: telegram.max_connections,
            max_message_length: telegram.max_message_length,
        }
    }

    /// Router settings.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_message_length: self.telegram.max_message_length,
            ..RouterConfig::default()
        }
    }

    /// Pause between polling iterations.
    #[must_use]
    pub fn poll_idle(&self) -> Duration {
        Duration::from_millis(self.telegram.poll_idle_ms)
    }

    /// Pause after a failed polling iteration.
    #[must_use]
    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.telegram.poll_backoff_ms)
    }

    /// Liveness report interval.
    #[must_use]
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness.interval_secs.max(1))
    }

    /// Per-task shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown.grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.telegram.min_interval_ms, 300);
        assert_eq!(config.telegram.request_timeout_ms, 15_000);
        assert_eq!(config.telegram.long_poll_secs, 30);
        assert_eq!(config.telegram.max_connections, 10);
        assert_eq!(config.telegram.max_message_length, 4096);
        assert_eq!(config.feed.path, "/feed");
        assert_eq!(config.liveness.interval_secs, 60);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.poll_idle(), Duration::from_millis(100));
        assert_eq!(config.poll_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [telegram]
            token = "123:abc"
            api_base_url = "http://localhost:8081/"
            min_interval_ms = 50

            [feed]
            host = "0.0.0.0"
            port = 9000

            [storage]
            destinations_path = "/var/lib/voice-relay/chat_ids.json"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.telegram.token, "123:abc");
        assert_eq!(config.feed_addr().unwrap().port(), 9000);
        assert_eq!(
            config.storage.destinations_path,
            PathBuf::from("/var/lib/voice-relay/chat_ids.json")
        );
        assert_eq!(config.telegram.long_poll_secs, 30);

        let api = config.bot_api_config();
        assert_eq!(api.base_url, "http://localhost:8081");
        assert_eq!(api.min_interval, Duration::from_millis(50));
        assert_eq!(api.poll_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_validate_requires_token() {
        let config: Config = toml::from_str("[telegram]\ntoken = \"  \"").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[telegram]\ntoken = \"123:abc\"").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_feed_path() {
        let config: Config =
            toml::from_str("[telegram]\ntoken = \"t\"\n[feed]\npath = \"feed\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_feed_addr() {
        let config: Config = toml::from_str("[feed]\nhost = \"not a host\"").unwrap();
        assert!(config.feed_addr().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice-relay.toml");
        std::fs::write(&path, "[liveness]\ninterval_secs = 5\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.liveness_interval(), Duration::from_secs(5));

        std::fs::write(&path, "[liveness\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
