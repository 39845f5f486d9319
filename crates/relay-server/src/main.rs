//! # Voice Relay
//!
//! Relays voice channel presence events to registered Telegram chats.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file in the working directory
//! voice-relay
//!
//! # Run with a specific config file
//! RELAY_CONFIG=/path/to/voice-relay.toml voice-relay
//!
//! # Run with environment variables
//! TG_TOKEN=123:abc RELAY_FEED_PORT=7070 voice-relay
//! ```

mod config;
mod handlers;
mod metrics;
mod polling;
mod supervisor;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "voice_relay=info,voice_relay_core=info,voice_relay_transport=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;
    config.validate()?;

    tracing::info!(
        "Starting voice relay, presence feed on {}:{}{}",
        config.feed.host,
        config.feed.port,
        config.feed.path
    );

    // Install the exporter before describing metrics
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }
    metrics::init_metrics();

    supervisor::run(config).await
}
