//! # voice-relay-transport
//!
//! Outbound messaging layer for the voice presence relay.
//!
//! - **`MessagingApi`** - the seam the router and polling loop depend on
//! - **`RateLimiter`** - global minimum spacing between outbound calls
//! - **`BotApiClient`** - reqwest-backed implementation with a lazily opened,
//!   bounded connection pool and per-call timeouts
//!
//! Failures never escape as errors: `send_message` returns `false` and
//! `get_updates` returns `None`, after logging the cause.
//!
//! ```rust,ignore
//! use voice_relay_transport::{BotApiClient, BotApiConfig, MessagingApi};
//!
//! let client = BotApiClient::new(BotApiConfig::new(token));
//! if !client.send_message("12345", "hello").await {
//!     // already logged; treat as routine
//! }
//! client.close().await;
//! ```

pub mod http;
pub mod limiter;
pub mod traits;

pub use http::{BotApiClient, BotApiConfig};
pub use limiter::RateLimiter;
pub use traits::{validate_message_text, MessagingApi, TransportError, MAX_MESSAGE_LENGTH};
