//! Messaging API abstraction.
//!
//! The router and the polling loop talk to the messaging platform only through
//! [`MessagingApi`], so the HTTP client can be swapped for a double in tests.

use async_trait::async_trait;
use thiserror::Error;
use voice_relay_protocol::{ProtocolError, UpdatesResponse};

/// Maximum outbound message length, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Transport errors.
///
/// These never cross the [`MessagingApi`] boundary; they are logged and turned
/// into failure sentinels there.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The call did not complete within its bound.
    #[error("Request timed out")]
    Timeout,

    /// Connection or request failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("Unexpected status {0}")]
    Status(u16),

    /// The client was closed.
    #[error("Client closed")]
    Closed,

    /// The response body could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Validate outbound message text.
///
/// # Errors
///
/// Returns an error message if the text is empty or longer than `max_len`
/// characters.
pub fn validate_message_text(text: &str, max_len: usize) -> Result<(), &'static str> {
    if text.is_empty() {
        return Err("Message text cannot be empty");
    }
    if text.chars().count() > max_len {
        return Err("Message text too long");
    }
    Ok(())
}

/// Outbound messaging API.
///
/// Failure is routine: implementations log it and return `false` / `None`
/// instead of an error.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    /// Send `text` to a chat.
    ///
    /// Returns `true` only if the API acknowledged the message. Empty text or
    /// text over the platform ceiling is rejected without a network call.
    async fn send_message(&self, chat_id: &str, text: &str) -> bool;

    /// Long-poll for message updates starting at `offset`.
    ///
    /// Returns `None` if the call failed.
    async fn get_updates(&self, offset: i64) -> Option<UpdatesResponse>;

    /// Release any pooled connections. Later calls fail.
    async fn close(&self) {}
}
