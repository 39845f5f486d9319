//! Codec for presence feed frames and messaging API envelopes.
//!
//! Feed frames travel as one JSON document per WebSocket text message. API
//! responses are decoded from the raw response body so that a malformed body
//! surfaces as a `ProtocolError` rather than a transport failure.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::api::ApiResponse;
use crate::feed::FeedFrame;

/// Maximum feed frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode a feed frame to its JSON text.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &FeedFrame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a feed frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large, empty, or not a valid frame.
pub fn decode(text: &str) -> Result<FeedFrame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    if text.trim().is_empty() {
        return Err(ProtocolError::Invalid("empty frame".to_string()));
    }

    Ok(serde_json::from_str(text)?)
}

/// Decode an API response envelope from a response body.
///
/// # Errors
///
/// Returns an error if the body is not a JSON envelope with a boolean `ok`.
pub fn decode_response<T: DeserializeOwned>(body: &[u8]) -> Result<ApiResponse<T>, ProtocolError> {
    Ok(serde_json::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::UpdatesResponse;
    use crate::feed::{Member, VoiceChannel};

    #[test]
    fn test_encode_decode_roundtrip() {
        let frames = vec![
            FeedFrame::voice_state(
                Member::new(42, "bob").with_display_name("Bob"),
                Some(VoiceChannel::new(1, "Lounge")),
                Some(VoiceChannel::new(2, "Study")),
            ),
            FeedFrame::subscription(Member::new(7, "eve"), false),
            FeedFrame::subscription_result(7, false, "already unsubscribed"),
            FeedFrame::error("bad frame"),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        match decode(r#"{"type": "kick", "member": {"id": 1, "name": "x"}}"#) {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(decode("  "), Err(ProtocolError::Invalid(_))));
    }

    #[test]
    fn test_frame_too_large() {
        let frame = FeedFrame::error("x".repeat(MAX_FRAME_SIZE + 1));

        match encode(&frame) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_updates_response() {
        let body = br#"{"ok": true, "result": [
            {"update_id": 5, "message": {"text": "/start", "chat": {"id": 11}}},
            {"update_id": 6}
        ]}"#;

        let response: UpdatesResponse = decode_response(body).unwrap();
        let ids: Vec<i64> = response.updates().iter().map(|u| u.update_id).collect();
        assert_eq!(ids, vec![5, 6]);
    }

    #[test]
    fn test_decode_response_requires_ok() {
        let result: Result<ApiResponse<serde_json::Value>, _> = decode_response(b"{\"result\": 1}");
        assert!(result.is_err());
    }
}
