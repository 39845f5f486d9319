//! # voice-relay-protocol
//!
//! Wire types for the voice presence relay.
//!
//! Two protocols meet in the relay:
//!
//! - **Messaging API** - the JSON-over-HTTPS bot API used to send chat messages
//!   and long-poll for inbound commands (`api` module)
//! - **Presence feed** - JSON frames pushed by the voice presence source over a
//!   WebSocket, carrying voice state transitions and subscription requests
//!   (`feed` module)
//!
//! ## Example
//!
//! ```rust
//! use voice_relay_protocol::{codec, FeedFrame, Member};
//!
//! let frame = FeedFrame::subscription(Member::new(42, "alice"), true);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod api;
pub mod codec;
pub mod feed;

pub use api::{
    ApiResponse, Chat, ChatId, GetUpdatesRequest, IncomingMessage, SendMessageRequest, Update,
    UpdatesResponse,
};
pub use codec::{decode, decode_response, encode, ProtocolError};
pub use feed::{FeedFrame, Member, VoiceChannel};
