//! Messaging API wire types.
//!
//! Only the subset of the bot API the relay touches is modelled: `sendMessage`
//! and `getUpdates` requests, the `{"ok": .., "result": ..}` envelope, and the
//! parts of an update needed to route a command.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Method name for sending a chat message.
pub const SEND_MESSAGE: &str = "sendMessage";

/// Method name for long-polling inbound updates.
pub const GET_UPDATES: &str = "getUpdates";

/// Default parse mode for outbound messages.
pub const PARSE_MODE_MARKDOWN: &str = "Markdown";

/// Chat identifier.
///
/// The API sends chat ids as JSON integers but accepts both integers and
/// strings. Ids are kept as their exact decimal text; `-100123` and `100123`
/// are different chats and no normalisation is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawChatId", into = "String")]
pub struct ChatId(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChatId {
    Int(i64),
    Str(String),
}

impl From<RawChatId> for ChatId {
    fn from(raw: RawChatId) -> Self {
        match raw {
            RawChatId::Int(id) => Self(id.to_string()),
            RawChatId::Str(id) => Self(id),
        }
    }
}

impl From<ChatId> for String {
    fn from(id: ChatId) -> Self {
        id.0
    }
}

impl ChatId {
    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `sendMessage` request body.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    pub disable_web_page_preview: bool,
    pub parse_mode: &'a str,
}

impl<'a> SendMessageRequest<'a> {
    /// Create a Markdown message with link previews disabled.
    #[must_use]
    pub fn new(chat_id: &'a str, text: &'a str) -> Self {
        Self {
            chat_id,
            text,
            disable_web_page_preview: true,
            parse_mode: PARSE_MODE_MARKDOWN,
        }
    }
}

/// `getUpdates` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetUpdatesRequest {
    pub offset: i64,
    /// Server-side long-poll timeout in seconds.
    pub timeout: u64,
    pub allowed_updates: Vec<String>,
}

impl GetUpdatesRequest {
    /// Request message updates only, starting at `offset`.
    #[must_use]
    pub fn messages(offset: i64, timeout: u64) -> Self {
        Self {
            offset,
            timeout,
            allowed_updates: vec!["message".to_string()],
        }
    }
}

/// Response envelope shared by every API method.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

/// Envelope returned by `getUpdates`.
pub type UpdatesResponse = ApiResponse<Vec<Update>>;

impl UpdatesResponse {
    /// Updates carried by a successful response, in the order received.
    #[must_use]
    pub fn updates(&self) -> &[Update] {
        match (&self.ok, &self.result) {
            (true, Some(updates)) => updates,
            _ => &[],
        }
    }
}

/// One inbound update.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

/// An inbound chat message.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub chat: Option<Chat>,
}

/// The chat a message was sent in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

impl Update {
    /// Trimmed message text, empty when the update carries none.
    #[must_use]
    pub fn command_text(&self) -> &str {
        self.message
            .as_ref()
            .and_then(|m| m.text.as_deref())
            .map(str::trim)
            .unwrap_or_default()
    }

    /// The chat the update came from, if any.
    #[must_use]
    pub fn chat_id(&self) -> Option<&ChatId> {
        self.message.as_ref()?.chat.as_ref().map(|c| &c.id)
    }
}
