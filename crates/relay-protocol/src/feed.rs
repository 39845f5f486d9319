//! Presence feed frames.
//!
//! The presence source pushes one JSON object per WebSocket text message,
//! tagged by `type`. Voice state frames describe a member's channel before and
//! after a transition; subscription frames carry a member's opt-in toggle.
//! Stats frames ask for the relay counts.

use serde::{Deserialize, Serialize};

/// A member of the voice presence source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member identity.
    pub id: u64,
    /// Account name.
    pub name: String,
    /// Server-specific display name, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Member {
    /// Create a member without a display name.
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            display_name: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// The name shown to people: display name, falling back to the account name.
    #[must_use]
    pub fn shown_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.name)
    }
}

/// A voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceChannel {
    pub id: u64,
    pub name: String,
}

impl VoiceChannel {
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A presence feed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedFrame {
    /// A member's voice channel changed (or was re-reported).
    VoiceState {
        member: Member,
        #[serde(default)]
        before: Option<VoiceChannel>,
        #[serde(default)]
        after: Option<VoiceChannel>,
    },

    /// A member asks to be subscribed or unsubscribed.
    Subscription { member: Member, subscribe: bool },

    /// Reply to a subscription frame.
    SubscriptionResult {
        member_id: u64,
        changed: bool,
        message: String,
    },

    /// Ask for relay counts.
    Stats,

    /// Reply to a stats frame.
    StatsResult {
        subscribers: usize,
        destinations: usize,
        message: String,
        info: String,
    },

    /// The previous frame could not be handled.
    Error { message: String },
}

impl FeedFrame {
    /// Create a voice state frame.
    #[must_use]
    pub fn voice_state(
        member: Member,
        before: Option<VoiceChannel>,
        after: Option<VoiceChannel>,
    ) -> Self {
        Self::VoiceState {
            member,
            before,
            after,
        }
    }

    /// Create a subscription request frame.
    #[must_use]
    pub fn subscription(member: Member, subscribe: bool) -> Self {
        Self::Subscription { member, subscribe }
    }

    /// Create a subscription result frame.
    #[must_use]
    pub fn subscription_result(member_id: u64, changed: bool, message: impl Into<String>) -> Self {
        Self::SubscriptionResult {
            member_id,
            changed,
            message: message.into(),
        }
    }

    /// Create a stats result frame.
    #[must_use]
    pub fn stats_result(
        subscribers: usize,
        destinations: usize,
        message: impl Into<String>,
        info: impl Into<String>,
    ) -> Self {
        Self::StatsResult {
            subscribers,
            destinations,
            message: message.into(),
            info: info.into(),
        }
    }

    /// Create an error frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The member this frame is about, if any.
    #[must_use]
    pub fn member(&self) -> Option<&Member> {
        match self {
            Self::VoiceState { member, .. } | Self::Subscription { member, .. } => Some(member),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shown_name_prefers_display_name() {
        let member = Member::new(1, "alice").with_display_name("Alice A.");
        assert_eq!(member.shown_name(), "Alice A.");

        let member = Member::new(1, "alice").with_display_name("");
        assert_eq!(member.shown_name(), "alice");

        assert_eq!(Member::new(2, "bob").shown_name(), "bob");
    }

    #[test]
    fn test_voice_state_wire_shape() {
        let frame: FeedFrame = serde_json::from_str(
            r#"{
                "type": "voice_state",
                "member": {"id": 42, "name": "bob"},
                "before": {"id": 1, "name": "Lounge"},
                "after": null
            }"#,
        )
        .unwrap();

        assert_eq!(
            frame,
            FeedFrame::voice_state(
                Member::new(42, "bob"),
                Some(VoiceChannel::new(1, "Lounge")),
                None
            )
        );
    }

    #[test]
    fn test_voice_state_missing_channels_default_to_none() {
        let frame: FeedFrame =
            serde_json::from_str(r#"{"type": "voice_state", "member": {"id": 7, "name": "x"}}"#)
                .unwrap();

        match frame {
            FeedFrame::VoiceState { before, after, .. } => {
                assert!(before.is_none());
                assert!(after.is_none());
            }
            other => panic!("Expected VoiceState, got {:?}", other),
        }
    }

    #[test]
    fn test_result_frame_tag() {
        let value = serde_json::to_value(FeedFrame::subscription_result(3, true, "ok")).unwrap();
        assert_eq!(value["type"], "subscription_result");
        assert_eq!(value["member_id"], 3);
    }

    #[test]
    fn test_stats_frames() {
        let frame: FeedFrame = serde_json::from_str(r#"{"type": "stats"}"#).unwrap();
        assert_eq!(frame, FeedFrame::Stats);
        assert!(frame.member().is_none());

        let value = serde_json::to_value(FeedFrame::stats_result(2, 5, "counts", "info")).unwrap();
        assert_eq!(value["type"], "stats_result");
        assert_eq!(value["subscribers"], 2);
        assert_eq!(value["destinations"], 5);
        assert_eq!(value["info"], "info");
    }
}
