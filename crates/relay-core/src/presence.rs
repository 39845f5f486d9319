//! Voice presence model.
//!
//! A presence event reports a member's voice channel before and after a state
//! change. Only three transitions are forwarded: joined, left and moved.
//! Re-reports of the same channel (mute, deafen, stream toggles) carry no
//! transition.

use dashmap::DashMap;
use voice_relay_protocol::{Member, VoiceChannel};

/// A voice presence event from the presence source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub member: Member,
    pub before: Option<VoiceChannel>,
    pub after: Option<VoiceChannel>,
}

impl PresenceEvent {
    /// Create a presence event.
    #[must_use]
    pub fn new(member: Member, before: Option<VoiceChannel>, after: Option<VoiceChannel>) -> Self {
        Self {
            member,
            before,
            after,
        }
    }

    /// The transition this event describes, if any.
    #[must_use]
    pub fn transition(&self) -> Option<Transition<'_>> {
        Transition::classify(self.before.as_ref(), self.after.as_ref())
    }
}

/// A recognised voice channel transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<'a> {
    /// Not in a channel before, in one now.
    Joined { channel: &'a VoiceChannel },
    /// In a channel before, in none now.
    Left { channel: &'a VoiceChannel },
    /// In a different channel than before.
    Moved {
        from: &'a VoiceChannel,
        to: &'a VoiceChannel,
    },
}

impl<'a> Transition<'a> {
    /// Classify a before/after pair. Channels are compared by id.
    #[must_use]
    pub fn classify(
        before: Option<&'a VoiceChannel>,
        after: Option<&'a VoiceChannel>,
    ) -> Option<Self> {
        match (before, after) {
            (None, Some(channel)) => Some(Self::Joined { channel }),
            (Some(channel), None) => Some(Self::Left { channel }),
            (Some(from), Some(to)) if from.id != to.id => Some(Self::Moved { from, to }),
            _ => None,
        }
    }

    /// Template key under `telegram.voice_events`.
    #[must_use]
    pub fn template_key(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::Left { .. } => "left",
            Self::Moved { .. } => "moved",
        }
    }

    /// The channel named in the notification: the one joined, left, or moved into.
    #[must_use]
    pub fn channel(&self) -> &'a VoiceChannel {
        match self {
            Self::Joined { channel } | Self::Left { channel } => channel,
            Self::Moved { to, .. } => to,
        }
    }
}

/// Resolves member identities to display names.
pub trait MemberDirectory: Send + Sync {
    /// The member's display name, if known.
    fn display_name(&self, member_id: u64) -> Option<String>;
}

/// Directory of members seen on the presence feed.
#[derive(Debug, Default)]
pub struct MemberCache {
    names: DashMap<u64, String>,
}

impl MemberCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or refresh) a member's shown name.
    pub fn remember(&self, member: &Member) {
        self.names.insert(member.id, member.shown_name().to_string());
    }

    /// Number of known members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no member is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl MemberDirectory for MemberCache {
    fn display_name(&self, member_id: u64) -> Option<String> {
        self.names.get(&member_id).map(|name| name.clone())
    }
}
