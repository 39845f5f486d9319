//! # voice-relay-core
//!
//! State and routing for the voice presence relay.
//!
//! - **Store** - crash-safe JSON persistence for the destination and
//!   subscriber sets
//! - **Template** - key-path message catalog with `{name}` placeholders
//! - **Presence** - voice state events and the joined/left/moved transitions
//! - **Router** - command handling, subscription toggles and broadcast fan-out
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────┐
//! │ Presence feed│────▶│   Router    │────▶│ MessagingApi │
//! └──────────────┘     └─────────────┘     └──────────────┘
//! ┌──────────────┐            │
//! │ Polling loop │────────────┤
//! └──────────────┘            ▼
//!                      ┌─────────────┐
//!                      │  SetStore   │
//!                      └─────────────┘
//! ```

pub mod presence;
pub mod router;
pub mod store;
pub mod template;

pub use presence::{MemberCache, MemberDirectory, PresenceEvent, Transition};
pub use router::{
    format_uptime, Command, Router, RouterConfig, RouterStats, StatsReport,
    SubscriptionOutcome,
};
pub use store::{Collection, SetStore, StoreError, DESTINATIONS_FILE, SUBSCRIBERS_FILE};
pub use template::{format_placeholders, MessageCatalog, Render, Vars, MESSAGES_FILE};
