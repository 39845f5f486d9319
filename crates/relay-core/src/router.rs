//! Notification router.
//!
//! The router owns the destination and subscriber sets. It answers inbound
//! chat commands, applies subscription toggles, turns presence transitions
//! into notifications, and fans messages out to every registered destination.

use crate::presence::{MemberDirectory, PresenceEvent};
use crate::store::{Collection, SetStore};
use crate::template::{truncate_chars, Render, Vars};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use voice_relay_protocol::{Member, Update};
use voice_relay_transport::{MessagingApi, MAX_MESSAGE_LENGTH};

/// Overflow line used when the catalog has no `telegram.commands.status.more`.
const DEFAULT_MORE_TEMPLATE: &str = "... and `{count}` more";

/// Timestamp format for system and subscription notifications.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp format for voice notifications.
const TIME_FORMAT: &str = "%H:%M";

/// An inbound chat command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Status,
    Unknown,
}

impl Command {
    /// Parse trimmed command text. Matching is exact.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text {
            "/start" => Self::Start,
            "/help" => Self::Help,
            "/status" => Self::Status,
            _ => Self::Unknown,
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Outbound messages are truncated to this many characters.
    pub max_message_length: usize,
    /// Maximum subscribers listed by `/status`.
    pub status_list_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_message_length: MAX_MESSAGE_LENGTH,
            status_list_limit: 20,
        }
    }
}

/// Outcome of a subscription request from the presence source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOutcome {
    /// Whether membership changed.
    pub changed: bool,
    /// Reply for the requesting member.
    pub reply: String,
    /// Destinations that received the confirmation broadcast.
    pub sent: usize,
}

/// Relay counts rendered for the presence side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsReport {
    pub stats: RouterStats,
    /// Rendered `discord.notifier.stats`.
    pub message: String,
    /// Rendered `discord.notifier.telegram_info`.
    pub info: String,
}

/// Router statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of subscribed members.
    pub subscribers: usize,
    /// Number of registered destinations.
    pub destinations: usize,
    /// Time since the router was created.
    pub uptime: Duration,
}

/// The notification router.
pub struct Router {
    store: SetStore,
    api: Arc<dyn MessagingApi>,
    templates: Arc<dyn Render>,
    directory: Option<Arc<dyn MemberDirectory>>,
    destinations: RwLock<HashSet<String>>,
    subscribers: RwLock<HashSet<u64>>,
    started: Instant,
    started_at: DateTime<Local>,
    config: RouterConfig,
}

impl Router {
    /// Create a router with default configuration.
    ///
    /// The sets start empty; call [`Router::load`] to read persisted state.
    #[must_use]
    pub fn new(store: SetStore, api: Arc<dyn MessagingApi>, templates: Arc<dyn Render>) -> Self {
        Self::with_config(store, api, templates, RouterConfig::default())
    }

    /// Create a router with custom configuration.
    #[must_use]
    pub fn with_config(
        store: SetStore,
        api: Arc<dyn MessagingApi>,
        templates: Arc<dyn Render>,
        config: RouterConfig,
    ) -> Self {
        debug!("Creating router with config: {:?}", config);
        Self {
            store,
            api,
            templates,
            directory: None,
            destinations: RwLock::new(HashSet::new()),
            subscribers: RwLock::new(HashSet::new()),
            started: Instant::now(),
            started_at: Local::now(),
            config,
        }
    }

    /// Resolve subscriber names through `directory` in `/status`.
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn MemberDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Replace both sets with their persisted snapshots.
    pub async fn load(&self) {
        let destinations: HashSet<String> = self.store.load(Collection::Destinations).await;
        let subscribers: HashSet<u64> = self.store.load(Collection::Subscribers).await;

        info!(
            destinations = destinations.len(),
            subscribers = subscribers.len(),
            "Loaded persisted state"
        );

        *self.destinations.write().await = destinations;
        *self.subscribers.write().await = subscribers;
    }

    /// Get router statistics.
    pub async fn stats(&self) -> RouterStats {
        RouterStats {
            subscribers: self.subscribers.read().await.len(),
            destinations: self.destinations.read().await.len(),
            uptime: self.uptime(),
        }
    }

    /// Counts plus the rendered notifier texts.
    pub async fn stats_report(&self) -> StatsReport {
        let stats = self.stats().await;
        let message = self.templates.render_or(
            &["discord", "notifier", "stats"],
            "Subscribers: {subs_count}, chats: {chats_count}",
            &[
                ("subs_count", stats.subscribers.to_string()),
                ("chats_count", stats.destinations.to_string()),
            ],
        );
        let info = self.templates.render_or(
            &["discord", "notifier", "telegram_info"],
            "Voice activity of subscribed members is posted to the registered Telegram chats.",
            &[],
        );
        StatsReport {
            stats,
            message,
            info,
        }
    }

    /// Time since the router was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether a member is subscribed.
    pub async fn is_subscribed(&self, member_id: u64) -> bool {
        self.subscribers.read().await.contains(&member_id)
    }

    /// Whether a destination is registered.
    pub async fn is_registered(&self, chat_id: &str) -> bool {
        self.destinations.read().await.contains(chat_id)
    }

    /// Register a destination.
    ///
    /// Returns `true` if it was not registered before. Re-registering is a
    /// no-op with no write.
    pub async fn add_destination(&self, chat_id: &str) -> bool {
        let mut destinations = self.destinations.write().await;
        if !destinations.insert(chat_id.to_string()) {
            return false;
        }

        if !self.store.save(Collection::Destinations, &destinations).await {
            warn!(destination = %chat_id, "Registration kept in memory only");
        }
        info!(destination = %chat_id, total = destinations.len(), "Destination registered");
        true
    }

    /// Set a member's subscription.
    ///
    /// Returns `false` with no write if the member is already in the wanted
    /// state. Notifying anyone about the change is up to the caller.
    pub async fn toggle_subscription(&self, member_id: u64, subscribe: bool) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let changed = if subscribe {
            subscribers.insert(member_id)
        } else {
            subscribers.remove(&member_id)
        };
        if !changed {
            return false;
        }

        if !self.store.save(Collection::Subscribers, &subscribers).await {
            warn!(member = member_id, subscribe, "Subscription change kept in memory only");
        }
        info!(member = member_id, subscribe, total = subscribers.len(), "Subscription changed");
        true
    }

    fn outbound(&self, path: &[&str], vars: &Vars<'_>) -> String {
        let text = self.templates.render(path, vars);
        truncate_chars(&text, self.config.max_message_length).to_string()
    }

    async fn reply(&self, chat_id: &str, path: &[&str]) -> bool {
        let text = self.outbound(path, &[]);
        self.api.send_message(chat_id, &text).await
    }

    /// Handle `/start`: register the chat and welcome it.
    pub async fn handle_register(&self, chat_id: &str) -> bool {
        let key = if self.add_destination(chat_id).await {
            "welcome"
        } else {
            "already_registered"
        };
        self.reply(chat_id, &["telegram", "commands", "start", key])
            .await
    }

    /// Handle `/status`: send a placeholder, then the live status.
    pub async fn handle_status(&self, chat_id: &str) -> bool {
        self.reply(chat_id, &["telegram", "commands", "status", "loading"])
            .await;

        let mut subscribers: Vec<u64> = self.subscribers.read().await.iter().copied().collect();
        subscribers.sort_unstable();
        let chats = self.destinations.read().await.len();

        let text = self.outbound(
            &["telegram", "commands", "status", "title"],
            &[
                ("uptime", format_uptime(self.uptime())),
                ("subs_count", subscribers.len().to_string()),
                ("chats_count", chats.to_string()),
                ("subscribers_list", self.subscriber_listing(&subscribers)),
            ],
        );
        self.api.send_message(chat_id, &text).await
    }

    fn subscriber_listing(&self, subscribers: &[u64]) -> String {
        if subscribers.is_empty() {
            return self
                .templates
                .render(&["telegram", "errors", "no_subscribers"], &[]);
        }

        let limit = self.config.status_list_limit;
        let mut lines: Vec<String> = subscribers
            .iter()
            .take(limit)
            .map(|&id| {
                match self
                    .directory
                    .as_ref()
                    .and_then(|directory| directory.display_name(id))
                {
                    Some(name) => format!("• **{name}** (`{id}`)"),
                    None => format!("• `ID {id}`"),
                }
            })
            .collect();

        if subscribers.len() > limit {
            lines.push(self.templates.render_or(
                &["telegram", "commands", "status", "more"],
                DEFAULT_MORE_TEMPLATE,
                &[("count", (subscribers.len() - limit).to_string())],
            ));
        }

        lines.join("\n")
    }

    /// Handle one inbound update.
    ///
    /// Returns `true` if a reply was delivered. Updates without a chat are
    /// skipped.
    pub async fn process_command(&self, update: &Update) -> bool {
        let Some(chat_id) = update.chat_id() else {
            debug!(update_id = update.update_id, "Update without chat, skipping");
            return false;
        };
        let chat_id = chat_id.as_str();
        let command = Command::parse(update.command_text());

        debug!(update_id = update.update_id, chat = %chat_id, ?command, "Processing command");

        match command {
            Command::Start => self.handle_register(chat_id).await,
            Command::Help => {
                self.reply(chat_id, &["telegram", "commands", "help", "title"])
                    .await
            }
            Command::Status => self.handle_status(chat_id).await,
            Command::Unknown => {
                self.reply(chat_id, &["telegram", "errors", "invalid_command"])
                    .await
            }
        }
    }

    /// Send `text` to every registered destination.
    ///
    /// Returns the number of successful deliveries. One destination failing
    /// never affects the others.
    pub async fn broadcast(&self, text: &str) -> usize {
        let mut destinations: Vec<String> =
            self.destinations.read().await.iter().cloned().collect();

        if destinations.is_empty() || text.is_empty() {
            info!(
                destinations = destinations.len(),
                text_len = text.len(),
                "Skipping broadcast"
            );
            return 0;
        }

        destinations.sort_unstable();
        let text = truncate_chars(text, self.config.max_message_length);

        let mut sent = 0;
        for chat_id in &destinations {
            if self.api.send_message(chat_id, text).await {
                sent += 1;
            } else {
                debug!(destination = %chat_id, "Broadcast delivery failed");
            }
        }

        info!(sent, total = destinations.len(), "Broadcast finished");
        sent
    }

    /// Forward a presence event.
    ///
    /// Returns `None` if the member is not subscribed or the event carries no
    /// transition; otherwise the number of destinations reached.
    pub async fn handle_presence(&self, event: &PresenceEvent) -> Option<usize> {
        if !self.is_subscribed(event.member.id).await {
            return None;
        }
        let transition = event.transition()?;

        let text = self.templates.render(
            &["telegram", "voice_events", transition.template_key()],
            &[
                ("user_name", event.member.shown_name().to_string()),
                ("channel_name", transition.channel().name.clone()),
                ("user_id", event.member.id.to_string()),
                ("time", Local::now().format(TIME_FORMAT).to_string()),
            ],
        );

        debug!(
            member = event.member.id,
            transition = transition.template_key(),
            channel = %transition.channel().name,
            "Forwarding presence event"
        );
        Some(self.broadcast(&text).await)
    }

    /// Apply a member's subscribe/unsubscribe request and announce the change.
    pub async fn request_subscription(&self, member: &Member, subscribe: bool) -> SubscriptionOutcome {
        if !self.toggle_subscription(member.id, subscribe).await {
            let key = if subscribe {
                "already_subscribed"
            } else {
                "already_unsubscribed"
            };
            info!(member = member.id, subscribe, "Repeated subscription request");
            return SubscriptionOutcome {
                changed: false,
                reply: self
                    .templates
                    .render(&["discord", "subscription", key, "msg"], &[]),
                sent: 0,
            };
        }

        let action = if subscribe { "subscribed" } else { "unsubscribed" };
        let reply = self
            .templates
            .render(&["discord", "subscription", action], &[]);

        let total = self.subscribers.read().await.len();
        let text = self.templates.render(
            &["telegram", "subscription", action, "content"],
            &[
                ("user_name", member.shown_name().to_string()),
                ("user_id", member.id.to_string()),
                ("timestamp", Local::now().format(DATETIME_FORMAT).to_string()),
                ("total_subs", total.to_string()),
            ],
        );
        let sent = self.broadcast(&text).await;

        SubscriptionOutcome {
            changed: true,
            reply,
            sent,
        }
    }

    /// Broadcast the startup notice.
    pub async fn announce_started(&self) -> usize {
        let text = self.templates.render(
            &["telegram", "system", "bot_started"],
            &[(
                "start_time",
                self.started_at.format(DATETIME_FORMAT).to_string(),
            )],
        );
        self.broadcast(&text).await
    }

    /// Broadcast the shutdown notice.
    pub async fn announce_stopped(&self) -> usize {
        let text = self
            .templates
            .render(&["telegram", "system", "bot_stopped"], &[]);
        self.broadcast(&text).await
    }
}

/// Format an uptime as `H:MM:SS`, prefixed with `N day(s), ` past 24 hours.
#[must_use]
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    match days {
        0 => format!("{hours}:{minutes:02}:{seconds:02}"),
        1 => format!("1 day, {hours}:{minutes:02}:{seconds:02}"),
        _ => format!("{days} days, {hours}:{minutes:02}:{seconds:02}"),
    }
}
