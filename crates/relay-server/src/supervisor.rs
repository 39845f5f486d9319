//! Lifecycle supervisor.
//!
//! Builds the relay, announces startup, then runs the presence feed, the
//! polling loop and the liveness reporter side by side. The first of them to
//! exit (or an interrupt) stops the rest: every task is cancelled and given a
//! grace period before it is aborted. The shutdown notice and pool close run
//! on every path.

use crate::config::Config;
use crate::handlers::{self, AppState};
use crate::metrics::{self, MeteredApi};
use crate::polling::{self, PollingConfig};
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use voice_relay_core::{format_uptime, MemberCache, MessageCatalog, Router, SetStore};
use voice_relay_transport::{BotApiClient, MessagingApi};

type TaskResult = (&'static str, Result<()>);

/// A set of named tasks sharing one cancellation token.
pub struct TaskGroup {
    tasks: JoinSet<TaskResult>,
    cancel: CancellationToken,
}

impl TaskGroup {
    /// Create an empty group.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
        }
    }

    /// Spawn a named task.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        debug!(task = name, "Starting task");
        self.tasks.spawn(async move { (name, task.await) });
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait until the first task exits or `interrupt` resolves.
    ///
    /// Returns the name of the task that exited, or `None` on interrupt.
    pub async fn wait_first(&mut self, interrupt: impl Future<Output = ()>) -> Option<&'static str> {
        tokio::select! {
            joined = self.tasks.join_next() => match joined {
                Some(result) => report(result),
                None => None,
            },
            () = interrupt => {
                info!("Received shutdown signal");
                None
            }
        }
    }

    /// Cancel every task and wait for them to stop.
    ///
    /// Each wait is bounded by `grace`; tasks still running after a missed
    /// deadline are aborted.
    pub async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();

        while !self.is_empty() {
            match tokio::time::timeout(grace, self.tasks.join_next()).await {
                Ok(Some(result)) => {
                    report(result);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.len(),
                        "Tasks did not stop within {:?}, aborting", grace
                    );
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }
    }
}

fn report(result: Result<TaskResult, tokio::task::JoinError>) -> Option<&'static str> {
    match result {
        Ok((name, Ok(()))) => {
            info!(task = name, "Task finished");
            Some(name)
        }
        Ok((name, Err(e))) => {
            error!(task = name, error = %e, "Task failed");
            Some(name)
        }
        Err(e) if e.is_cancelled() => {
            debug!("Task aborted");
            None
        }
        Err(e) => {
            error!(error = %e, "Task panicked");
            None
        }
    }
}

/// Ticker for the liveness reporter. The first tick is immediate.
fn liveness_ticker(interval: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker
}

/// Log subscriber and destination counts now and every `interval` after,
/// until cancelled.
pub async fn run_liveness(
    router: Arc<Router>,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = liveness_ticker(interval);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let stats = router.stats().await;
                metrics::set_state(stats.subscribers, stats.destinations);
                info!(
                    subscribers = stats.subscribers,
                    destinations = stats.destinations,
                    uptime = %format_uptime(stats.uptime),
                    "Relay alive"
                );
            }
        }
    }

    Ok(())
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Run the relay until a task exits or the process is interrupted.
///
/// # Errors
///
/// Returns an error if the feed address is invalid. Task failures end the
/// run but are not returned.
pub async fn run(config: Config) -> Result<()> {
    let feed_addr = config.feed_addr()?;

    let store = SetStore::new(
        config.storage.destinations_path.clone(),
        config.storage.subscribers_path.clone(),
    );
    let catalog = Arc::new(MessageCatalog::load(&config.storage.messages_path));
    let api: Arc<dyn MessagingApi> =
        Arc::new(MeteredApi::new(BotApiClient::new(config.bot_api_config())));
    let members = Arc::new(MemberCache::new());

    let router = Arc::new(
        Router::with_config(store, Arc::clone(&api), catalog, config.router_config())
            .with_directory(Arc::clone(&members) as _),
    );
    router.load().await;

    let stats = router.stats().await;
    metrics::set_state(stats.subscribers, stats.destinations);

    let sent = router.announce_started().await;
    metrics::record_broadcast();
    info!(sent, "Relay started");

    let cancel = CancellationToken::new();
    let mut tasks = TaskGroup::new(cancel.clone());

    let state = Arc::new(AppState::new(
        Arc::clone(&router),
        members,
        cancel.clone(),
    ));
    tasks.spawn(
        "presence-feed",
        handlers::run_feed(feed_addr, config.feed.clone(), state),
    );
    tasks.spawn(
        "polling",
        polling::run_polling(
            Arc::clone(&api),
            Arc::clone(&router),
            PollingConfig {
                idle: config.poll_idle(),
                backoff: config.poll_backoff(),
            },
            cancel.clone(),
        ),
    );
    tasks.spawn(
        "liveness",
        run_liveness(Arc::clone(&router), config.liveness_interval(), cancel.clone()),
    );

    let first = tasks.wait_first(interrupted()).await;
    info!(task = ?first, "Shutting down");
    tasks.shutdown(config.shutdown_grace()).await;

    let sent = router.announce_stopped().await;
    metrics::record_broadcast();
    api.close().await;
    info!(sent, "Relay stopped");

    Ok(())
}
