//! Presence feed endpoint.
//!
//! The presence source connects over WebSocket and pushes JSON frames. Voice
//! state frames are forwarded to the router; subscription frames are applied
//! and answered on the same socket, as are stats requests.

use crate::config::FeedConfig;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use voice_relay_core::{MemberCache, PresenceEvent, Router as RelayRouter};
use voice_relay_protocol::{codec, FeedFrame};

/// Shared feed state.
pub struct AppState {
    /// The notification router.
    pub router: Arc<RelayRouter>,
    /// Members seen on the feed.
    pub members: Arc<MemberCache>,
    /// Cancelled when the relay shuts down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(
        router: Arc<RelayRouter>,
        members: Arc<MemberCache>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            router,
            members,
            shutdown,
        }
    }
}

/// Build the feed application.
pub fn app(state: Arc<AppState>, path: &str) -> Router {
    Router::new()
        .route(path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the presence feed listener until cancelled.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_feed(addr: SocketAddr, config: FeedConfig, state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind presence feed on {}", addr))?;
    serve(listener, &config.path, state).await
}

/// Serve the feed on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, path: &str, state: Arc<AppState>) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let addr = listener.local_addr()?;

    info!("Presence feed listening on ws://{}{}", addr, path);

    axum::serve(listener, app(state, path))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Presence feed stopped");
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats().await;
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": stats.uptime.as_secs(),
        "subscribers": stats.subscribers,
        "destinations": stats.destinations,
        "known_members": state.members.len(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a feed connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    debug!("Presence source connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        let msg = tokio::select! {
            () = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            msg = receiver.next() => msg,
        };

        let reply = match msg {
            Some(Ok(Message::Text(text))) => handle_text(&state, &text).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => handle_text(&state, text).await,
                Err(e) => {
                    error!(error = %e, "Feed frame is not UTF-8");
                    metrics::record_error("feed_decode");
                    Some(FeedFrame::error("frame is not valid UTF-8"))
                }
            },
            Some(Ok(Message::Ping(data))) => {
                if sender.send(Message::Pong(data)).await.is_err() {
                    break;
                }
                None
            }
            Some(Ok(Message::Pong(_))) => None,
            Some(Ok(Message::Close(_))) => {
                debug!("Presence source sent close frame");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Feed WebSocket error");
                metrics::record_error("websocket");
                break;
            }
            None => {
                debug!("Feed stream ended");
                break;
            }
        };

        if let Some(frame) = reply {
            if send_frame(&mut sender, &frame).await.is_err() {
                break;
            }
        }
    }

    debug!("Presence source disconnected");
}

/// Decode and handle one text frame.
pub async fn handle_text(state: &AppState, text: &str) -> Option<FeedFrame> {
    match codec::decode(text) {
        Ok(frame) => handle_frame(state, frame).await,
        Err(e) => {
            error!(error = %e, "Failed to decode feed frame");
            metrics::record_error("feed_decode");
            Some(FeedFrame::error(e.to_string()))
        }
    }
}

/// Handle a decoded frame, returning the reply to send back, if any.
pub async fn handle_frame(state: &AppState, frame: FeedFrame) -> Option<FeedFrame> {
    if let Some(member) = frame.member() {
        state.members.remember(member);
    }

    match frame {
        FeedFrame::VoiceState {
            member,
            before,
            after,
        } => {
            let event = PresenceEvent::new(member, before, after);
            if let Some(sent) = state.router.handle_presence(&event).await {
                metrics::record_broadcast();
                debug!(member = event.member.id, sent, "Presence event forwarded");
            }
            None
        }

        FeedFrame::Subscription { member, subscribe } => {
            let outcome = state.router.request_subscription(&member, subscribe).await;
            if outcome.changed {
                metrics::record_broadcast();
            }
            Some(FeedFrame::subscription_result(
                member.id,
                outcome.changed,
                outcome.reply,
            ))
        }

        FeedFrame::Stats => {
            let report = state.router.stats_report().await;
            Some(FeedFrame::stats_result(
                report.stats.subscribers,
                report.stats.destinations,
                report.message,
                report.info,
            ))
        }

        other => {
            warn!(frame = ?other, "Unexpected frame from presence source");
            Some(FeedFrame::error("unexpected frame type"))
        }
    }
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: &FeedFrame,
) -> Result<()> {
    let text = codec::encode(frame)?;
    sender.send(Message::Text(text)).await?;
    Ok(())
}
