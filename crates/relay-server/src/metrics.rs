//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use voice_relay_protocol::UpdatesResponse;
use voice_relay_transport::MessagingApi;

/// Metric names.
pub mod names {
    pub const MESSAGES_SENT_TOTAL: &str = "relay_messages_sent_total";
    pub const BROADCASTS_TOTAL: &str = "relay_broadcasts_total";
    pub const UPDATES_TOTAL: &str = "relay_updates_total";
    pub const SUBSCRIBERS: &str = "relay_subscribers";
    pub const DESTINATIONS: &str = "relay_destinations";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Describe the relay metrics.
///
/// Descriptions go to the recorder installed at call time, so this runs after
/// [`start_metrics_server`].
pub fn init_metrics() {
    metrics::describe_counter!(
        names::MESSAGES_SENT_TOTAL,
        "Outbound messages by delivery outcome"
    );
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Broadcasts issued");
    metrics::describe_counter!(names::UPDATES_TOTAL, "Inbound updates processed");
    metrics::describe_gauge!(names::SUBSCRIBERS, "Current number of subscribed members");
    metrics::describe_gauge!(names::DESTINATIONS, "Current number of registered chats");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an outbound message.
pub fn record_send(delivered: bool) {
    let outcome = if delivered { "delivered" } else { "failed" };
    counter!(names::MESSAGES_SENT_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a broadcast.
pub fn record_broadcast() {
    counter!(names::BROADCASTS_TOTAL).increment(1);
}

/// Record an inbound update.
pub fn record_update() {
    counter!(names::UPDATES_TOTAL).increment(1);
}

/// Update the set size gauges.
pub fn set_state(subscribers: usize, destinations: usize) {
    gauge!(names::SUBSCRIBERS).set(subscribers as f64);
    gauge!(names::DESTINATIONS).set(destinations as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// A [`MessagingApi`] that records delivery outcomes.
pub struct MeteredApi<A> {
    inner: A,
}

impl<A: MessagingApi> MeteredApi<A> {
    /// Wrap an API client.
    #[must_use]
    pub fn new(inner: A) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<A: MessagingApi> MessagingApi for MeteredApi<A> {
    async fn send_message(&self, chat_id: &str, text: &str) -> bool {
        let delivered = self.inner.send_message(chat_id, text).await;
        record_send(delivered);
        delivered
    }

    async fn get_updates(&self, offset: i64) -> Option<UpdatesResponse> {
        let response = self.inner.get_updates(offset).await;
        if response.is_none() {
            record_error("get_updates");
        }
        response
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
