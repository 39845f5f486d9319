//! Rate-limited HTTP client for the bot messaging API.
//!
//! Every call goes through [`BotApiClient::request`], which bounds the number
//! of in-flight requests, spaces dispatches with the shared [`RateLimiter`],
//! and applies a total timeout. The connection pool is built on first use and
//! dropped by [`MessagingApi::close`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use voice_relay_protocol::api::{GET_UPDATES, SEND_MESSAGE};
use voice_relay_protocol::{
    codec, ApiResponse, GetUpdatesRequest, SendMessageRequest, UpdatesResponse,
};

use crate::limiter::RateLimiter;
use crate::traits::{validate_message_text, MessagingApi, TransportError, MAX_MESSAGE_LENGTH};

/// Bot API client configuration.
#[derive(Debug, Clone)]
pub struct BotApiConfig {
    /// API base URL, without trailing slash.
    pub base_url: String,
    /// Bot token.
    pub token: String,
    /// Minimum spacing between any two outbound calls.
    pub min_interval: Duration,
    /// Total timeout for a single call.
    pub request_timeout: Duration,
    /// Server-side long-poll timeout for `getUpdates`.
    pub long_poll: Duration,
    /// Maximum simultaneous connections.
    pub max_connections: usize,
    /// Maximum message length in characters.
    pub max_message_length: usize,
}

impl BotApiConfig {
    /// Default configuration for the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.telegram.org".to_string(),
            token: token.into(),
            min_interval: Duration::from_millis(300),
            request_timeout: Duration::from_secs(15),
            long_poll: Duration::from_secs(30),
            max_connections: 10,
            max_message_length: MAX_MESSAGE_LENGTH,
        }
    }

    /// Total bound for a `getUpdates` call: the long poll plus the request timeout.
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        self.long_poll + self.request_timeout
    }
}

/// Rate-limited bot API client.
pub struct BotApiClient {
    config: BotApiConfig,
    limiter: RateLimiter,
    permits: Semaphore,
    pool: Mutex<Option<reqwest::Client>>,
}

impl BotApiClient {
    /// Create a client. No connection is opened until the first call.
    #[must_use]
    pub fn new(config: BotApiConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.min_interval),
            permits: Semaphore::new(config.max_connections.max(1)),
            pool: Mutex::new(None),
            config,
        }
    }

    /// Get the shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Whether the connection pool is currently open.
    pub async fn is_open(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    async fn http(&self) -> Result<reqwest::Client, TransportError> {
        let mut pool = self.pool.lock().await;
        if let Some(client) = pool.as_ref() {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(self.config.max_connections)
            .build()?;
        debug!(
            max_connections = self.config.max_connections,
            "Opened API connection pool"
        );
        *pool = Some(client.clone());
        Ok(client)
    }

    /// Issue one API call.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, transport failure, non-success status, an
    /// undecodable body, or after the client was closed.
    pub async fn request<P, T>(
        &self,
        method: &str,
        payload: &P,
        timeout: Duration,
    ) -> Result<ApiResponse<T>, TransportError>
    where
        P: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransportError::Closed)?;

        self.limiter.acquire().await;
        let client = self.http().await?;
        let url = format!("{}/bot{}/{}", self.config.base_url, self.config.token, method);

        let call = async {
            let response = client.post(&url).json(payload).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status.as_u16()));
            }
            let body = response.bytes().await?;
            Ok(codec::decode_response(&body)?)
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(Err(TransportError::Http(e))) if e.is_timeout() => Err(TransportError::Timeout),
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

#[async_trait]
impl MessagingApi for BotApiClient {
    async fn send_message(&self, chat_id: &str, text: &str) -> bool {
        if let Err(reason) = validate_message_text(text, self.config.max_message_length) {
            warn!(chat = %chat_id, chars = text.chars().count(), reason, "Message rejected");
            return false;
        }

        let payload = SendMessageRequest::new(chat_id, text);
        let result: Result<ApiResponse<serde_json::Value>, _> = self
            .request(SEND_MESSAGE, &payload, self.config.request_timeout)
            .await;

        match result {
            Ok(response) if response.ok => true,
            Ok(response) => {
                warn!(
                    chat = %chat_id,
                    error_code = ?response.error_code,
                    description = ?response.description,
                    "sendMessage not accepted"
                );
                false
            }
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "sendMessage failed");
                false
            }
        }
    }

    async fn get_updates(&self, offset: i64) -> Option<UpdatesResponse> {
        let payload = GetUpdatesRequest::messages(offset, self.config.long_poll.as_secs());

        match self
            .request(GET_UPDATES, &payload, self.config.poll_timeout())
            .await
        {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(offset, error = %e, "getUpdates failed");
                None
            }
        }
    }

    async fn close(&self) {
        self.permits.close();
        if self.pool.lock().await.take().is_some() {
            info!("Closed API connection pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct FakeApi {
        sent: std::sync::Mutex<Vec<Value>>,
    }

    async fn send_message(
        State(api): State<Arc<FakeApi>>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        api.sent.lock().unwrap().push(body.clone());
        match body["chat_id"].as_str() {
            Some("broken") => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))),
            Some("blocked") => (
                StatusCode::OK,
                Json(json!({"ok": false, "error_code": 403, "description": "Forbidden"})),
            ),
            Some("slow") => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                (StatusCode::OK, Json(json!({"ok": true, "result": {}})))
            }
            _ => (
                StatusCode::OK,
                Json(json!({"ok": true, "result": {"message_id": 1}})),
            ),
        }
    }

    async fn get_updates(Json(body): Json<Value>) -> Json<Value> {
        let offset = body["offset"].as_i64().unwrap_or_default();
        Json(json!({"ok": true, "result": [
            {"update_id": offset, "message": {"text": "/start", "chat": {"id": 10}}},
            {"update_id": offset + 1, "message": {"text": "/help", "chat": {"id": 11}}}
        ]}))
    }

    async fn spawn_fake_api() -> (String, Arc<FakeApi>) {
        let api = Arc::new(FakeApi::default());
        let app = Router::new()
            .route("/botTEST/sendMessage", post(send_message))
            .route("/botTEST/getUpdates", post(get_updates))
            .with_state(Arc::clone(&api));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), api)
    }

    fn test_config(base_url: String) -> BotApiConfig {
        BotApiConfig {
            base_url,
            min_interval: Duration::from_millis(20),
            request_timeout: Duration::from_millis(500),
            long_poll: Duration::from_secs(0),
            ..BotApiConfig::new("TEST")
        }
    }

    #[tokio::test]
    async fn test_send_message_success() {
        let (base_url, api) = spawn_fake_api().await;
        let client = BotApiClient::new(test_config(base_url));

        assert!(!client.is_open().await);
        assert!(client.send_message("42", "hello").await);
        assert!(client.is_open().await);

        let sent = api.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["text"], "hello");
        assert_eq!(sent[0]["parse_mode"], "Markdown");
    }

    #[tokio::test]
    async fn test_send_message_failures_are_sentinels() {
        let (base_url, _api) = spawn_fake_api().await;
        let client = BotApiClient::new(test_config(base_url));

        assert!(!client.send_message("broken", "hello").await);
        assert!(!client.send_message("blocked", "hello").await);
        assert!(!client.send_message("slow", "hello").await);
        assert!(client.send_message("fine", "hello").await);
    }

    #[tokio::test]
    async fn test_send_message_rejects_without_network() {
        let (base_url, api) = spawn_fake_api().await;
        let client = BotApiClient::new(test_config(base_url));

        assert!(!client.send_message("42", "").await);
        assert!(!client.send_message("42", &"x".repeat(MAX_MESSAGE_LENGTH + 1)).await);

        assert!(api.sent.lock().unwrap().is_empty());
        assert!(client.limiter().last_dispatch().await.is_none());
    }

    #[tokio::test]
    async fn test_get_updates() {
        let (base_url, _api) = spawn_fake_api().await;
        let client = BotApiClient::new(test_config(base_url));

        let response = client.get_updates(100).await.unwrap();
        let ids: Vec<i64> = response.updates().iter().map(|u| u.update_id).collect();
        assert_eq!(ids, vec![100, 101]);
    }

    #[tokio::test]
    async fn test_unreachable_api_returns_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = BotApiClient::new(test_config(format!("http://{}", addr)));
        assert!(client.get_updates(0).await.is_none());
        assert!(!client.send_message("42", "hello").await);
    }

    #[tokio::test]
    async fn test_calls_share_one_limiter() {
        let (base_url, _api) = spawn_fake_api().await;
        let mut config = test_config(base_url);
        config.min_interval = Duration::from_millis(150);
        let client = BotApiClient::new(config);

        let start = tokio::time::Instant::now();
        assert!(client.send_message("1", "a").await);
        assert!(client.get_updates(0).await.is_some());
        assert!(client.send_message("2", "b").await);

        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_close_drops_pool() {
        let (base_url, _api) = spawn_fake_api().await;
        let client = BotApiClient::new(test_config(base_url));

        assert!(client.send_message("42", "hello").await);
        client.close().await;
        assert!(!client.is_open().await);
    }

    #[tokio::test]
    async fn test_calls_after_close_fail() {
        let (base_url, api) = spawn_fake_api().await;
        let client = BotApiClient::new(test_config(base_url));
        client.close().await;

        let result: Result<ApiResponse<Value>, _> = client
            .request(SEND_MESSAGE, &json!({"chat_id": "1"}), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(!client.send_message("42", "hello").await);
        assert!(client.get_updates(0).await.is_none());

        assert!(api.sent.lock().unwrap().is_empty());
        assert!(!client.is_open().await);
    }
}
