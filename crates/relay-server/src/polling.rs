//! Inbound polling loop.
//!
//! Long-polls the messaging API for new updates and feeds them to the router
//! in the order received. The cursor only moves forward.

use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voice_relay_core::Router;
use voice_relay_protocol::UpdatesResponse;
use voice_relay_transport::MessagingApi;

/// Pauses between polling iterations.
#[derive(Debug, Clone, Copy)]
pub struct PollingConfig {
    /// After a successful iteration.
    pub idle: Duration,
    /// After a failed iteration.
    pub backoff: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_millis(100),
            backoff: Duration::from_secs(1),
        }
    }
}

/// Run one polling iteration starting at `cursor`.
///
/// Returns the advanced cursor, or `None` if the call failed or the API did
/// not accept it.
pub async fn poll_once(api: &dyn MessagingApi, router: &Router, cursor: i64) -> Option<i64> {
    let response = fetch(api, cursor).await?;
    Some(dispatch(router, &response, cursor).await)
}

/// Fetch the next batch. `None` if the call failed or was not accepted.
async fn fetch(api: &dyn MessagingApi, cursor: i64) -> Option<UpdatesResponse> {
    let response = api.get_updates(cursor).await?;
    if !response.ok {
        warn!(
            error_code = ?response.error_code,
            description = ?response.description,
            "getUpdates not accepted"
        );
        return None;
    }
    Some(response)
}

/// Feed a fetched batch to the router and return the advanced cursor.
async fn dispatch(router: &Router, response: &UpdatesResponse, cursor: i64) -> i64 {
    let mut cursor = cursor;
    for update in response.updates() {
        cursor = cursor.max(update.update_id.saturating_add(1));
        metrics::record_update();

        let replied = router.process_command(update).await;
        debug!(update_id = update.update_id, replied, "Update processed");
    }
    cursor
}

/// Poll until `cancel` fires.
///
/// Cancellation is observed while waiting for a batch and between
/// iterations. A fetched batch is always dispatched in full.
pub async fn run_polling(
    api: Arc<dyn MessagingApi>,
    router: Arc<Router>,
    config: PollingConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut cursor = 0;
    info!("Polling loop started");

    loop {
        let fetched = tokio::select! {
            () = cancel.cancelled() => break,
            fetched = fetch(api.as_ref(), cursor) => fetched,
        };

        let pause = match fetched {
            Some(response) => {
                cursor = dispatch(&router, &response, cursor).await;
                config.idle
            }
            None => {
                debug!(cursor, "Polling iteration failed, backing off");
                metrics::record_error("polling");
                config.backoff
            }
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(pause) => {}
        }
    }

    info!(cursor, "Polling loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::collections::HashSet;
    use voice_relay_core::{Collection, MessageCatalog, SetStore};

    /// Serves scripted `getUpdates` results, then empty batches.
    #[derive(Default)]
    struct ScriptedApi {
        script: Mutex<VecDeque<Option<UpdatesResponse>>>,
        offsets: Mutex<Vec<i64>>,
        sent: Mutex<Vec<(String, String)>>,
        send_delay: Duration,
    }

    impl ScriptedApi {
        fn new(script: Vec<Option<UpdatesResponse>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl MessagingApi for ScriptedApi {
        async fn send_message(&self, chat_id: &str, text: &str) -> bool {
            tokio::time::sleep(self.send_delay).await;
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), text.to_string()));
            true
        }

        async fn get_updates(&self, offset: i64) -> Option<UpdatesResponse> {
            self.offsets.lock().unwrap().push(offset);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Some(batch(&[])))
        }
    }

    fn batch(ids: &[i64]) -> UpdatesResponse {
        let result: Vec<_> = ids
            .iter()
            .map(|id| json!({"update_id": id, "message": {"text": "/help", "chat": {"id": id}}}))
            .collect();
        serde_json::from_value(json!({"ok": true, "result": result})).unwrap()
    }

    fn router(dir: &tempfile::TempDir, api: Arc<ScriptedApi>) -> Router {
        let catalog = MessageCatalog::from_value(json!({
            "telegram": {"commands": {"help": {"title": "Help"}}}
        }));
        Router::new(SetStore::in_dir(dir.path()), api, Arc::new(catalog))
    }

    #[tokio::test]
    async fn test_cursor_is_max_seen_plus_one() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new(vec![Some(batch(&[5, 3, 7]))]));
        let router = router(&dir, Arc::clone(&api));

        assert_eq!(poll_once(api.as_ref(), &router, 0).await, Some(8));

        let chats: Vec<String> = api.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect();
        assert_eq!(chats, vec!["5", "3", "7"]);
    }

    #[tokio::test]
    async fn test_cursor_never_moves_back() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new(vec![Some(batch(&[3])), Some(batch(&[]))]));
        let router = router(&dir, Arc::clone(&api));

        assert_eq!(poll_once(api.as_ref(), &router, 10).await, Some(10));
        assert_eq!(poll_once(api.as_ref(), &router, 10).await, Some(10));
    }

    #[tokio::test]
    async fn test_failed_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let rejected: UpdatesResponse =
            serde_json::from_value(json!({"ok": false, "error_code": 409})).unwrap();
        let api = Arc::new(ScriptedApi::new(vec![None, Some(rejected)]));
        let router = router(&dir, Arc::clone(&api));

        assert_eq!(poll_once(api.as_ref(), &router, 4).await, None);
        assert_eq!(poll_once(api.as_ref(), &router, 4).await, None);
    }

    #[tokio::test]
    async fn test_updates_without_chat_advance_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let response: UpdatesResponse = serde_json::from_value(json!({
            "ok": true,
            "result": [{"update_id": 11}, {"update_id": 12, "message": {"text": "/help"}}]
        }))
        .unwrap();
        let api = Arc::new(ScriptedApi::new(vec![Some(response)]));
        let router = router(&dir, Arc::clone(&api));

        assert_eq!(poll_once(api.as_ref(), &router, 0).await, Some(13));
        assert!(api.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polling_recovers_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new(vec![
            Some(batch(&[1])),
            None,
            Some(batch(&[4])),
        ]));
        let router = Arc::new(router(&dir, Arc::clone(&api)));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_polling(
            Arc::clone(&api) as Arc<dyn MessagingApi>,
            router,
            PollingConfig::default(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let offsets = api.offsets.lock().unwrap().clone();
        assert_eq!(&offsets[..4], &[0, 2, 2, 5]);
        assert!(offsets[4..].iter().all(|&o| o == 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new(vec![None]));
        let router = Arc::new(router(&dir, Arc::clone(&api)));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_polling(
            Arc::clone(&api) as Arc<dyn MessagingApi>,
            router,
            PollingConfig::default(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(api.offsets.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(api.offsets.lock().unwrap().len(), 2);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_dispatch_finishes_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let start: UpdatesResponse = serde_json::from_value(json!({
            "ok": true,
            "result": [{"update_id": 1, "message": {"text": "/start", "chat": {"id": 42}}}]
        }))
        .unwrap();
        let api = Arc::new(ScriptedApi {
            send_delay: Duration::from_secs(1),
            ..ScriptedApi::new(vec![Some(start)])
        });
        let catalog = MessageCatalog::from_value(json!({
            "telegram": {"commands": {"start": {"welcome": "Welcome"}}}
        }));
        let router = Arc::new(Router::new(
            SetStore::in_dir(dir.path()),
            Arc::clone(&api) as Arc<dyn MessagingApi>,
            Arc::new(catalog),
        ));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_polling(
            Arc::clone(&api) as Arc<dyn MessagingApi>,
            router,
            PollingConfig::default(),
            cancel.clone(),
        ));

        // The welcome reply is still in flight.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(api.sent.lock().unwrap().is_empty());
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let sent = api.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("42".to_string(), "Welcome".to_string())]);
        assert_eq!(api.offsets.lock().unwrap().as_slice(), &[0]);

        let saved: HashSet<String> = SetStore::in_dir(dir.path()).load(Collection::Destinations).await;
        assert!(saved.contains("42"));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_poll_warns_once() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let rejected: UpdatesResponse =
            serde_json::from_value(json!({"ok": false, "error_code": 409})).unwrap();
        let api = Arc::new(ScriptedApi::new(vec![Some(rejected)]));
        let router = Arc::new(router(&dir, Arc::clone(&api)));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_polling(
            Arc::clone(&api) as Arc<dyn MessagingApi>,
            router,
            PollingConfig::default(),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 1, "{output}");
        assert!(lines[0].contains("getUpdates not accepted"));
    }
}
