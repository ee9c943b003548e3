//! Embedded-surface bridge.
//!
//! Less-trusted embedded content gets a reduced API (`broadcast`,
//! `raise_intent`) over asynchronous message passing. Requests carry a
//! correlation id; the host answers on the same id.
//!
//! Inbound: `{ namespace: "fdc3", requestId, action, payload }`
//! Outbound: `{ namespace: "fdc3-host", requestId, response | error }`

use crate::agent::{BridgeConfig, DesktopAgent};
use crate::bridge::frontend::FrontendAgent;
use crate::bridge::protocol::IntentResolutionPlain;
use crate::context::Context;
use crate::core::{lock_state, Error, Result};
use crate::intent::IntentTarget;
use crate::monitoring::{InteropLogger, LogEntry, LogLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Namespace of requests sent by embedded content.
pub const REQUEST_NAMESPACE: &str = "fdc3";

/// Namespace of responses sent by the host.
pub const RESPONSE_NAMESPACE: &str = "fdc3-host";

/// Outgoing side of a message channel between two surfaces.
#[async_trait]
pub trait MessagePort: Send + Sync {
    /// Post a message to the peer, restricted to `target_origin`.
    async fn post_message(&self, message: Value, target_origin: &str) -> Result<()>;
}

/// Request posted by embedded content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedRequest {
    pub namespace: String,
    pub request_id: String,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// Response posted by the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResponse {
    pub namespace: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmbeddedResponse {
    fn from_result(request_id: &str, result: Result<Value>) -> Self {
        let (response, error) = match result {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            namespace: RESPONSE_NAMESPACE.to_string(),
            request_id: request_id.to_string(),
            response,
            error,
        }
    }
}

#[derive(Deserialize)]
struct BroadcastPayload {
    context: Value,
}

#[derive(Deserialize)]
struct RaiseIntentPayload {
    intent: String,
    #[serde(default)]
    context: Option<Value>,
    #[serde(default)]
    target: Option<IntentTarget>,
}

/// Operations the host exposes to embedded content.
#[async_trait]
pub trait EmbeddedApi: Send + Sync {
    async fn broadcast(&self, context: Context) -> Result<()>;

    async fn raise_intent(
        &self,
        intent: &str,
        context: Option<Context>,
        target: Option<IntentTarget>,
    ) -> Result<IntentResolutionPlain>;
}

#[async_trait]
impl EmbeddedApi for FrontendAgent {
    async fn broadcast(&self, context: Context) -> Result<()> {
        FrontendAgent::broadcast(self, context).await
    }

    async fn raise_intent(
        &self,
        intent: &str,
        context: Option<Context>,
        target: Option<IntentTarget>,
    ) -> Result<IntentResolutionPlain> {
        let resolution = FrontendAgent::raise_intent(self, intent, context, target).await?;
        let result = resolution.get_result().await?;
        Ok(IntentResolutionPlain {
            source: resolution.source,
            intent: resolution.intent,
            result,
        })
    }
}

#[async_trait]
impl EmbeddedApi for DesktopAgent {
    async fn broadcast(&self, context: Context) -> Result<()> {
        DesktopAgent::broadcast(self, context).await.map(|_| ())
    }

    async fn raise_intent(
        &self,
        intent: &str,
        context: Option<Context>,
        target: Option<IntentTarget>,
    ) -> Result<IntentResolutionPlain> {
        let resolution = DesktopAgent::raise_intent(self, intent, context, target).await?;
        let result = resolution.get_result().await?;
        Ok(IntentResolutionPlain {
            source: resolution.source,
            intent: resolution.intent,
            result,
        })
    }
}

/// What the host did with an inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Not an interop request
    Ignored,
    /// Dropped because the origin is not trusted
    Rejected,
    /// Processed and answered
    Handled,
}

/// Host side of the embedded bridge.
pub struct EmbeddedBridge {
    api: Arc<dyn EmbeddedApi>,
    config: BridgeConfig,
    logger: Arc<InteropLogger>,
}

impl EmbeddedBridge {
    pub fn new(api: Arc<dyn EmbeddedApi>, config: BridgeConfig) -> Self {
        Self {
            api,
            config,
            logger: Arc::new(InteropLogger::default()),
        }
    }

    /// Use a shared log sink.
    pub fn with_logger(mut self, logger: Arc<InteropLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Process one inbound message from `origin`, answering through `reply`.
    ///
    /// Messages from origins outside the allow-list are dropped before any
    /// agent call and never answered.
    pub async fn handle_message(
        &self,
        origin: &str,
        message: &Value,
        reply: &dyn MessagePort,
    ) -> Result<MessageDisposition> {
        if message.get("namespace").and_then(Value::as_str) != Some(REQUEST_NAMESPACE) {
            return Ok(MessageDisposition::Ignored);
        }

        if !self.config.is_trusted(origin) {
            self.logger.warn(
                LogEntry::new(LogLevel::Warn, "Rejected message from untrusted origin")
                    .with_field("origin", origin),
            );
            return Ok(MessageDisposition::Rejected);
        }

        let request: EmbeddedRequest = match serde_json::from_value(message.clone()) {
            Ok(request) => request,
            Err(err) => {
                self.logger.warn(
                    LogEntry::new(LogLevel::Warn, "Malformed embedded request")
                        .with_field("origin", origin)
                        .with_field("error", err.to_string()),
                );
                return Ok(MessageDisposition::Ignored);
            }
        };

        let result = self.perform(&request).await;
        if let Err(err) = &result {
            self.logger.error(
                LogEntry::new(LogLevel::Error, "Embedded request failed")
                    .with_field("action", &request.action)
                    .with_field("requestId", &request.request_id)
                    .with_field("error", err.to_string()),
            );
        }

        let response = EmbeddedResponse::from_result(&request.request_id, result);
        reply.post_message(serde_json::to_value(response)?, origin).await?;
        Ok(MessageDisposition::Handled)
    }

    async fn perform(&self, request: &EmbeddedRequest) -> Result<Value> {
        match request.action.as_str() {
            "broadcast" => {
                let payload: BroadcastPayload = serde_json::from_value(request.payload.clone())?;
                let context = Context::from_value(payload.context)?;
                self.api.broadcast(context).await?;
                Ok(json!({ "ok": true }))
            }
            "raiseIntent" => {
                let payload: RaiseIntentPayload = serde_json::from_value(request.payload.clone())?;
                let context = payload
                    .context
                    .filter(|value| !value.is_null())
                    .map(Context::from_value)
                    .transpose()?;
                let resolution = self
                    .api
                    .raise_intent(&payload.intent, context, payload.target)
                    .await?;
                Ok(serde_json::to_value(resolution)?)
            }
            other => Err(Error::UnsupportedAction(other.to_string())),
        }
    }
}

type PendingMap = Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>;

/// Drops a request's pending entry however `send` exits, including when the
/// caller abandons the future.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_state(self.pending).remove(self.request_id);
    }
}

/// Embedded-content side of the bridge.
pub struct EmbeddedAgentClient {
    port: Arc<dyn MessagePort>,
    config: BridgeConfig,
    pending: PendingMap,
}

impl EmbeddedAgentClient {
    /// Create a client posting requests through `port`.
    ///
    /// A non-empty allow-list restricts which origins may answer.
    pub fn new(port: Arc<dyn MessagePort>, config: BridgeConfig) -> Self {
        Self {
            port,
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn broadcast(&self, context: Context) -> Result<()> {
        self.send("broadcast", json!({ "context": context })).await?;
        Ok(())
    }

    pub async fn raise_intent(
        &self,
        intent: &str,
        context: Option<Context>,
        target: Option<IntentTarget>,
    ) -> Result<IntentResolutionPlain> {
        let response = self
            .send(
                "raiseIntent",
                json!({ "intent": intent, "context": context, "target": target }),
            )
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Resolve or reject the pending request a host message answers.
    ///
    /// Returns `false` for anything that is not a response to a pending
    /// request.
    pub fn handle_host_message(&self, origin: &str, message: &Value) -> bool {
        if message.get("namespace").and_then(Value::as_str) != Some(RESPONSE_NAMESPACE) {
            return false;
        }
        if !self.config.allowed_origins.is_empty() && !self.config.is_trusted(origin) {
            tracing::warn!(origin, "Ignoring host message from untrusted origin");
            return false;
        }

        let Ok(response) = serde_json::from_value::<EmbeddedResponse>(message.clone()) else {
            return false;
        };
        let Some(sender) = lock_state(&self.pending).remove(&response.request_id) else {
            tracing::debug!(request_id = %response.request_id, "Response for unknown request");
            return false;
        };

        let outcome = match response.error {
            Some(error) => Err(Error::Transport(error)),
            None => Ok(response.response.unwrap_or(Value::Null)),
        };
        // The requester may have timed out already.
        let _ = sender.send(outcome);
        true
    }

    /// Requests still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        lock_state(&self.pending).len()
    }

    async fn send(&self, action: &str, payload: Value) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock_state(&self.pending).insert(request_id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: &request_id,
        };

        let request = EmbeddedRequest {
            namespace: REQUEST_NAMESPACE.to_string(),
            request_id: request_id.clone(),
            action: action.to_string(),
            payload,
        };
        let message = serde_json::to_value(&request)?;
        self.port.post_message(message, "*").await?;

        match self.config.request_timeout() {
            Some(timeout) => self.await_response(&request_id, rx, timeout).await,
            None => rx.await.unwrap_or(Err(Error::ConnectionClosed)),
        }
    }

    async fn await_response(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<Result<Value>>,
        timeout: Duration,
    ) -> Result<Value> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                tracing::warn!(request_id, "Embedded request timed out");
                Err(Error::RequestTimeout(request_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::context_handler;
    use crate::core::testing::settle_tasks;
    use crate::intent::{intent_handler, AppIdentifier, IntentResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_pending, assert_ready};

    const TRUSTED: &str = "https://host.local";

    #[derive(Default)]
    struct RecordingPort {
        messages: Mutex<Vec<(Value, String)>>,
    }

    impl RecordingPort {
        fn sent(&self) -> Vec<(Value, String)> {
            self.messages.lock().unwrap().clone()
        }

        fn last_request_id(&self) -> String {
            let messages = self.messages.lock().unwrap();
            messages.last().unwrap().0["requestId"].as_str().unwrap().to_string()
        }
    }

    #[async_trait]
    impl MessagePort for RecordingPort {
        async fn post_message(&self, message: Value, target_origin: &str) -> Result<()> {
            self.messages
                .lock()
                .unwrap()
                .push((message, target_origin.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingApi {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddedApi for CountingApi {
        async fn broadcast(&self, _context: Context) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn raise_intent(
            &self,
            intent: &str,
            _context: Option<Context>,
            _target: Option<IntentTarget>,
        ) -> Result<IntentResolutionPlain> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(IntentResolutionPlain {
                source: AppIdentifier::new("app"),
                intent: intent.to_string(),
                result: None,
            })
        }
    }

    fn broadcast_message(request_id: &str) -> Value {
        json!({
            "namespace": "fdc3",
            "requestId": request_id,
            "action": "broadcast",
            "payload": { "context": { "type": "x.client", "id": { "clientId": "c1" } } }
        })
    }

    #[tokio::test]
    async fn test_untrusted_origin_never_reaches_agent() {
        let api = Arc::new(CountingApi::default());
        let bridge = EmbeddedBridge::new(api.clone(), BridgeConfig::for_origin(TRUSTED));
        let port = RecordingPort::default();

        let disposition = bridge
            .handle_message("https://evil.local", &broadcast_message("r1"), &port)
            .await
            .unwrap();

        assert_eq!(disposition, MessageDisposition::Rejected);
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert!(port.sent().is_empty());
        assert_eq!(bridge.logger.get_logs_at_level(LogLevel::Warn).len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_namespace_is_ignored() {
        let api = Arc::new(CountingApi::default());
        let bridge = EmbeddedBridge::new(api.clone(), BridgeConfig::for_origin(TRUSTED));
        let port = RecordingPort::default();

        let message = json!({"namespace": "other", "requestId": "r1", "action": "broadcast"});
        let disposition = bridge.handle_message(TRUSTED, &message, &port).await.unwrap();

        assert_eq!(disposition, MessageDisposition::Ignored);
        assert!(port.sent().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_is_answered() {
        let agent = DesktopAgent::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        agent
            .add_context_listener(context_handler(move |_ctx: Context| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }))
            .await
            .unwrap();
        let bridge = EmbeddedBridge::new(Arc::new(agent), BridgeConfig::for_origin(TRUSTED));
        let port = RecordingPort::default();

        let disposition = bridge
            .handle_message(TRUSTED, &broadcast_message("r1"), &port)
            .await
            .unwrap();

        assert_eq!(disposition, MessageDisposition::Handled);
        settle_tasks().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let sent = port.sent();
        assert_eq!(
            sent[0].0,
            json!({"namespace": "fdc3-host", "requestId": "r1", "response": {"ok": true}})
        );
        assert_eq!(sent[0].1, TRUSTED);
    }

    #[tokio::test]
    async fn test_errors_are_answered() {
        let bridge = EmbeddedBridge::new(
            Arc::new(DesktopAgent::default()),
            BridgeConfig::for_origin(TRUSTED),
        );
        let port = RecordingPort::default();

        let message = json!({"namespace": "fdc3", "requestId": "r1", "action": "open", "payload": {}});
        bridge.handle_message(TRUSTED, &message, &port).await.unwrap();
        let message = json!({
            "namespace": "fdc3",
            "requestId": "r2",
            "action": "raiseIntent",
            "payload": { "intent": "ViewChart" }
        });
        bridge.handle_message(TRUSTED, &message, &port).await.unwrap();
        let message = json!({
            "namespace": "fdc3",
            "requestId": "r3",
            "action": "broadcast",
            "payload": { "context": { "id": {} } }
        });
        bridge.handle_message(TRUSTED, &message, &port).await.unwrap();

        let sent = port.sent();
        assert_eq!(sent[0].0["error"], json!("Unsupported action open"));
        assert_eq!(sent[1].0["error"], json!("No handler found for intent ViewChart"));
        assert!(sent[2].0["error"].as_str().unwrap().starts_with("Invalid context"));
    }

    #[tokio::test]
    async fn test_client_and_host_end_to_end() {
        let agent = DesktopAgent::default();
        agent
            .add_intent_listener(
                "ViewChart",
                intent_handler(|ctx: Context| async move { Ok(Some(IntentResult::Context(ctx))) }),
            )
            .await
            .unwrap();
        let bridge = EmbeddedBridge::new(Arc::new(agent), BridgeConfig::for_origin(TRUSTED));
        let host_port = RecordingPort::default();
        let client_port = Arc::new(RecordingPort::default());
        let client = EmbeddedAgentClient::new(client_port.clone(), BridgeConfig::for_origin(TRUSTED));

        let mut call = tokio_test::task::spawn(client.raise_intent(
            "ViewChart",
            Some(Context::new("fdc3.instrument")),
            None,
        ));
        assert_pending!(call.poll());
        assert_eq!(client.pending_count(), 1);

        let (request, _) = client_port.sent().remove(0);
        assert_eq!(request["namespace"], json!("fdc3"));
        bridge.handle_message(TRUSTED, &request, &host_port).await.unwrap();
        let (response, _) = host_port.sent().remove(0);
        assert!(client.handle_host_message(TRUSTED, &response));

        assert!(call.is_woken());
        let resolution = assert_ready!(call.poll()).unwrap();
        assert_eq!(
            resolution.result,
            Some(IntentResult::Context(Context::new("fdc3.instrument")))
        );
        drop(call);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_rejects_only_matching_request() {
        let port = Arc::new(RecordingPort::default());
        let client = EmbeddedAgentClient::new(port.clone(), BridgeConfig::default());

        let mut first = tokio_test::task::spawn(client.broadcast(Context::new("a")));
        assert_pending!(first.poll());
        let first_id = port.last_request_id();
        let mut second = tokio_test::task::spawn(client.broadcast(Context::new("b")));
        assert_pending!(second.poll());
        let second_id = port.last_request_id();
        assert_ne!(first_id, second_id);

        let unknown = json!({"namespace": "fdc3-host", "requestId": "nope", "response": {}});
        assert!(!client.handle_host_message(TRUSTED, &unknown));
        assert_eq!(client.pending_count(), 2);

        let failure = json!({"namespace": "fdc3-host", "requestId": second_id, "error": "denied"});
        assert!(client.handle_host_message(TRUSTED, &failure));
        assert!(matches!(assert_ready!(second.poll()), Err(Error::Transport(_))));
        assert_pending!(first.poll());

        let success = json!({"namespace": "fdc3-host", "requestId": first_id, "response": {"ok": true}});
        assert!(client.handle_host_message(TRUSTED, &success));
        assert!(assert_ready!(first.poll()).is_ok());
    }

    #[tokio::test]
    async fn test_untrusted_host_response_is_ignored() {
        let port = Arc::new(RecordingPort::default());
        let client = EmbeddedAgentClient::new(port.clone(), BridgeConfig::for_origin(TRUSTED));

        let mut call = tokio_test::task::spawn(client.broadcast(Context::new("a")));
        assert_pending!(call.poll());
        let request_id = port.last_request_id();

        let response = json!({"namespace": "fdc3-host", "requestId": request_id, "response": {"ok": true}});
        assert!(!client.handle_host_message("https://evil.local", &response));
        assert_pending!(call.poll());
        assert!(client.handle_host_message(TRUSTED, &response));
        assert!(assert_ready!(call.poll()).is_ok());
    }

    #[tokio::test]
    async fn test_pending_request_times_out() {
        let port = Arc::new(RecordingPort::default());
        let client = EmbeddedAgentClient::new(port.clone(), BridgeConfig::default().with_timeout(Some(20)));

        let err = client.broadcast(Context::new("a")).await.unwrap_err();

        assert!(matches!(err, Error::RequestTimeout(_)));
        assert_eq!(client.pending_count(), 0);

        let request_id = port.last_request_id();
        let late = json!({"namespace": "fdc3-host", "requestId": request_id, "response": {"ok": true}});
        assert!(!client.handle_host_message(TRUSTED, &late));
    }

    #[tokio::test]
    async fn test_cancelled_request_releases_pending() {
        let port = Arc::new(RecordingPort::default());
        let client = EmbeddedAgentClient::new(port.clone(), BridgeConfig::default());

        let mut call = tokio_test::task::spawn(client.broadcast(Context::new("a")));
        assert_pending!(call.poll());
        assert_eq!(client.pending_count(), 1);
        drop(call);
        assert_eq!(client.pending_count(), 0);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            client.raise_intent("ViewChart", None, None),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(client.pending_count(), 0);

        let request_id = port.last_request_id();
        let late = json!({"namespace": "fdc3-host", "requestId": request_id, "response": {}});
        assert!(!client.handle_host_message(TRUSTED, &late));
    }
}
