//! Backend side of the remote contract.
//!
//! Every client connection gets its own listener-id namespace on top of one
//! shared [`DesktopAgent`]. Listeners registered remotely become local agent
//! listeners whose handlers call back into that connection's client.

use crate::agent::{DesktopAgent, ImplementationMetadata, Listener};
use crate::bridge::protocol::{Fdc3Client, Fdc3Service, IntentResolutionPlain, RpcRequest, RpcResponse};
use crate::channel::ChannelInfo;
use crate::context::{context_handler, Context, ContextFilter};
use crate::core::{lock_state, ListenerId, LockExt, Result};
use crate::intent::{intent_handler, AppIdentifier, AppIntent, AppMetadata, IntentTarget};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

type ClientSlot = Arc<RwLock<Option<Arc<dyn Fdc3Client>>>>;

/// One remote client's view of the shared agent.
pub struct BackendConnection {
    id: String,
    agent: DesktopAgent,
    client: ClientSlot,
    context_listeners: Mutex<HashMap<ListenerId, Listener>>,
    intent_listeners: Mutex<HashMap<ListenerId, Listener>>,
    listener_counter: AtomicU64,
}

impl BackendConnection {
    /// Create a connection with no client attached yet.
    pub fn new(id: &str, agent: DesktopAgent) -> Self {
        Self {
            id: id.to_string(),
            agent,
            client: Arc::new(RwLock::new(None)),
            context_listeners: Mutex::new(HashMap::new()),
            intent_listeners: Mutex::new(HashMap::new()),
            listener_counter: AtomicU64::new(0),
        }
    }

    /// Connection ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether a client is attached.
    pub fn has_client(&self) -> bool {
        self.client.read_state().is_some()
    }

    /// Number of listeners this connection currently holds.
    pub fn listener_count(&self) -> usize {
        lock_state(&self.context_listeners).len() + lock_state(&self.intent_listeners).len()
    }

    /// Serve a decoded request.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let method = request.method();
        let response = match request {
            RpcRequest::Broadcast { context } => RpcResponse::from_result(self.broadcast(context).await),
            RpcRequest::RegisterContextListener { filter } => {
                RpcResponse::from_result(self.register_context_listener(filter).await)
            }
            RpcRequest::RegisterIntentListener { intent, filter } => {
                RpcResponse::from_result(self.register_intent_listener(&intent, filter).await)
            }
            RpcRequest::UnregisterListener { listener_id } => {
                RpcResponse::from_result(self.unregister_listener(&listener_id).await)
            }
            RpcRequest::RaiseIntent {
                intent,
                context,
                target,
            } => RpcResponse::from_result(self.raise_intent(&intent, context, target).await),
            RpcRequest::FindIntent { intent, context } => {
                RpcResponse::from_result(self.find_intent(&intent, context).await)
            }
            RpcRequest::FindIntentsByContext { context } => {
                RpcResponse::from_result(self.find_intents_by_context(context).await)
            }
            RpcRequest::GetOrCreateChannel { channel_id } => {
                RpcResponse::from_result(self.get_or_create_channel(&channel_id).await)
            }
            RpcRequest::GetCurrentChannel => RpcResponse::from_result(self.get_current_channel().await),
            RpcRequest::LeaveCurrentChannel => {
                RpcResponse::from_result(self.leave_current_channel().await)
            }
            RpcRequest::GetInfo => RpcResponse::from_result(self.get_info().await),
            RpcRequest::GetAppMetadata { app } => {
                RpcResponse::from_result(self.get_app_metadata(app).await)
            }
        };

        if let Some(error) = &response.error {
            tracing::debug!(connection = %self.id, method, error = %error, "Remote call failed");
        }
        response
    }

    /// Unsubscribe everything this connection registered and detach the
    /// client.
    pub async fn dispose(&self) {
        let listeners: Vec<Listener> = lock_state(&self.context_listeners)
            .drain()
            .chain(lock_state(&self.intent_listeners).drain())
            .map(|(_, listener)| listener)
            .collect();
        for listener in &listeners {
            listener.unsubscribe().await;
        }
        *self.client.write_state() = None;

        tracing::debug!(connection = %self.id, released = listeners.len(), "Backend connection disposed");
    }

    fn next_listener_id(&self, prefix: &str) -> ListenerId {
        let n = self.listener_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}:{}", prefix, n)
    }

    fn current_client(slot: &ClientSlot) -> Option<Arc<dyn Fdc3Client>> {
        slot.read_state().clone()
    }
}

#[async_trait]
impl Fdc3Service for BackendConnection {
    fn set_client(&self, client: Option<Arc<dyn Fdc3Client>>) {
        *self.client.write_state() = client;
    }

    async fn broadcast(&self, context: Context) -> Result<()> {
        self.agent.broadcast(context).await.map(|_| ())
    }

    async fn register_context_listener(&self, filter: ContextFilter) -> Result<ListenerId> {
        let listener_id = self.next_listener_id("ctx");
        let slot = self.client.clone();
        let remote_id = listener_id.clone();
        let listener = self
            .agent
            .add_context_listener_with_filter(
                filter.as_deref(),
                context_handler(move |context: Context| {
                    let client = Self::current_client(&slot);
                    let remote_id = remote_id.clone();
                    async move {
                        if let Some(client) = client {
                            client.on_context(&remote_id, context).await;
                        }
                        Ok(())
                    }
                }),
            )
            .await?;

        lock_state(&self.context_listeners).insert(listener_id.clone(), listener);
        Ok(listener_id)
    }

    async fn register_intent_listener(&self, intent: &str, filter: ContextFilter) -> Result<ListenerId> {
        let listener_id = self.next_listener_id("intent");
        let slot = self.client.clone();
        let remote_id = listener_id.clone();
        let listener = self
            .agent
            .add_intent_listener_with_filter(
                intent,
                filter.as_deref(),
                intent_handler(move |context: Context| {
                    let client = Self::current_client(&slot);
                    let remote_id = remote_id.clone();
                    async move {
                        match client {
                            Some(client) => client.on_intent(&remote_id, context).await,
                            None => Ok(None),
                        }
                    }
                }),
            )
            .await?;

        lock_state(&self.intent_listeners).insert(listener_id.clone(), listener);
        Ok(listener_id)
    }

    /// Context listener ids are tried before intent listener ids. Unknown
    /// ids are ignored.
    async fn unregister_listener(&self, listener_id: &str) -> Result<()> {
        let context_listener = lock_state(&self.context_listeners).remove(listener_id);
        if let Some(listener) = context_listener {
            listener.unsubscribe().await;
            return Ok(());
        }

        let intent_listener = lock_state(&self.intent_listeners).remove(listener_id);
        if let Some(listener) = intent_listener {
            listener.unsubscribe().await;
        }
        Ok(())
    }

    /// Awaits the handler. A failing handler yields a resolution without a
    /// result.
    async fn raise_intent(
        &self,
        intent: &str,
        context: Option<Context>,
        target: Option<IntentTarget>,
    ) -> Result<IntentResolutionPlain> {
        let resolution = self.agent.raise_intent(intent, context, target).await?;
        let result = match resolution.get_result().await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(connection = %self.id, intent, error = %err, "Intent handler failed");
                None
            }
        };

        Ok(IntentResolutionPlain {
            source: resolution.source,
            intent: resolution.intent,
            result,
        })
    }

    async fn find_intent(&self, intent: &str, context: Option<Context>) -> Result<AppIntent> {
        self.agent.find_intent(intent, context.as_ref()).await
    }

    async fn find_intents_by_context(&self, context: Context) -> Result<Vec<AppIntent>> {
        self.agent.find_intents_by_context(&context).await
    }

    async fn get_or_create_channel(&self, channel_id: &str) -> Result<ChannelInfo> {
        Ok(self.agent.get_or_create_channel(channel_id).await?.info())
    }

    async fn get_current_channel(&self) -> Result<Option<ChannelInfo>> {
        Ok(Some(self.agent.get_current_channel().await?.info()))
    }

    async fn leave_current_channel(&self) -> Result<()> {
        self.agent.leave_current_channel().await
    }

    async fn get_info(&self) -> Result<ImplementationMetadata> {
        Ok(self.agent.get_info().await)
    }

    async fn get_app_metadata(&self, app: AppIdentifier) -> Result<AppMetadata> {
        Ok(self.agent.get_app_metadata(&app).await)
    }
}

/// Hands out one [`BackendConnection`] per remote client over a shared
/// agent.
pub struct BackendHub {
    agent: DesktopAgent,
    connections: Mutex<HashMap<String, Arc<BackendConnection>>>,
    connection_counter: AtomicU64,
}

impl BackendHub {
    pub fn new(agent: DesktopAgent) -> Self {
        Self {
            agent,
            connections: Mutex::new(HashMap::new()),
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Shared agent.
    pub fn agent(&self) -> &DesktopAgent {
        &self.agent
    }

    /// Open a connection, optionally with its client attached.
    pub fn connect(&self, client: Option<Arc<dyn Fdc3Client>>) -> Arc<BackendConnection> {
        let n = self.connection_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let connection = Arc::new(BackendConnection::new(&format!("conn:{}", n), self.agent.clone()));
        connection.set_client(client);

        lock_state(&self.connections).insert(connection.id().to_string(), connection.clone());
        tracing::debug!(connection = %connection.id(), "Backend connection opened");
        connection
    }

    pub fn get_connection(&self, connection_id: &str) -> Option<Arc<BackendConnection>> {
        lock_state(&self.connections).get(connection_id).cloned()
    }

    /// Dispose and forget a connection.
    pub async fn disconnect(&self, connection_id: &str) -> bool {
        let connection = lock_state(&self.connections).remove(connection_id);
        match connection {
            Some(connection) => {
                connection.dispose().await;
                true
            }
            None => false,
        }
    }

    /// Dispose every connection.
    pub async fn dispose(&self) {
        let connections: Vec<Arc<BackendConnection>> =
            lock_state(&self.connections).drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.dispose().await;
        }
    }

    pub fn connection_count(&self) -> usize {
        lock_state(&self.connections).len()
    }
}
