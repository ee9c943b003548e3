//! Trusted main-surface proxy.
//!
//! Exposes the agent API in-process while forwarding every call to a remote
//! [`Fdc3Service`]. Handlers stay local, keyed by the listener id the
//! service issued, and are driven through the [`Fdc3Client`] callbacks.

use crate::agent::{
    BridgeConfig, ImplementationMetadata, IntentResolution, Listener, ListenerKind, ListenerOwner,
};
use crate::bridge::protocol::{Fdc3Client, Fdc3Service};
use crate::channel::{ChannelInfo, DisplayMetadata, WORKSPACE_CHANNEL_TYPE};
use crate::context::{Context, ContextHandler};
use crate::core::{lock_state, ChannelId, Error, ListenerId, LockExt, Result};
use crate::intent::{AppIdentifier, AppIntent, AppMetadata, IntentHandler, IntentResult, IntentTarget};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};

pub(crate) struct FrontendCore {
    service: Arc<dyn Fdc3Service>,
    origin: String,
    allowed_origins: RwLock<HashSet<String>>,
    context_handlers: Mutex<HashMap<ListenerId, Arc<dyn ContextHandler>>>,
    intent_handlers: Mutex<HashMap<ListenerId, Arc<dyn IntentHandler>>>,
    channel_cache: Mutex<HashMap<ChannelId, Arc<RemoteChannel>>>,
}

#[async_trait]
impl ListenerOwner for FrontendCore {
    async fn release_listener(&self, kind: ListenerKind, listener_id: &str) {
        let removed = match kind {
            ListenerKind::Context => lock_state(&self.context_handlers).remove(listener_id).is_some(),
            ListenerKind::Intent => lock_state(&self.intent_handlers).remove(listener_id).is_some(),
        };
        if !removed {
            return;
        }
        if let Err(err) = self.service.unregister_listener(listener_id).await {
            tracing::warn!(listener_id, error = %err, "Failed to unregister remote listener");
        }
    }
}

#[async_trait]
impl Fdc3Client for FrontendCore {
    async fn on_context(&self, listener_id: &str, context: Context) {
        let handler = lock_state(&self.context_handlers).get(listener_id).cloned();
        let Some(handler) = handler else {
            tracing::debug!(listener_id, "Context for unknown listener");
            return;
        };
        if let Err(err) = handler.handle(context).await {
            tracing::warn!(listener_id, error = %err, "Context listener execution failed");
        }
    }

    async fn on_intent(&self, listener_id: &str, context: Context) -> Result<Option<IntentResult>> {
        let handler = lock_state(&self.intent_handlers).get(listener_id).cloned();
        let Some(handler) = handler else {
            return Ok(None);
        };
        handler.handle(context).await.inspect_err(|err| {
            tracing::error!(listener_id, error = %err, "Intent handler failed");
        })
    }
}

/// Client stub handed to the service. Holds the proxy weakly so the
/// service never keeps it alive.
struct FrontendClient {
    core: Weak<FrontendCore>,
}

#[async_trait]
impl Fdc3Client for FrontendClient {
    async fn on_context(&self, listener_id: &str, context: Context) {
        if let Some(core) = self.core.upgrade() {
            core.on_context(listener_id, context).await;
        }
    }

    async fn on_intent(&self, listener_id: &str, context: Context) -> Result<Option<IntentResult>> {
        match self.core.upgrade() {
            Some(core) => core.on_intent(listener_id, context).await,
            None => Err(Error::ConnectionClosed),
        }
    }
}

/// In-process agent API backed by a remote service.
#[derive(Clone)]
pub struct FrontendAgent {
    core: Arc<FrontendCore>,
}

impl FrontendAgent {
    /// Create a proxy for a caller running at `origin` and attach it as the
    /// service's client.
    ///
    /// The caller's own origin is always trusted.
    pub fn connect(service: Arc<dyn Fdc3Service>, origin: &str, config: &BridgeConfig) -> Self {
        let mut allowed: HashSet<String> = config.allowed_origins.iter().cloned().collect();
        allowed.insert(origin.to_string());

        let agent = Self {
            core: Arc::new(FrontendCore {
                service,
                origin: origin.to_string(),
                allowed_origins: RwLock::new(allowed),
                context_handlers: Mutex::new(HashMap::new()),
                intent_handlers: Mutex::new(HashMap::new()),
                channel_cache: Mutex::new(HashMap::new()),
            }),
        };
        agent.core.service.set_client(Some(agent.client()));
        agent
    }

    /// Client stub routing service callbacks to this proxy.
    pub fn client(&self) -> Arc<dyn Fdc3Client> {
        Arc::new(FrontendClient {
            core: Arc::downgrade(&self.core),
        })
    }

    /// Trust another origin.
    pub fn allow_origin(&self, origin: &str) {
        self.core.allowed_origins.write_state().insert(origin.to_string());
    }

    pub fn is_trusted(&self, origin: &str) -> bool {
        self.core.allowed_origins.read_state().contains(origin)
    }

    /// Fail with `UntrustedOrigin` unless the origin is allow-listed.
    pub fn validate_origin(&self, origin: &str) -> Result<()> {
        if self.is_trusted(origin) {
            Ok(())
        } else {
            Err(Error::UntrustedOrigin(origin.to_string()))
        }
    }

    fn ensure_trusted_caller(&self) -> Result<()> {
        self.validate_origin(&self.core.origin)
    }

    pub async fn broadcast(&self, context: Context) -> Result<()> {
        self.ensure_trusted_caller()?;
        tracing::debug!(context_type = %context.context_type, "Forwarding broadcast");
        self.core.service.broadcast(context).await
    }

    pub async fn add_context_listener<H>(&self, handler: H) -> Result<Listener>
    where
        H: ContextHandler + 'static,
    {
        self.add_context_listener_with_filter(None, handler).await
    }

    pub async fn add_context_listener_with_filter<H>(
        &self,
        filter: Option<&str>,
        handler: H,
    ) -> Result<Listener>
    where
        H: ContextHandler + 'static,
    {
        self.ensure_trusted_caller()?;
        let listener_id = self
            .core
            .service
            .register_context_listener(filter.map(str::to_string))
            .await?;
        lock_state(&self.core.context_handlers).insert(listener_id.clone(), Arc::new(handler));
        let owner: Weak<FrontendCore> = Arc::downgrade(&self.core);
        Ok(Listener::new(listener_id, ListenerKind::Context, owner))
    }

    pub async fn add_intent_listener<H>(&self, intent: &str, handler: H) -> Result<Listener>
    where
        H: IntentHandler + 'static,
    {
        self.add_intent_listener_with_filter(intent, None, handler).await
    }

    pub async fn add_intent_listener_with_filter<H>(
        &self,
        intent: &str,
        filter: Option<&str>,
        handler: H,
    ) -> Result<Listener>
    where
        H: IntentHandler + 'static,
    {
        self.ensure_trusted_caller()?;
        let listener_id = self
            .core
            .service
            .register_intent_listener(intent, filter.map(str::to_string))
            .await?;
        lock_state(&self.core.intent_handlers).insert(listener_id.clone(), Arc::new(handler));
        let owner: Weak<FrontendCore> = Arc::downgrade(&self.core);
        Ok(Listener::new(listener_id, ListenerKind::Intent, owner))
    }

    /// Raise an intent remotely. The returned resolution already carries the
    /// handler's result.
    pub async fn raise_intent(
        &self,
        intent: &str,
        context: Option<Context>,
        target: Option<IntentTarget>,
    ) -> Result<IntentResolution> {
        self.ensure_trusted_caller()?;
        let plain = self.core.service.raise_intent(intent, context, target).await?;
        tracing::debug!(intent = %plain.intent, source = %plain.source, "Intent resolved remotely");
        Ok(IntentResolution::completed(plain.source, &plain.intent, Ok(plain.result)))
    }

    pub async fn find_intent(&self, intent: &str, context: Option<Context>) -> Result<AppIntent> {
        self.ensure_trusted_caller()?;
        self.core.service.find_intent(intent, context).await
    }

    pub async fn find_intents_by_context(&self, context: Context) -> Result<Vec<AppIntent>> {
        self.ensure_trusted_caller()?;
        self.core.service.find_intents_by_context(context).await
    }

    /// Channel proxy, cached per requested id.
    pub async fn get_or_create_channel(&self, channel_id: &str) -> Result<Arc<RemoteChannel>> {
        self.ensure_trusted_caller()?;
        let cached = lock_state(&self.core.channel_cache).get(channel_id).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        let info = self.core.service.get_or_create_channel(channel_id).await?;
        Ok(self.cache_channel(channel_id, info))
    }

    pub async fn get_current_channel(&self) -> Result<Option<Arc<RemoteChannel>>> {
        self.ensure_trusted_caller()?;
        let Some(info) = self.core.service.get_current_channel().await? else {
            return Ok(None);
        };
        let id = info.id.clone();
        Ok(Some(self.cache_channel(&id, info)))
    }

    pub async fn leave_current_channel(&self) -> Result<()> {
        self.ensure_trusted_caller()?;
        self.core.service.leave_current_channel().await
    }

    pub async fn get_info(&self) -> Result<ImplementationMetadata> {
        self.ensure_trusted_caller()?;
        self.core.service.get_info().await
    }

    pub async fn get_app_metadata(&self, app: AppIdentifier) -> Result<AppMetadata> {
        self.ensure_trusted_caller()?;
        self.core.service.get_app_metadata(app).await
    }

    /// Number of locally held handlers.
    pub fn handler_count(&self) -> usize {
        lock_state(&self.core.context_handlers).len() + lock_state(&self.core.intent_handlers).len()
    }

    fn cache_channel(&self, key: &str, info: ChannelInfo) -> Arc<RemoteChannel> {
        lock_state(&self.core.channel_cache)
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(RemoteChannel {
                    info,
                    agent: Arc::downgrade(&self.core),
                })
            })
            .clone()
    }
}

impl std::fmt::Debug for FrontendAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontendAgent")
            .field("origin", &self.core.origin)
            .field("handlers", &self.handler_count())
            .finish_non_exhaustive()
    }
}

/// Channel proxy on the main surface.
pub struct RemoteChannel {
    info: ChannelInfo,
    agent: Weak<FrontendCore>,
}

impl RemoteChannel {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn channel_type(&self) -> &str {
        self.info
            .channel_type
            .as_deref()
            .unwrap_or(WORKSPACE_CHANNEL_TYPE)
    }

    pub fn display_metadata(&self) -> Option<&DisplayMetadata> {
        self.info.display_metadata.as_ref()
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    pub async fn broadcast(&self, context: Context) -> Result<()> {
        self.agent()?.broadcast(context).await
    }

    pub async fn add_context_listener<H>(&self, handler: H) -> Result<Listener>
    where
        H: ContextHandler + 'static,
    {
        self.agent()?.add_context_listener(handler).await
    }

    pub async fn add_context_listener_with_filter<H>(
        &self,
        filter: Option<&str>,
        handler: H,
    ) -> Result<Listener>
    where
        H: ContextHandler + 'static,
    {
        self.agent()?.add_context_listener_with_filter(filter, handler).await
    }

    fn agent(&self) -> Result<FrontendAgent> {
        self.agent
            .upgrade()
            .map(|core| FrontendAgent { core })
            .ok_or(Error::ConnectionClosed)
    }
}
