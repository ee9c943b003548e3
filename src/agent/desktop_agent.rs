//! Desktop agent facade.
//!
//! Composes the validator, channel mapper, context bus and intent registry
//! into the public interop API. Every call is scoped to the workspace the
//! resolver reports as active.

use crate::agent::channel::Channel;
use crate::agent::config::AgentConfig;
use crate::agent::listener::{Listener, ListenerKind, ListenerOwner};
use crate::agent::resolution::{ImplementationMetadata, IntentResolution, OptionalFeatures};
use crate::agent::workspace::{InMemoryWorkspaceResolver, WorkspaceResolver};
use crate::channel::{
    AppInstanceModel, ChannelMember, ChannelModel, DeliveryReport, WorkspaceChannelMapper,
    WorkspaceContextBus,
};
use crate::context::{Context, ContextEnvelope, ContextHandler, ContextValidator};
use crate::core::{lock_state, ChannelId, Error, ListenerId, ResolutionError, Result, WorkspaceId};
use crate::intent::{
    AppIdentifier, AppIntent, AppMetadata, IntentHandler, IntentMetadata, IntentRegistry,
    IntentTarget, NOTHING_CONTEXT_TYPE,
};
use crate::monitoring::{summarize_context, InteropLogger, LogEntry, LogLevel};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

struct ListenerBinding {
    workspace_id: WorkspaceId,
}

/// Shared state behind a [`DesktopAgent`] and its channel proxies.
pub(crate) struct AgentCore {
    config: AgentConfig,
    validator: ContextValidator,
    mapper: Arc<WorkspaceChannelMapper>,
    bus: WorkspaceContextBus,
    intents: IntentRegistry,
    resolver: Arc<dyn WorkspaceResolver>,
    logger: Arc<InteropLogger>,
    channels: Mutex<HashMap<ChannelId, Arc<Channel>>>,
    bindings: Mutex<HashMap<ListenerId, ListenerBinding>>,
}

#[async_trait]
impl ListenerOwner for AgentCore {
    async fn release_listener(&self, kind: ListenerKind, listener_id: &str) {
        let removed = match kind {
            ListenerKind::Context => self.bus.remove_listener(listener_id),
            ListenerKind::Intent => self.intents.remove_listener(listener_id),
        };
        let binding = lock_state(&self.bindings).remove(listener_id);

        if removed {
            self.logger.debug(
                LogEntry::new(LogLevel::Debug, "Listener removed")
                    .with_field("listenerId", listener_id)
                    .with_field("workspaceId", binding.map(|b| b.workspace_id)),
            );
        }
    }
}

/// Workspace-scoped desktop interop agent.
///
/// Cheap to clone; clones share the same routing state.
#[derive(Clone)]
pub struct DesktopAgent {
    core: Arc<AgentCore>,
}

impl DesktopAgent {
    /// Create an agent whose active workspace starts at
    /// `config.default_workspace`.
    pub fn new(config: AgentConfig) -> Self {
        let resolver = Arc::new(InMemoryWorkspaceResolver::new(&config.default_workspace));
        Self::with_resolver(config, resolver)
    }

    /// Create an agent using an external workspace resolver.
    pub fn with_resolver(config: AgentConfig, resolver: Arc<dyn WorkspaceResolver>) -> Self {
        let logger = Arc::new(InteropLogger::new(config.logger.clone()));
        let mapper = Arc::new(WorkspaceChannelMapper::new());
        Self {
            core: Arc::new(AgentCore {
                config,
                validator: ContextValidator::new(),
                bus: WorkspaceContextBus::new(mapper.clone()),
                mapper,
                intents: IntentRegistry::new(),
                resolver,
                logger,
                channels: Mutex::new(HashMap::new()),
                bindings: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn from_core(core: Arc<AgentCore>) -> Self {
        Self { core }
    }

    /// Agent configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.core.config
    }

    /// Log sink shared with the bridges.
    pub fn logger(&self) -> Arc<InteropLogger> {
        self.core.logger.clone()
    }

    pub fn context_bus(&self) -> &WorkspaceContextBus {
        &self.core.bus
    }

    pub fn intent_registry(&self) -> &IntentRegistry {
        &self.core.intents
    }

    pub fn channel_mapper(&self) -> &WorkspaceChannelMapper {
        &self.core.mapper
    }

    /// Workspace all calls are currently scoped to.
    pub fn active_workspace_id(&self) -> WorkspaceId {
        self.core.resolver.active_workspace_id()
    }

    /// Switch the workspace subsequent calls are scoped to.
    pub fn set_active_workspace(&self, workspace_id: &str) {
        self.core.resolver.set_active_workspace(workspace_id);
    }

    /// Number of listeners issued by this agent that are still registered.
    pub fn active_listener_count(&self) -> usize {
        lock_state(&self.core.bindings).len()
    }

    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    /// Broadcast a context on the active workspace channel.
    ///
    /// Returns once every matching handler is dispatched; handler outcomes
    /// are collected through [`DeliveryReport::settled`].
    pub async fn broadcast(&self, context: Context) -> Result<DeliveryReport> {
        let workspace_id = self.active_workspace_id();
        self.broadcast_in(&workspace_id, context, None).await
    }

    /// Broadcast on behalf of an app instance. Dropped unless the instance
    /// is a member of the workspace channel.
    pub async fn broadcast_from(&self, origin: &str, context: Context) -> Result<DeliveryReport> {
        let workspace_id = self.active_workspace_id();
        self.broadcast_in(&workspace_id, context, Some(origin)).await
    }

    pub(crate) async fn broadcast_in(
        &self,
        workspace_id: &str,
        context: Context,
        origin: Option<&str>,
    ) -> Result<DeliveryReport> {
        if let Err(err) = self.core.validator.validate(&context) {
            self.log_failure("Broadcast rejected", workspace_id, &err);
            return Err(err);
        }

        let channel = self.ensure_channel(workspace_id, None)?;
        let mut envelope = ContextEnvelope::new(workspace_id, &channel.id, context.clone());
        if let Some(origin) = origin {
            envelope = envelope.with_origin(origin);
        }

        match self.core.bus.broadcast(envelope).await {
            Ok(report) => {
                if !report.rejected {
                    let summary = summarize_context(Some(&context));
                    self.core.mapper.update_last_context(workspace_id, Some(context));
                    self.core.logger.info(
                        LogEntry::new(LogLevel::Info, "Broadcast dispatched")
                            .with_field("workspaceId", workspace_id)
                            .with_field("channelId", &channel.id)
                            .with_field("context", summary)
                            .with_field("listeners", &report.dispatched),
                    );
                }
                Ok(report)
            }
            Err(err) => {
                self.log_failure("Broadcast failed", workspace_id, &err);
                Err(err)
            }
        }
    }

    /// Listen to every context broadcast on the active workspace channel.
    pub async fn add_context_listener<H>(&self, handler: H) -> Result<Listener>
    where
        H: ContextHandler + 'static,
    {
        self.add_context_listener_with_filter(None, handler).await
    }

    /// Listen to contexts of one type (`None` or `"*"` for all).
    pub async fn add_context_listener_with_filter<H>(
        &self,
        filter: Option<&str>,
        handler: H,
    ) -> Result<Listener>
    where
        H: ContextHandler + 'static,
    {
        let workspace_id = self.active_workspace_id();
        self.add_context_listener_in(&workspace_id, filter, Arc::new(handler))
    }

    pub(crate) fn add_context_listener_in(
        &self,
        workspace_id: &str,
        filter: Option<&str>,
        handler: Arc<dyn ContextHandler>,
    ) -> Result<Listener> {
        let channel = self.ensure_channel(workspace_id, None)?;
        let descriptor = match self.core.bus.register_listener(
            workspace_id,
            Some(&channel.id),
            handler,
            filter.map(str::to_string),
        ) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                self.log_failure("Context listener registration failed", workspace_id, &err);
                return Err(err);
            }
        };

        self.core.logger.debug(
            LogEntry::new(LogLevel::Debug, "Context listener registered")
                .with_field("workspaceId", workspace_id)
                .with_field("channelId", &channel.id)
                .with_field("listenerId", &descriptor.id)
                .with_field("filter", &descriptor.filter),
        );
        Ok(self.bind_listener(descriptor.id, ListenerKind::Context, workspace_id))
    }

    /// Latest context on a workspace channel, optionally only if it has the
    /// given type.
    pub fn channel_context_snapshot(
        &self,
        workspace_id: &str,
        channel_id: &str,
        context_type: Option<&str>,
    ) -> Option<Context> {
        let envelope = self.core.bus.get_last_context(workspace_id, channel_id)?;
        match context_type {
            Some(context_type) if envelope.context.context_type != context_type => None,
            _ => Some(envelope.context),
        }
    }

    // ------------------------------------------------------------------
    // Intents
    // ------------------------------------------------------------------

    /// Handle an intent for any context type.
    pub async fn add_intent_listener<H>(&self, intent: &str, handler: H) -> Result<Listener>
    where
        H: IntentHandler + 'static,
    {
        self.add_intent_listener_in(None, intent, None, None, Arc::new(handler))
    }

    /// Handle an intent for one context type.
    pub async fn add_intent_listener_with_filter<H>(
        &self,
        intent: &str,
        filter: Option<&str>,
        handler: H,
    ) -> Result<Listener>
    where
        H: IntentHandler + 'static,
    {
        self.add_intent_listener_in(None, intent, filter, None, Arc::new(handler))
    }

    /// Handle an intent under an explicit application identity, so raisers
    /// can target it.
    pub async fn add_intent_listener_as<H>(
        &self,
        intent: &str,
        filter: Option<&str>,
        source: AppIdentifier,
        handler: H,
    ) -> Result<Listener>
    where
        H: IntentHandler + 'static,
    {
        self.add_intent_listener_in(None, intent, filter, Some(source), Arc::new(handler))
    }

    pub(crate) fn add_intent_listener_in(
        &self,
        workspace_id: Option<&str>,
        intent: &str,
        filter: Option<&str>,
        source: Option<AppIdentifier>,
        handler: Arc<dyn IntentHandler>,
    ) -> Result<Listener> {
        let workspace_id = workspace_id
            .map(str::to_string)
            .unwrap_or_else(|| self.active_workspace_id());
        let descriptor = self.core.intents.register_listener(
            &workspace_id,
            intent,
            handler,
            filter.map(str::to_string),
            source,
        );

        self.core.logger.debug(
            LogEntry::new(LogLevel::Debug, "Intent listener registered")
                .with_field("workspaceId", &workspace_id)
                .with_field("intent", intent)
                .with_field("listenerId", &descriptor.id)
                .with_field("filter", &descriptor.context_filter),
        );
        Ok(self.bind_listener(descriptor.id, ListenerKind::Intent, &workspace_id))
    }

    /// Route an intent to exactly one handler in the active workspace.
    ///
    /// The handler starts immediately; its outcome is available through
    /// [`IntentResolution::get_result`]. Without a context the handler
    /// receives an `fdc3.nothing` context.
    pub async fn raise_intent(
        &self,
        intent: &str,
        context: Option<Context>,
        target: Option<IntentTarget>,
    ) -> Result<IntentResolution> {
        let workspace_id = self.active_workspace_id();
        if let Some(context) = &context {
            if let Err(err) = self.core.validator.validate(context) {
                self.log_failure("Intent raise rejected", &workspace_id, &err);
                return Err(err);
            }
        }

        let chosen = match self.core.intents.resolve(
            &workspace_id,
            intent,
            context.as_ref(),
            target.as_ref(),
        ) {
            Ok(chosen) => chosen,
            Err(err) => {
                self.log_failure("Intent resolution failed", &workspace_id, &err);
                return Err(err);
            }
        };

        let source = chosen.app_identifier();
        self.core.logger.info(
            LogEntry::new(LogLevel::Info, "Intent routed")
                .with_field("workspaceId", &workspace_id)
                .with_field("intent", intent)
                .with_field("target", &target)
                .with_field("handler", &source)
                .with_field("context", summarize_context(context.as_ref())),
        );

        let handler = chosen.handler.clone();
        let payload = context.unwrap_or_else(|| Context::new(NOTHING_CONTEXT_TYPE));
        let logger = self.core.logger.clone();
        let listener_id = chosen.id.clone();
        Ok(IntentResolution::spawn(source, intent, async move {
            let outcome = handler.handle(payload).await;
            if let Err(err) = &outcome {
                logger.error(
                    LogEntry::new(LogLevel::Error, "Intent handler failed")
                        .with_field("listenerId", &listener_id)
                        .with_field("error", err.to_string()),
                );
            }
            outcome
        }))
    }

    /// Apps able to handle an intent, optionally narrowed to a context.
    ///
    /// Fails with `NoIntentHandler` when nothing is registered, or when no
    /// registered handler accepts the context.
    pub async fn find_intent(&self, intent: &str, context: Option<&Context>) -> Result<AppIntent> {
        let workspace_id = self.active_workspace_id();
        if let Some(context) = context {
            if let Err(err) = self.core.validator.validate(context) {
                self.log_failure("Intent lookup rejected", &workspace_id, &err);
                return Err(err);
            }
        }

        let mut listeners = self.core.intents.get_listeners(&workspace_id, intent);
        if let Some(context) = context {
            listeners.retain(|descriptor| descriptor.accepts(context));
        }
        if listeners.is_empty() {
            let err = Error::from(ResolutionError::NoIntentHandler {
                intent: intent.to_string(),
            });
            self.log_failure("Intent lookup found no handler", &workspace_id, &err);
            return Err(err);
        }

        Ok(AppIntent {
            intent: IntentMetadata {
                name: intent.to_string(),
            },
            apps: listeners.iter().map(|d| d.app_metadata()).collect(),
        })
    }

    /// Every intent in the active workspace with a handler accepting the
    /// context, sorted by intent name.
    pub async fn find_intents_by_context(&self, context: &Context) -> Result<Vec<AppIntent>> {
        let workspace_id = self.active_workspace_id();
        if let Err(err) = self.core.validator.validate(context) {
            self.log_failure("Intent lookup rejected", &workspace_id, &err);
            return Err(err);
        }

        Ok(self
            .core
            .intents
            .get_intents_for_workspace(&workspace_id)
            .into_iter()
            .filter_map(|(name, descriptors)| {
                let apps: Vec<AppMetadata> = descriptors
                    .iter()
                    .filter(|d| d.accepts(context))
                    .map(|d| d.app_metadata())
                    .collect();
                if apps.is_empty() {
                    None
                } else {
                    Some(AppIntent {
                        intent: IntentMetadata { name },
                        apps,
                    })
                }
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Channel proxy for the active workspace.
    ///
    /// The requested id only names the channel when the workspace has none
    /// yet; afterwards the workspace's primary channel is returned. A
    /// requested id already owned by another workspace fails with
    /// `ChannelConflict`. Proxies are cached per channel id.
    pub async fn get_or_create_channel(&self, channel_id: &str) -> Result<Arc<Channel>> {
        let workspace_id = self.active_workspace_id();
        let model = self.ensure_channel(&workspace_id, Some(channel_id))?;
        Ok(self.channel_proxy(&model))
    }

    /// Proxy for the active workspace's primary channel.
    ///
    /// A new channel is named after the workspace, with a numeric suffix if
    /// another workspace already uses that id.
    pub async fn get_current_channel(&self) -> Result<Arc<Channel>> {
        let workspace_id = self.active_workspace_id();
        let model = self.ensure_channel(&workspace_id, None)?;
        Ok(self.channel_proxy(&model))
    }

    /// No-op: workspace channels follow the workspace lifecycle.
    pub async fn leave_current_channel(&self) -> Result<()> {
        Ok(())
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub async fn get_info(&self) -> ImplementationMetadata {
        let config = &self.core.config;
        ImplementationMetadata {
            fdc3_version: config.fdc3_version.clone(),
            provider: config.provider.clone(),
            provider_version: config.provider_version.clone(),
            optional_features: OptionalFeatures::default(),
            app_metadata: AppMetadata {
                app_id: config.app_id.clone(),
                instance_id: None,
                name: config.app_name.clone(),
                title: config.app_name.clone(),
            },
        }
    }

    pub async fn get_app_metadata(&self, app: &AppIdentifier) -> AppMetadata {
        AppMetadata::from_identifier(app, &app.app_id)
    }

    // ------------------------------------------------------------------
    // Workspace lifecycle
    // ------------------------------------------------------------------

    /// Make an app instance a member of the active workspace channel.
    ///
    /// The returned model carries the workspace and channel it joined.
    pub async fn join_app(&self, mut app: AppInstanceModel) -> Result<AppInstanceModel> {
        let workspace_id = self.active_workspace_id();
        let channel = self.ensure_channel(&workspace_id, None)?;
        app.workspace_id = workspace_id.clone();
        app.joined_channel_id = channel.id.clone();

        if let Err(err) = self
            .core
            .bus
            .add_member(&workspace_id, &channel.id, ChannelMember::from(&app))
        {
            self.log_failure("App join failed", &workspace_id, &err);
            return Err(err);
        }
        self.sync_members(&workspace_id, &channel.id);

        self.core.logger.info(
            LogEntry::new(LogLevel::Info, "App joined workspace channel")
                .with_field("workspaceId", &workspace_id)
                .with_field("channelId", &channel.id)
                .with_field("instanceId", &app.instance_id),
        );
        Ok(app)
    }

    /// Remove an app instance from the active workspace channel.
    pub async fn leave_app(&self, instance_id: &str) -> bool {
        let workspace_id = self.active_workspace_id();
        let Some(channel) = self.core.mapper.get_channel_for_workspace(&workspace_id) else {
            return false;
        };

        let removed = self
            .core
            .bus
            .remove_member(&workspace_id, &channel.id, instance_id);
        if removed {
            self.sync_members(&workspace_id, &channel.id);
        }
        removed
    }

    /// Tear down a workspace: its listeners, channel and cached proxies.
    ///
    /// Returns the number of listeners removed. Handles issued for them
    /// become inert.
    pub async fn close_workspace(&self, workspace_id: &str) -> usize {
        let removed = self.core.bus.clear_workspace(workspace_id)
            + self.core.intents.clear_workspace(workspace_id);
        self.core.mapper.remove_workspace(workspace_id);
        lock_state(&self.core.channels).retain(|_, channel| channel.workspace_id() != workspace_id);
        lock_state(&self.core.bindings).retain(|_, binding| binding.workspace_id != workspace_id);

        self.core.logger.info(
            LogEntry::new(LogLevel::Info, "Workspace closed")
                .with_field("workspaceId", workspace_id)
                .with_field("listenersRemoved", removed),
        );
        removed
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_channel(
        &self,
        workspace_id: &str,
        requested_channel_id: Option<&str>,
    ) -> Result<Arc<ChannelModel>> {
        self.core
            .mapper
            .ensure_workspace(workspace_id, requested_channel_id)
            .inspect_err(|err| self.log_failure("Workspace channel unavailable", workspace_id, err))
    }

    fn channel_proxy(&self, model: &ChannelModel) -> Arc<Channel> {
        lock_state(&self.core.channels)
            .entry(model.id.clone())
            .or_insert_with(|| Arc::new(Channel::new(model, Arc::downgrade(&self.core))))
            .clone()
    }

    fn bind_listener(&self, id: ListenerId, kind: ListenerKind, workspace_id: &str) -> Listener {
        lock_state(&self.core.bindings).insert(
            id.clone(),
            ListenerBinding {
                workspace_id: workspace_id.to_string(),
            },
        );
        let owner: Weak<AgentCore> = Arc::downgrade(&self.core);
        Listener::new(id, kind, owner)
    }

    fn sync_members(&self, workspace_id: &str, channel_id: &str) {
        let members = self.core.bus.get_members(workspace_id, channel_id);
        self.core.mapper.update_channel_members(workspace_id, &members);
    }

    fn log_failure(&self, message: &str, workspace_id: &str, err: &Error) {
        let level = if err.is_resolution_failure() {
            LogLevel::Warn
        } else {
            LogLevel::Error
        };
        self.core.logger.log(
            LogEntry::new(level, message)
                .with_field("workspaceId", workspace_id)
                .with_field("error", err.to_string()),
        );
    }
}

impl Default for DesktopAgent {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

impl std::fmt::Debug for DesktopAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesktopAgent")
            .field("active_workspace", &self.active_workspace_id())
            .field("listeners", &self.active_listener_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::context_handler;
    use crate::intent::{intent_handler, IntentResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<Context>>>, impl ContextHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = context_handler(move |ctx: Context| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(ctx);
                Ok(())
            }
        });
        (seen, handler)
    }

    fn echo_handler() -> impl IntentHandler {
        intent_handler(|ctx: Context| async move { Ok(Some(IntentResult::Context(ctx))) })
    }

    fn client_context() -> Context {
        Context::new("x.client").with_id("clientId", "c1")
    }

    #[tokio::test]
    async fn test_broadcast_reaches_listener_once() {
        let agent = DesktopAgent::default();
        let (seen, handler) = recorder();
        agent.add_context_listener(handler).await.unwrap();

        let summary = agent.broadcast(client_context()).await.unwrap().settled().await;

        assert_eq!(summary.delivered, 1);
        assert_eq!(*seen.lock().unwrap(), vec![client_context()]);
    }

    #[tokio::test]
    async fn test_broadcast_rejects_invalid_context() {
        let agent = DesktopAgent::default();
        let (seen, handler) = recorder();
        agent.add_context_listener(handler).await.unwrap();

        let err = agent.broadcast(Context::new("  ")).await.unwrap_err();

        assert!(matches!(err, Error::InvalidContext(_)));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(agent.logger().get_logs_at_level(LogLevel::Error).len(), 1);
    }

    #[tokio::test]
    async fn test_workspace_isolation() {
        let agent = DesktopAgent::new(AgentConfig::default().with_default_workspace("w1"));
        let (w1_seen, w1_handler) = recorder();
        agent.add_context_listener(w1_handler).await.unwrap();

        agent.set_active_workspace("w2");
        let (w2_seen, w2_handler) = recorder();
        agent.add_context_listener(w2_handler).await.unwrap();

        agent.set_active_workspace("w1");
        agent.broadcast(client_context()).await.unwrap().settled().await;

        assert_eq!(w1_seen.lock().unwrap().len(), 1);
        assert!(w2_seen.lock().unwrap().is_empty());
        assert!(agent.channel_context_snapshot("w2", "w2", None).is_none());
    }

    #[tokio::test]
    async fn test_filtered_listener() {
        let agent = DesktopAgent::default();
        let (seen, handler) = recorder();
        agent
            .add_context_listener_with_filter(Some("fdc3.instrument"), handler)
            .await
            .unwrap();

        agent.broadcast(Context::new("fdc3.contact")).await.unwrap().settled().await;
        agent.broadcast(Context::new("fdc3.instrument")).await.unwrap().settled().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].context_type, "fdc3.instrument");
    }

    #[tokio::test]
    async fn test_unsubscribe_twice() {
        let agent = DesktopAgent::default();
        let (seen, handler) = recorder();
        let listener = agent.add_context_listener(handler).await.unwrap();
        assert_eq!(agent.active_listener_count(), 1);

        listener.unsubscribe().await;
        listener.unsubscribe().await;
        let report = agent.broadcast(client_context()).await.unwrap();

        assert!(report.dispatched.is_empty());
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(agent.active_listener_count(), 0);
        assert_eq!(agent.context_bus().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_reach_broadcaster() {
        let agent = DesktopAgent::default();
        agent
            .add_context_listener(context_handler(|_ctx: Context| async move {
                Err(Error::HandlerFailed("listener broke".to_string()))
            }))
            .await
            .unwrap();
        let (seen, handler) = recorder();
        agent.add_context_listener(handler).await.unwrap();

        let summary = agent.broadcast(client_context()).await.unwrap().settled().await;

        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hung_listener_does_not_block_broadcast() {
        let agent = DesktopAgent::default();
        agent
            .add_context_listener(context_handler(|_ctx: Context| async move {
                futures::future::pending::<()>().await;
                Ok(())
            }))
            .await
            .unwrap();
        let (seen, handler) = recorder();
        agent.add_context_listener(handler).await.unwrap();

        let report = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            agent.broadcast(client_context()),
        )
        .await
        .expect("broadcast returned")
        .unwrap();
        assert_eq!(report.dispatched.len(), 2);

        crate::core::testing::settle_tasks().await;
        assert_eq!(*seen.lock().unwrap(), vec![client_context()]);
    }

    #[tokio::test]
    async fn test_broadcast_updates_snapshots() {
        let agent = DesktopAgent::default();
        agent.broadcast(client_context()).await.unwrap();

        let channel = agent.channel_mapper().get_channel_for_workspace("default").unwrap();
        assert_eq!(channel.last_context, Some(client_context()));
        assert_eq!(
            agent.channel_context_snapshot("default", "default", Some("x.client")),
            Some(client_context())
        );
        assert!(agent
            .channel_context_snapshot("default", "default", Some("fdc3.order"))
            .is_none());
    }

    #[tokio::test]
    async fn test_broadcast_from_requires_membership() {
        let agent = DesktopAgent::default();
        let (seen, handler) = recorder();
        agent.add_context_listener(handler).await.unwrap();

        let report = agent.broadcast_from("i1", client_context()).await.unwrap();
        assert!(report.rejected);
        assert!(seen.lock().unwrap().is_empty());

        let joined = agent
            .join_app(AppInstanceModel::new("i1", "chart", "", ""))
            .await
            .unwrap();
        assert_eq!(joined.workspace_id, "default");
        assert_eq!(joined.joined_channel_id, "default");
        assert_eq!(
            agent.channel_mapper().get_channel_for_workspace("default").unwrap().members,
            vec!["i1".to_string()]
        );

        let report = agent.broadcast_from("i1", client_context()).await.unwrap();
        assert!(!report.rejected);
        report.settled().await;
        assert_eq!(seen.lock().unwrap().len(), 1);

        assert!(agent.leave_app("i1").await);
        assert!(!agent.leave_app("i1").await);
        assert!(agent.broadcast_from("i1", client_context()).await.unwrap().rejected);
    }

    #[tokio::test]
    async fn test_raise_intent_single_handler() {
        let agent = DesktopAgent::default();
        agent.add_intent_listener("ViewChart", echo_handler()).await.unwrap();

        let resolution = agent
            .raise_intent("ViewChart", Some(Context::new("fdc3.instrument")), None)
            .await
            .unwrap();

        assert_eq!(resolution.intent, "ViewChart");
        assert_eq!(resolution.source.app_id, "workspace:default");
        assert_eq!(
            resolution.get_result().await.unwrap(),
            Some(IntentResult::Context(Context::new("fdc3.instrument")))
        );
    }

    #[tokio::test]
    async fn test_raise_intent_without_context() {
        let agent = DesktopAgent::default();
        agent.add_intent_listener("StartCall", echo_handler()).await.unwrap();

        let resolution = agent.raise_intent("StartCall", None, None).await.unwrap();
        assert_eq!(
            resolution.get_result().await.unwrap(),
            Some(IntentResult::Context(Context::new(NOTHING_CONTEXT_TYPE)))
        );
    }

    #[tokio::test]
    async fn test_raise_intent_no_handler() {
        let agent = DesktopAgent::default();
        let err = agent.raise_intent("ViewChart", None, None).await.unwrap_err();

        assert!(matches!(
            err.as_resolution(),
            Some(ResolutionError::NoIntentHandler { .. })
        ));
        assert_eq!(agent.logger().get_logs_at_level(LogLevel::Warn).len(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_intent_and_target() {
        let agent = DesktopAgent::default();
        agent
            .add_intent_listener_as("x.ticket.view", None, AppIdentifier::new("app-a"), echo_handler())
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        agent
            .add_intent_listener_as(
                "x.ticket.view",
                None,
                AppIdentifier::new("app-b"),
                intent_handler(move |_ctx: Context| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                }),
            )
            .await
            .unwrap();

        let err = agent.raise_intent("x.ticket.view", None, None).await.unwrap_err();
        assert!(matches!(
            err.as_resolution(),
            Some(ResolutionError::AmbiguousIntent { count: 2, .. })
        ));

        let resolution = agent
            .raise_intent("x.ticket.view", None, Some(IntentTarget::from("app-b")))
            .await
            .unwrap();
        assert_eq!(resolution.source, AppIdentifier::new("app-b"));
        assert_eq!(resolution.get_result().await.unwrap(), None);
        assert_eq!(resolution.get_result().await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_intent_handler_error_reaches_result() {
        let agent = DesktopAgent::default();
        agent
            .add_intent_listener(
                "ViewChart",
                intent_handler(|_ctx: Context| async move {
                    Err(Error::HandlerFailed("chart unavailable".to_string()))
                }),
            )
            .await
            .unwrap();

        let resolution = agent.raise_intent("ViewChart", None, None).await.unwrap();
        assert!(matches!(resolution.get_result().await, Err(Error::HandlerFailed(_))));
    }

    #[tokio::test]
    async fn test_find_intent() {
        let agent = DesktopAgent::default();
        assert!(agent.find_intent("ViewChart", None).await.is_err());

        agent
            .add_intent_listener_with_filter("ViewChart", Some("fdc3.instrument"), echo_handler())
            .await
            .unwrap();

        let found = agent.find_intent("ViewChart", None).await.unwrap();
        assert_eq!(found.intent.name, "ViewChart");
        assert_eq!(found.apps.len(), 1);
        assert_eq!(found.apps[0].title, "ViewChart");

        let err = agent
            .find_intent("ViewChart", Some(&Context::new("fdc3.contact")))
            .await
            .unwrap_err();
        assert!(err.is_resolution_failure());
    }

    #[tokio::test]
    async fn test_find_intents_by_context() {
        let agent = DesktopAgent::default();
        agent
            .add_intent_listener_with_filter("ViewNews", Some("fdc3.instrument"), echo_handler())
            .await
            .unwrap();
        agent.add_intent_listener("ViewChart", echo_handler()).await.unwrap();
        agent
            .add_intent_listener_with_filter("StartCall", Some("fdc3.contact"), echo_handler())
            .await
            .unwrap();

        let intents = agent
            .find_intents_by_context(&Context::new("fdc3.instrument"))
            .await
            .unwrap();
        let names: Vec<&str> = intents.iter().map(|i| i.intent.name.as_str()).collect();
        assert_eq!(names, vec!["ViewChart", "ViewNews"]);

        let intents = agent
            .find_intents_by_context(&Context::new("fdc3.order"))
            .await
            .unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].intent.name, "ViewChart");
    }

    #[tokio::test]
    async fn test_channel_proxies_are_cached() {
        let agent = DesktopAgent::default();
        let first = agent.get_or_create_channel("blue").await.unwrap();
        let again = agent.get_or_create_channel("red").await.unwrap();
        let current = agent.get_current_channel().await.unwrap();

        assert_eq!(first.id(), "blue");
        assert!(Arc::ptr_eq(&first, &again));
        assert!(Arc::ptr_eq(&first, &current));
        assert!(agent.leave_current_channel().await.is_ok());
    }

    #[tokio::test]
    async fn test_channel_named_after_other_workspace() {
        let agent = DesktopAgent::default();
        agent.set_active_workspace("alpha");
        agent.get_or_create_channel("beta").await.unwrap();

        agent.set_active_workspace("beta");
        let err = agent.get_or_create_channel("beta").await.unwrap_err();
        assert!(matches!(err, Error::ChannelConflict { .. }));

        let current = agent.get_current_channel().await.unwrap();
        assert_eq!(current.id(), "beta-1");
        let again = agent.get_or_create_channel("beta").await.unwrap();
        assert!(Arc::ptr_eq(&current, &again));
    }

    #[tokio::test]
    async fn test_close_workspace_cascades() {
        let agent = DesktopAgent::default();
        let (seen, handler) = recorder();
        let listener = agent.add_context_listener(handler).await.unwrap();
        agent.add_intent_listener("ViewChart", echo_handler()).await.unwrap();
        let before = agent.get_current_channel().await.unwrap();

        assert_eq!(agent.close_workspace("default").await, 2);
        assert_eq!(agent.active_listener_count(), 0);
        assert_eq!(agent.channel_mapper().workspace_count(), 0);

        let report = agent.broadcast(client_context()).await.unwrap();
        assert!(report.dispatched.is_empty());
        assert!(seen.lock().unwrap().is_empty());
        listener.unsubscribe().await;

        let after = agent.get_current_channel().await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_metadata() {
        let agent = DesktopAgent::default();
        let info = agent.get_info().await;
        assert_eq!(info.fdc3_version, "2.2.0");
        assert_eq!(info.provider, "workspace-interop");
        assert!(!info.optional_features.desktop_agent_bridging);

        let app = AppIdentifier::new("chart").with_instance("i1");
        let metadata = agent.get_app_metadata(&app).await;
        assert_eq!(metadata.name, "chart");
        assert_eq!(metadata.title, "chart");
        assert_eq!(metadata.instance_id.as_deref(), Some("i1"));
    }
}
