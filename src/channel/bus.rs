//! Workspace context bus.
//!
//! In-memory pub/sub core. Listeners are scoped to a channel of a workspace,
//! or to the whole workspace. Delivery never crosses a workspace boundary.
//! Every handler runs on its own task, so a failing or hung handler never
//! affects the broadcaster or other listeners.

use crate::channel::mapper::WorkspaceChannelMapper;
use crate::channel::model::ChannelMember;
use crate::context::{matches_filter, ContextEnvelope, ContextFilter, ContextHandler};
use crate::core::{
    lock_state, AppInstanceId, ChannelId, Error, ListenerId, Result, WorkspaceId,
};
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Stored registration backing an active context subscription.
#[derive(Clone)]
pub struct ContextListenerDescriptor {
    /// Listener ID
    pub id: ListenerId,
    /// Owning workspace
    pub workspace_id: WorkspaceId,
    /// Channel scope (`None` = workspace-wide)
    pub channel_id: Option<ChannelId>,
    /// Context type filter
    pub filter: ContextFilter,
    /// Handler invoked on delivery
    pub handler: Arc<dyn ContextHandler>,
}

impl std::fmt::Debug for ContextListenerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextListenerDescriptor")
            .field("id", &self.id)
            .field("workspace_id", &self.workspace_id)
            .field("channel_id", &self.channel_id)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// Handlers started by a single broadcast.
///
/// The broadcast returns once every handler is dispatched. Awaiting
/// [`DeliveryReport::settled`] collects their outcomes.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Listeners a handler task was spawned for, in delivery order
    pub dispatched: Vec<ListenerId>,
    /// Dropped because the origin was not a channel member
    pub rejected: bool,
    tasks: Vec<JoinHandle<bool>>,
}

/// Collected outcome of every handler of one broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    /// Listeners whose handler completed
    pub delivered: usize,
    /// Listeners whose handler failed or panicked
    pub failed: Vec<ListenerId>,
}

impl DeliveryReport {
    fn rejected() -> Self {
        Self {
            rejected: true,
            ..Self::default()
        }
    }

    /// Wait for every dispatched handler. Never resolves while one of them
    /// hangs.
    pub async fn settled(self) -> DeliverySummary {
        let mut summary = DeliverySummary::default();
        for (id, task) in self.dispatched.into_iter().zip(self.tasks) {
            match task.await {
                Ok(true) => summary.delivered += 1,
                _ => summary.failed.push(id),
            }
        }
        summary
    }
}

#[derive(Default)]
struct ChannelState {
    members: HashMap<AppInstanceId, ChannelMember>,
    listeners: BTreeMap<u64, ContextListenerDescriptor>,
    last_context: Option<ContextEnvelope>,
}

#[derive(Default)]
struct WorkspaceState {
    channels: HashMap<ChannelId, ChannelState>,
    workspace_listeners: BTreeMap<u64, ContextListenerDescriptor>,
}

struct ListenerLocation {
    workspace_id: WorkspaceId,
    channel_id: Option<ChannelId>,
    seq: u64,
}

#[derive(Default)]
struct BusState {
    workspaces: HashMap<WorkspaceId, WorkspaceState>,
    listener_index: HashMap<ListenerId, ListenerLocation>,
    channel_ownership: HashMap<ChannelId, WorkspaceId>,
    listener_counter: u64,
}

impl BusState {
    fn ensure_channel(&mut self, workspace_id: &str, channel_id: &str) -> &mut ChannelState {
        self.channel_ownership
            .entry(channel_id.to_string())
            .or_insert_with(|| workspace_id.to_string());
        self.workspaces
            .entry(workspace_id.to_string())
            .or_default()
            .channels
            .entry(channel_id.to_string())
            .or_default()
    }

    fn channel(&self, workspace_id: &str, channel_id: &str) -> Option<&ChannelState> {
        self.workspaces.get(workspace_id)?.channels.get(channel_id)
    }

    /// Drop a channel entry with no listeners, members or last context, and
    /// the workspace entry once nothing is left in it.
    fn prune(&mut self, workspace_id: &str, channel_id: Option<&str>) {
        let Some(workspace) = self.workspaces.get_mut(workspace_id) else {
            return;
        };
        if let Some(channel_id) = channel_id {
            let empty = workspace.channels.get(channel_id).is_some_and(|channel| {
                channel.listeners.is_empty()
                    && channel.members.is_empty()
                    && channel.last_context.is_none()
            });
            if empty {
                workspace.channels.remove(channel_id);
                self.channel_ownership.remove(channel_id);
            }
        }
        if workspace.channels.is_empty() && workspace.workspace_listeners.is_empty() {
            self.workspaces.remove(workspace_id);
        }
    }
}

/// Pub/sub core with workspace isolation and membership enforcement.
pub struct WorkspaceContextBus {
    state: Mutex<BusState>,
    mapper: Arc<WorkspaceChannelMapper>,
}

impl WorkspaceContextBus {
    /// Create a bus that asserts ownership against the given mapper.
    pub fn new(mapper: Arc<WorkspaceChannelMapper>) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            mapper,
        }
    }

    /// Register a listener on a channel, or workspace-wide when `channel_id`
    /// is `None`.
    pub fn register_listener(
        &self,
        workspace_id: &str,
        channel_id: Option<&str>,
        handler: Arc<dyn ContextHandler>,
        filter: ContextFilter,
    ) -> Result<ContextListenerDescriptor> {
        let mut state = lock_state(&self.state);

        if let Some(channel_id) = channel_id {
            self.assert_channel_ownership(&state, workspace_id, channel_id)?;
        }

        state.listener_counter += 1;
        let seq = state.listener_counter;
        let descriptor = ContextListenerDescriptor {
            id: format!("ctx:{}:{}", workspace_id, seq),
            workspace_id: workspace_id.to_string(),
            channel_id: channel_id.map(str::to_string),
            filter,
            handler,
        };

        match channel_id {
            Some(channel_id) => {
                state
                    .ensure_channel(workspace_id, channel_id)
                    .listeners
                    .insert(seq, descriptor.clone());
            }
            None => {
                state
                    .workspaces
                    .entry(workspace_id.to_string())
                    .or_default()
                    .workspace_listeners
                    .insert(seq, descriptor.clone());
            }
        }
        state.listener_index.insert(
            descriptor.id.clone(),
            ListenerLocation {
                workspace_id: descriptor.workspace_id.clone(),
                channel_id: descriptor.channel_id.clone(),
                seq,
            },
        );

        Ok(descriptor)
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_listener(&self, listener_id: &str) -> bool {
        let mut state = lock_state(&self.state);
        let Some(location) = state.listener_index.remove(listener_id) else {
            return false;
        };

        let Some(workspace) = state.workspaces.get_mut(&location.workspace_id) else {
            return false;
        };
        let removed = match &location.channel_id {
            Some(channel_id) => workspace
                .channels
                .get_mut(channel_id)
                .and_then(|channel| channel.listeners.remove(&location.seq))
                .is_some(),
            None => workspace
                .workspace_listeners
                .remove(&location.seq)
                .is_some(),
        };
        state.prune(&location.workspace_id, location.channel_id.as_deref());
        removed
    }

    /// Dispatch an envelope to the channel's listeners, then to the
    /// workspace-wide listeners, each on its own task.
    ///
    /// Returns without waiting for any handler. A broadcast carrying an
    /// origin that is not a channel member is dropped with a warning.
    pub async fn broadcast(&self, envelope: ContextEnvelope) -> Result<DeliveryReport> {
        let targets = {
            let mut state = lock_state(&self.state);
            self.assert_channel_ownership(&state, &envelope.workspace_id, &envelope.channel_id)?;

            let channel = state.ensure_channel(&envelope.workspace_id, &envelope.channel_id);
            if let Some(origin) = &envelope.origin {
                if !channel.members.contains_key(origin) {
                    tracing::warn!(
                        origin = %origin,
                        workspace_id = %envelope.workspace_id,
                        channel_id = %envelope.channel_id,
                        "Rejecting broadcast from non-member"
                    );
                    return Ok(DeliveryReport::rejected());
                }
            }
            channel.last_context = Some(envelope.clone());

            let context_type = envelope.context.context_type.as_str();
            let mut targets: Vec<(ListenerId, Arc<dyn ContextHandler>)> = channel
                .listeners
                .values()
                .filter(|d| matches_filter(d.filter.as_deref(), context_type))
                .map(|d| (d.id.clone(), d.handler.clone()))
                .collect();
            if let Some(workspace) = state.workspaces.get(&envelope.workspace_id) {
                targets.extend(
                    workspace
                        .workspace_listeners
                        .values()
                        .filter(|d| matches_filter(d.filter.as_deref(), context_type))
                        .map(|d| (d.id.clone(), d.handler.clone())),
                );
            }
            targets
        };

        let mut report = DeliveryReport::default();
        for (id, handler) in targets {
            let context = envelope.context.clone();
            let listener_id = id.clone();
            let task = tokio::spawn(async move {
                match AssertUnwindSafe(handler.handle(context)).catch_unwind().await {
                    Ok(Ok(())) => true,
                    Ok(Err(err)) => {
                        tracing::warn!(listener_id = %listener_id, error = %err, "Context listener execution failed");
                        false
                    }
                    Err(_) => {
                        tracing::warn!(listener_id = %listener_id, "Context listener panicked");
                        false
                    }
                }
            });
            report.dispatched.push(id);
            report.tasks.push(task);
        }

        Ok(report)
    }

    /// Most recent envelope broadcast on a workspace channel.
    pub fn get_last_context(&self, workspace_id: &str, channel_id: &str) -> Option<ContextEnvelope> {
        lock_state(&self.state)
            .channel(workspace_id, channel_id)?
            .last_context
            .clone()
    }

    /// Track an app instance as a channel member.
    pub fn add_member(&self, workspace_id: &str, channel_id: &str, member: ChannelMember) -> Result<()> {
        let mut state = lock_state(&self.state);
        self.assert_channel_ownership(&state, workspace_id, channel_id)?;
        state
            .ensure_channel(workspace_id, channel_id)
            .members
            .insert(member.instance_id.clone(), member);
        Ok(())
    }

    /// Stop tracking an app instance as a channel member.
    pub fn remove_member(&self, workspace_id: &str, channel_id: &str, member_id: &str) -> bool {
        let mut state = lock_state(&self.state);
        let removed = state
            .workspaces
            .get_mut(workspace_id)
            .and_then(|ws| ws.channels.get_mut(channel_id))
            .and_then(|channel| channel.members.remove(member_id))
            .is_some();
        if removed {
            state.prune(workspace_id, Some(channel_id));
        }
        removed
    }

    /// Current members of a workspace channel, oldest first.
    pub fn get_members(&self, workspace_id: &str, channel_id: &str) -> Vec<ChannelMember> {
        let state = lock_state(&self.state);
        let mut members: Vec<ChannelMember> = state
            .channel(workspace_id, channel_id)
            .map(|channel| channel.members.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        members
    }

    /// Remove every listener and channel of a workspace.
    ///
    /// Returns the number of listeners dropped.
    pub fn clear_workspace(&self, workspace_id: &str) -> usize {
        let mut state = lock_state(&self.state);
        let Some(workspace) = state.workspaces.remove(workspace_id) else {
            return 0;
        };

        let mut removed = 0;
        for descriptor in workspace.workspace_listeners.values() {
            state.listener_index.remove(&descriptor.id);
            removed += 1;
        }
        for (channel_id, channel) in &workspace.channels {
            state.channel_ownership.remove(channel_id);
            for descriptor in channel.listeners.values() {
                state.listener_index.remove(&descriptor.id);
                removed += 1;
            }
        }
        removed
    }

    /// Whether a listener id is currently registered.
    pub fn has_listener(&self, listener_id: &str) -> bool {
        lock_state(&self.state).listener_index.contains_key(listener_id)
    }

    /// Number of registered listeners across all workspaces.
    pub fn listener_count(&self) -> usize {
        lock_state(&self.state).listener_index.len()
    }

    /// Number of workspaces holding any bus state.
    pub fn workspace_count(&self) -> usize {
        lock_state(&self.state).workspaces.len()
    }

    fn assert_channel_ownership(
        &self,
        state: &BusState,
        workspace_id: &str,
        channel_id: &str,
    ) -> Result<()> {
        let owner = state
            .channel_ownership
            .get(channel_id)
            .cloned()
            .or_else(|| {
                self.mapper
                    .get_workspace_for_channel(channel_id)
                    .map(|ws| ws.id.clone())
            });

        match owner {
            Some(owner) if owner != workspace_id => Err(Error::ChannelOwnershipViolation {
                channel: channel_id.to_string(),
                owner,
                requester: workspace_id.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl Default for WorkspaceContextBus {
    fn default() -> Self {
        Self::new(Arc::new(WorkspaceChannelMapper::new()))
    }
}
