//! Workspace to channel mapping.
//!
//! Binds each workspace to exactly one primary channel. Stored records are
//! never mutated in place: updates swap in a fresh `Arc`, so snapshots
//! already handed out stay valid.

use crate::channel::model::{ChannelMember, ChannelModel, WorkspaceModel};
use crate::context::Context;
use crate::core::{ChannelId, Error, LockExt, Result, WorkspaceId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct MapperState {
    workspace_channels: HashMap<WorkspaceId, Arc<ChannelModel>>,
    channel_workspaces: HashMap<ChannelId, Arc<WorkspaceModel>>,
}

impl MapperState {
    fn bind(&mut self, workspace: WorkspaceModel) -> Result<Arc<ChannelModel>> {
        if let Some(existing) = self.channel_workspaces.get(&workspace.channel_id) {
            if existing.id != workspace.id {
                return Err(Error::ChannelConflict {
                    channel: workspace.channel_id.clone(),
                    owner: existing.id.clone(),
                });
            }
        }

        // Re-registration onto a new channel releases the old binding.
        if let Some(previous) = self.workspace_channels.get(&workspace.id).cloned() {
            if previous.id != workspace.channel_id {
                self.channel_workspaces.remove(&previous.id);
            }
        }

        let channel = Arc::new(ChannelModel::for_workspace(&workspace));
        self.channel_workspaces
            .insert(workspace.channel_id.clone(), Arc::new(workspace));
        self.workspace_channels
            .insert(channel.workspace_id.clone(), channel.clone());

        Ok(channel)
    }

    fn free_channel_id(&self, workspace_id: &str) -> ChannelId {
        if !self.channel_workspaces.contains_key(workspace_id) {
            return workspace_id.to_string();
        }
        (1u64..)
            .map(|n| format!("{}-{}", workspace_id, n))
            .find(|candidate| !self.channel_workspaces.contains_key(candidate))
            .unwrap_or_else(|| workspace_id.to_string())
    }
}

/// 1:1 workspace/channel binding table.
#[derive(Default)]
pub struct WorkspaceChannelMapper {
    state: RwLock<MapperState>,
}

impl WorkspaceChannelMapper {
    /// Create an empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a workspace to its channel and return the derived channel model.
    ///
    /// Fails with `ChannelConflict` when the channel is already bound to a
    /// different workspace.
    pub fn register_workspace(&self, workspace: WorkspaceModel) -> Result<Arc<ChannelModel>> {
        let mut state = self.state.write_state();
        state.bind(workspace)
    }

    /// Channel of a workspace, registering a skeleton workspace on first use.
    ///
    /// `requested_channel_id` only applies when the workspace is not bound
    /// yet, and fails with `ChannelConflict` if another workspace owns it.
    /// Without one the channel is named after the workspace, or
    /// `<workspace>-<n>` when that id is already taken.
    pub fn ensure_workspace(
        &self,
        workspace_id: &str,
        requested_channel_id: Option<&str>,
    ) -> Result<Arc<ChannelModel>> {
        let mut state = self.state.write_state();
        if let Some(channel) = state.workspace_channels.get(workspace_id) {
            return Ok(channel.clone());
        }
        let channel_id = match requested_channel_id {
            Some(requested) => requested.to_string(),
            None => state.free_channel_id(workspace_id),
        };
        let channel = state.bind(WorkspaceModel::skeleton(workspace_id, Some(&channel_id)))?;
        tracing::debug!(workspace_id = %workspace_id, channel_id = %channel.id, "Registered workspace channel");
        Ok(channel)
    }

    /// Channel bound to a workspace.
    pub fn get_channel_for_workspace(&self, workspace_id: &str) -> Option<Arc<ChannelModel>> {
        self.state.read_state().workspace_channels.get(workspace_id).cloned()
    }

    /// Workspace bound to a channel.
    pub fn get_workspace_for_channel(&self, channel_id: &str) -> Option<Arc<WorkspaceModel>> {
        self.state.read_state().channel_workspaces.get(channel_id).cloned()
    }

    /// Replace the member list of a workspace channel.
    pub fn update_channel_members(&self, workspace_id: &str, members: &[ChannelMember]) {
        self.replace_channel(workspace_id, |channel| {
            channel.members = members.iter().map(|m| m.instance_id.clone()).collect();
        });
    }

    /// Replace the cached last context of a workspace channel.
    pub fn update_last_context(&self, workspace_id: &str, context: Option<Context>) {
        self.replace_channel(workspace_id, |channel| {
            channel.last_context = context;
        });
    }

    /// Drop both sides of a workspace binding.
    pub fn remove_workspace(&self, workspace_id: &str) -> bool {
        let mut state = self.state.write_state();
        match state.workspace_channels.remove(workspace_id) {
            Some(channel) => {
                state.channel_workspaces.remove(&channel.id);
                true
            }
            None => false,
        }
    }

    /// Number of bound workspaces.
    pub fn workspace_count(&self) -> usize {
        self.state.read_state().workspace_channels.len()
    }

    fn replace_channel(&self, workspace_id: &str, update: impl FnOnce(&mut ChannelModel)) {
        let mut state = self.state.write_state();
        if let Some(current) = state.workspace_channels.get(workspace_id) {
            let mut next = ChannelModel::clone(current);
            update(&mut next);
            state
                .workspace_channels
                .insert(workspace_id.to_string(), Arc::new(next));
        }
    }
}
