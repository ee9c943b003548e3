//! Caller-facing channel proxies.

use crate::agent::desktop_agent::{AgentCore, DesktopAgent};
use crate::agent::listener::Listener;
use crate::channel::{ChannelInfo, ChannelModel, DisplayMetadata, WORKSPACE_CHANNEL_TYPE};
use crate::context::{Context, ContextHandler};
use crate::core::{ChannelId, Error, Result, WorkspaceId};
use std::sync::{Arc, Weak};

/// Thin proxy over a workspace channel.
///
/// Broadcasts and listeners are forwarded to the agent, scoped to the
/// workspace owning the channel.
pub struct Channel {
    id: ChannelId,
    workspace_id: WorkspaceId,
    channel_type: String,
    display_metadata: Option<DisplayMetadata>,
    agent: Weak<AgentCore>,
}

impl Channel {
    pub(crate) fn new(model: &ChannelModel, agent: Weak<AgentCore>) -> Self {
        let info = model.info();
        Self {
            id: model.id.clone(),
            workspace_id: model.workspace_id.clone(),
            channel_type: info
                .channel_type
                .unwrap_or_else(|| WORKSPACE_CHANNEL_TYPE.to_string()),
            display_metadata: info.display_metadata,
            agent,
        }
    }

    /// Channel ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Workspace owning the channel
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn display_metadata(&self) -> Option<&DisplayMetadata> {
        self.display_metadata.as_ref()
    }

    /// Plain descriptor for the wire.
    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            id: self.id.clone(),
            channel_type: Some(self.channel_type.clone()),
            display_metadata: self.display_metadata.clone(),
        }
    }

    /// Broadcast a context on this channel.
    pub async fn broadcast(&self, context: Context) -> Result<()> {
        self.agent()?
            .broadcast_in(&self.workspace_id, context, None)
            .await
            .map(|_| ())
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
        self.agent()?
            .add_context_listener_in(&self.workspace_id, filter, Arc::new(handler))
    }

    /// Most recent context on this channel, optionally of one type only.
    pub async fn get_current_context(&self, context_type: Option<&str>) -> Option<Context> {
        self.agent()
            .ok()?
            .channel_context_snapshot(&self.workspace_id, &self.id, context_type)
    }

    fn agent(&self) -> Result<DesktopAgent> {
        self.agent
            .upgrade()
            .map(DesktopAgent::from_core)
            .ok_or_else(|| Error::Internal("Desktop agent has been dropped".to_string()))
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("workspace_id", &self.workspace_id)
            .field("channel_type", &self.channel_type)
            .finish_non_exhaustive()
    }
}
