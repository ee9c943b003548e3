//! Workspace, app instance and channel records.

use crate::context::Context;
use crate::core::{now, AppInstanceId, ChannelId, Timestamp, WorkspaceId};
use serde::{Deserialize, Serialize};

/// Channel type assigned to workspace-bound channels.
pub const WORKSPACE_CHANNEL_TYPE: &str = "workspace";

/// A running application instance inside a workspace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInstanceModel {
    /// Instance identifier
    pub instance_id: AppInstanceId,
    /// Application identifier
    pub app_id: String,
    /// Owning workspace
    pub workspace_id: WorkspaceId,
    /// Channel the instance joined
    pub joined_channel_id: ChannelId,
}

impl AppInstanceModel {
    /// Create a new app instance record.
    pub fn new(instance_id: &str, app_id: &str, workspace_id: &str, channel_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            app_id: app_id.to_string(),
            workspace_id: workspace_id.to_string(),
            joined_channel_id: channel_id.to_string(),
        }
    }
}

/// An isolation boundary with one primary channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceModel {
    /// Workspace identifier
    pub id: WorkspaceId,
    /// Display name
    pub name: String,
    /// Primary channel
    pub channel_id: ChannelId,
    /// Apps currently open in the workspace
    pub open_apps: Vec<AppInstanceModel>,
}

impl WorkspaceModel {
    /// Create a workspace with no open apps.
    pub fn new(id: &str, name: &str, channel_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            channel_id: channel_id.to_string(),
            open_apps: Vec::new(),
        }
    }

    /// Skeleton created lazily on first use of a workspace.
    ///
    /// The primary channel defaults to the workspace id.
    pub fn skeleton(id: &str, channel_id: Option<&str>) -> Self {
        Self::new(id, &format!("Workspace {}", id), channel_id.unwrap_or(id))
    }

    /// Add an open app.
    pub fn with_app(mut self, app: AppInstanceModel) -> Self {
        self.open_apps.push(app);
        self
    }
}

/// Membership record for an app instance on a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMember {
    /// Instance identifier
    pub instance_id: AppInstanceId,
    /// Application identifier, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// When the instance joined
    pub joined_at: Timestamp,
}

impl ChannelMember {
    /// Create a membership record stamped now.
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            app_id: None,
            joined_at: now(),
        }
    }

    /// Set the application id.
    pub fn with_app_id(mut self, app_id: &str) -> Self {
        self.app_id = Some(app_id.to_string());
        self
    }
}

impl From<&AppInstanceModel> for ChannelMember {
    fn from(app: &AppInstanceModel) -> Self {
        ChannelMember::new(&app.instance_id).with_app_id(&app.app_id)
    }
}

/// Snapshot of a workspace channel held by the mapper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelModel {
    /// Channel identifier
    pub id: ChannelId,
    /// Owning workspace
    pub workspace_id: WorkspaceId,
    /// Display name
    pub name: String,
    /// Channel type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
    /// Display color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Member app instances
    pub members: Vec<AppInstanceId>,
    /// Most recent context broadcast on the channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_context: Option<Context>,
}

impl ChannelModel {
    /// Derive the channel model for a workspace.
    pub fn for_workspace(workspace: &WorkspaceModel) -> Self {
        Self {
            id: workspace.channel_id.clone(),
            workspace_id: workspace.id.clone(),
            name: format!("{} Channel", workspace.name),
            channel_type: Some(WORKSPACE_CHANNEL_TYPE.to_string()),
            color: None,
            members: workspace
                .open_apps
                .iter()
                .map(|app| app.instance_id.clone())
                .collect(),
            last_context: None,
        }
    }

    /// Plain descriptor for callers and the wire.
    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            id: self.id.clone(),
            channel_type: self.channel_type.clone(),
            display_metadata: Some(DisplayMetadata {
                name: Some(self.name.clone()),
                color: self.color.clone(),
            }),
        }
    }
}

/// Display hints for a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Plain channel descriptor exchanged across process boundaries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    /// Channel identifier
    pub id: ChannelId,
    /// Channel type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
    /// Display hints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_metadata: Option<DisplayMetadata>,
}
