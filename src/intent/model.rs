//! Intent metadata, targets and results.

use crate::channel::ChannelInfo;
use crate::context::Context;
use crate::core::IntentName;
use serde::{Deserialize, Serialize};

/// Identity of an application, optionally narrowed to one instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentifier {
    /// Application ID
    pub app_id: String,
    /// Instance ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl AppIdentifier {
    /// Identify an application.
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            instance_id: None,
        }
    }

    /// Narrow to one instance.
    pub fn with_instance(mut self, instance_id: &str) -> Self {
        self.instance_id = Some(instance_id.to_string());
        self
    }
}

impl std::fmt::Display for AppIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.instance_id {
            Some(instance) => write!(f, "{}/{}", self.app_id, instance),
            None => write!(f, "{}", self.app_id),
        }
    }
}

/// Metadata describing an application able to handle an intent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub name: String,
    pub title: String,
}

impl AppMetadata {
    /// Metadata derived from an identifier alone.
    pub fn from_identifier(app: &AppIdentifier, title: &str) -> Self {
        Self {
            app_id: app.app_id.clone(),
            instance_id: app.instance_id.clone(),
            name: app.app_id.clone(),
            title: title.to_string(),
        }
    }
}

/// Intent name wrapper used in discovery results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMetadata {
    pub name: IntentName,
}

/// An intent and the apps that can handle it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIntent {
    pub intent: IntentMetadata,
    pub apps: Vec<AppMetadata>,
}

/// Target of a raised intent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntentTarget {
    /// Any instance of an application
    AppId(String),
    /// An application, optionally narrowed to an instance
    App(AppIdentifier),
}

impl IntentTarget {
    /// Whether a handler identity satisfies this target.
    ///
    /// Every field the target carries must match.
    pub fn matches(&self, identity: &AppIdentifier) -> bool {
        match self {
            IntentTarget::AppId(app_id) => identity.app_id == *app_id,
            IntentTarget::App(target) => {
                if !target.app_id.is_empty() && identity.app_id != target.app_id {
                    return false;
                }
                match &target.instance_id {
                    Some(instance) => identity.instance_id.as_deref() == Some(instance.as_str()),
                    None => true,
                }
            }
        }
    }
}

impl std::fmt::Display for IntentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentTarget::AppId(app_id) => write!(f, "{}", app_id),
            IntentTarget::App(app) => write!(f, "{}", app),
        }
    }
}

impl From<&str> for IntentTarget {
    fn from(app_id: &str) -> Self {
        IntentTarget::AppId(app_id.to_string())
    }
}

impl From<AppIdentifier> for IntentTarget {
    fn from(app: AppIdentifier) -> Self {
        IntentTarget::App(app)
    }
}

/// Value an intent handler may hand back to the raiser.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum IntentResult {
    Context(Context),
    Channel(ChannelInfo),
}
