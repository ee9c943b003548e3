//! Agent and bridge configuration.

use crate::core::{Result, WorkspaceId};
use crate::monitoring::LoggerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Desktop agent configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Workspace active until something else is selected
    pub default_workspace: WorkspaceId,
    /// Provider name reported by `get_info`
    pub provider: String,
    /// Provider version reported by `get_info`
    pub provider_version: String,
    /// Interop standard version implemented
    pub fdc3_version: String,
    /// App id of the agent itself
    pub app_id: String,
    /// Display name of the agent itself
    pub app_name: String,
    /// Log sink settings
    pub logger: LoggerConfig,
}

impl AgentConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the default workspace.
    pub fn with_default_workspace(mut self, workspace_id: &str) -> Self {
        self.default_workspace = workspace_id.to_string();
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_workspace: "default".to_string(),
            provider: "workspace-interop".to_string(),
            provider_version: env!("CARGO_PKG_VERSION").to_string(),
            fdc3_version: "2.2.0".to_string(),
            app_id: "workspace-interop.desktop-agent".to_string(),
            app_name: "Workspace Desktop Agent".to_string(),
            logger: LoggerConfig::default(),
        }
    }
}

/// Settings for the embedded bridge and the trusted main-surface proxy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Origins allowed to talk to the bridge
    pub allowed_origins: Vec<String>,
    /// Timeout for correlated requests (`None` waits forever)
    pub request_timeout_ms: Option<u64>,
}

impl BridgeConfig {
    /// Allow a single origin.
    pub fn for_origin(origin: &str) -> Self {
        Self::default().with_origin(origin)
    }

    /// Add an allowed origin.
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.allowed_origins.push(origin.to_string());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    /// Whether an origin is on the allow-list.
    pub fn is_trusted(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            request_timeout_ms: Some(30_000),
        }
    }
}
