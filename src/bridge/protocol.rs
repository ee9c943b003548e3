//! Remote transport contract between the trusted main surface and the
//! backend agent.

use crate::agent::ImplementationMetadata;
use crate::channel::ChannelInfo;
use crate::context::{Context, ContextFilter};
use crate::core::{Error, IntentName, ListenerId, Result};
use crate::intent::{AppIdentifier, AppIntent, AppMetadata, IntentResult, IntentTarget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Service path the contract is mounted on.
pub const FDC3_SERVICE_PATH: &str = "/services/fdc3";

/// Calls the backend pushes to a connected client.
#[async_trait]
pub trait Fdc3Client: Send + Sync {
    /// Deliver a context to the client-side handler of `listener_id`.
    async fn on_context(&self, listener_id: &str, context: Context);

    /// Run the client-side intent handler of `listener_id`.
    async fn on_intent(&self, listener_id: &str, context: Context) -> Result<Option<IntentResult>>;
}

/// Agent operations exposed to remote clients.
#[async_trait]
pub trait Fdc3Service: Send + Sync {
    /// Attach (or detach) the client receiving listener callbacks.
    fn set_client(&self, client: Option<Arc<dyn Fdc3Client>>);

    async fn broadcast(&self, context: Context) -> Result<()>;

    /// Register a context listener; callbacks arrive through the client.
    async fn register_context_listener(&self, filter: ContextFilter) -> Result<ListenerId>;

    /// Register an intent listener; callbacks arrive through the client.
    async fn register_intent_listener(&self, intent: &str, filter: ContextFilter) -> Result<ListenerId>;

    async fn unregister_listener(&self, listener_id: &str) -> Result<()>;

    async fn raise_intent(
        &self,
        intent: &str,
        context: Option<Context>,
        target: Option<IntentTarget>,
    ) -> Result<IntentResolutionPlain>;

    async fn find_intent(&self, intent: &str, context: Option<Context>) -> Result<AppIntent>;

    async fn find_intents_by_context(&self, context: Context) -> Result<Vec<AppIntent>>;

    async fn get_or_create_channel(&self, channel_id: &str) -> Result<ChannelInfo>;

    async fn get_current_channel(&self) -> Result<Option<ChannelInfo>>;

    async fn leave_current_channel(&self) -> Result<()>;

    async fn get_info(&self) -> Result<ImplementationMetadata>;

    async fn get_app_metadata(&self, app: AppIdentifier) -> Result<AppMetadata>;
}

/// Intent resolution flattened for the wire, with the handler's result
/// already awaited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResolutionPlain {
    pub source: AppIdentifier,
    pub intent: IntentName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<IntentResult>,
}

/// Decoded remote call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RpcRequest {
    Broadcast {
        context: Context,
    },
    RegisterContextListener {
        #[serde(default)]
        filter: ContextFilter,
    },
    RegisterIntentListener {
        intent: IntentName,
        #[serde(default)]
        filter: ContextFilter,
    },
    UnregisterListener {
        listener_id: ListenerId,
    },
    RaiseIntent {
        intent: IntentName,
        #[serde(default)]
        context: Option<Context>,
        #[serde(default)]
        target: Option<IntentTarget>,
    },
    FindIntent {
        intent: IntentName,
        #[serde(default)]
        context: Option<Context>,
    },
    FindIntentsByContext {
        context: Context,
    },
    GetOrCreateChannel {
        channel_id: String,
    },
    GetCurrentChannel,
    LeaveCurrentChannel,
    GetInfo,
    GetAppMetadata {
        app: AppIdentifier,
    },
}

impl RpcRequest {
    /// Parse a JSON request.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Method name on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            RpcRequest::Broadcast { .. } => "broadcast",
            RpcRequest::RegisterContextListener { .. } => "registerContextListener",
            RpcRequest::RegisterIntentListener { .. } => "registerIntentListener",
            RpcRequest::UnregisterListener { .. } => "unregisterListener",
            RpcRequest::RaiseIntent { .. } => "raiseIntent",
            RpcRequest::FindIntent { .. } => "findIntent",
            RpcRequest::FindIntentsByContext { .. } => "findIntentsByContext",
            RpcRequest::GetOrCreateChannel { .. } => "getOrCreateChannel",
            RpcRequest::GetCurrentChannel => "getCurrentChannel",
            RpcRequest::LeaveCurrentChannel => "leaveCurrentChannel",
            RpcRequest::GetInfo => "getInfo",
            RpcRequest::GetAppMetadata { .. } => "getAppMetadata",
        }
    }
}

/// Reply to an [`RpcRequest`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    /// Successful reply carrying a serializable value.
    pub fn ok<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(result) => Self {
                result: Some(result),
                error: None,
            },
            Err(e) => Self::err(&Error::from(e)),
        }
    }

    /// Failed reply.
    pub fn err(err: &Error) -> Self {
        Self {
            result: None,
            error: Some(err.to_string()),
        }
    }

    pub fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(err) => Self::err(&err),
        }
    }

    /// Decode the carried value, or surface the carried error.
    pub fn into_result<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        if let Some(error) = self.error {
            return Err(Error::Transport(error));
        }
        Ok(serde_json::from_value(self.result.unwrap_or(Value::Null))?)
    }
}
