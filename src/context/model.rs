//! Context payloads and the envelope that carries them through the bus.

use crate::core::{now, AppInstanceId, ChannelId, Error, Result, Timestamp, WorkspaceId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Optional filter applied to listeners.
///
/// `None` or `Some("*")` receive every context; anything else must equal the
/// context type exactly.
pub type ContextFilter = Option<String>;

/// A typed, structured payload shared between applications.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Dispatch key (e.g. "fdc3.instrument")
    #[serde(rename = "type")]
    pub context_type: String,
    /// Identifier map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Map<String, Value>>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any further fields of the payload
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Context {
    /// Create a new context of the given type.
    pub fn new(context_type: &str) -> Self {
        Self {
            context_type: context_type.to_string(),
            id: None,
            name: None,
            extra: Map::new(),
        }
    }

    /// Add an id field.
    pub fn with_id(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.id
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Add an arbitrary payload field.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Parse an untyped JSON payload.
    ///
    /// Fails with `InvalidContext` when the value is not an object, has no
    /// string `type`, or carries a non-object `id`.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::InvalidContext("Context must be an object.".to_string()));
        }
        if !matches!(value.get("type"), Some(Value::String(_))) {
            return Err(Error::InvalidContext(
                "Context.type must be a non-empty string.".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| Error::InvalidContext(e.to_string()))
    }

    /// Convert back into an untyped JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A context on its way through a workspace channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEnvelope {
    /// Workspace the context was broadcast in
    pub workspace_id: WorkspaceId,
    /// Channel the context was broadcast on
    pub channel_id: ChannelId,
    /// The payload
    pub context: Context,
    /// When the context entered the bus
    pub timestamp: Timestamp,
    /// Broadcasting app instance, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<AppInstanceId>,
}

impl ContextEnvelope {
    /// Create a new envelope stamped with the current time.
    pub fn new(workspace_id: &str, channel_id: &str, context: Context) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            channel_id: channel_id.to_string(),
            context,
            timestamp: now(),
            origin: None,
        }
    }

    /// Set the originating app instance.
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = Some(origin.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_builder() {
        let ctx = Context::new("fdc3.instrument")
            .with_id("ticker", "AAPL")
            .with_name("Apple")
            .with_field("market", json!({"MIC": "XNAS"}));

        assert_eq!(ctx.context_type, "fdc3.instrument");
        assert_eq!(ctx.id.as_ref().unwrap()["ticker"], json!("AAPL"));
        assert_eq!(ctx.extra["market"]["MIC"], json!("XNAS"));
    }

    #[test]
    fn test_context_wire_shape() {
        let ctx = Context::new("x.client").with_id("clientId", "c1");
        let value = ctx.to_value();

        assert_eq!(value, json!({"type": "x.client", "id": {"clientId": "c1"}}));
        assert_eq!(Context::from_value(value).unwrap(), ctx);
    }

    #[test]
    fn test_from_value_rejects_malformed() {
        assert!(matches!(
            Context::from_value(json!("x.client")),
            Err(Error::InvalidContext(_))
        ));
        assert!(matches!(
            Context::from_value(json!({"name": "no type"})),
            Err(Error::InvalidContext(_))
        ));
        assert!(matches!(
            Context::from_value(json!({"type": 7})),
            Err(Error::InvalidContext(_))
        ));
        assert!(matches!(
            Context::from_value(json!({"type": "x", "id": "flat"})),
            Err(Error::InvalidContext(_))
        ));
    }

    #[test]
    fn test_envelope_origin() {
        let env = ContextEnvelope::new("w1", "c1", Context::new("x")).with_origin("app-1");
        assert_eq!(env.origin.as_deref(), Some("app-1"));
    }
}
