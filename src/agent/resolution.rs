//! Intent resolutions and implementation metadata.

use crate::core::{Error, IntentName, Result};
use crate::intent::{AppIdentifier, AppMetadata, IntentResult};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;

type SharedResult = Shared<BoxFuture<'static, Result<Option<IntentResult>>>>;

/// Outcome of routing a raised intent to a handler.
///
/// The handler runs at most once. `get_result` replays its captured outcome
/// on every call.
#[derive(Clone)]
pub struct IntentResolution {
    /// Identity of the handler the intent was routed to
    pub source: AppIdentifier,
    /// Intent raised
    pub intent: IntentName,
    result: SharedResult,
}

impl IntentResolution {
    /// Run `invocation` in the background and capture its outcome.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<F>(source: AppIdentifier, intent: &str, invocation: F) -> Self
    where
        F: Future<Output = Result<Option<IntentResult>>> + Send + 'static,
    {
        let task = tokio::spawn(invocation);
        let result = async move {
            task.await
                .unwrap_or_else(|e| Err(Error::HandlerFailed(format!("Intent handler aborted: {}", e))))
        }
        .boxed()
        .shared();

        Self {
            source,
            intent: intent.to_string(),
            result,
        }
    }

    /// Resolution whose outcome is already known.
    pub(crate) fn completed(
        source: AppIdentifier,
        intent: &str,
        outcome: Result<Option<IntentResult>>,
    ) -> Self {
        Self {
            source,
            intent: intent.to_string(),
            result: futures::future::ready(outcome).boxed().shared(),
        }
    }

    /// Value returned by the handler, or the error it failed with.
    pub async fn get_result(&self) -> Result<Option<IntentResult>> {
        self.result.clone().await
    }
}

impl std::fmt::Debug for IntentResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentResolution")
            .field("source", &self.source)
            .field("intent", &self.intent)
            .finish_non_exhaustive()
    }
}

/// Optional interop features the agent supports.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OptionalFeatures {
    pub originating_app_metadata: bool,
    #[serde(rename = "UserChannelMembershipAPIs")]
    pub user_channel_membership_apis: bool,
    pub desktop_agent_bridging: bool,
}

/// Description of the agent implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationMetadata {
    pub fdc3_version: String,
    pub provider: String,
    pub provider_version: String,
    pub optional_features: OptionalFeatures,
    pub app_metadata: AppMetadata,
}
