//! Intent handler seam.

use crate::context::Context;
use crate::core::Result;
use crate::intent::model::IntentResult;
use async_trait::async_trait;
use std::future::Future;

/// Context type passed to handlers when an intent is raised without one.
pub const NOTHING_CONTEXT_TYPE: &str = "fdc3.nothing";

/// Performs a raised intent.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    /// Handle the intent for the given context.
    async fn handle(&self, context: Context) -> Result<Option<IntentResult>>;
}

#[async_trait]
impl<H: IntentHandler + ?Sized> IntentHandler for std::sync::Arc<H> {
    async fn handle(&self, context: Context) -> Result<Option<IntentResult>> {
        (**self).handle(context).await
    }
}

/// Adapter turning an async closure into an [`IntentHandler`].
pub struct FnIntentHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> IntentHandler for FnIntentHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<IntentResult>>> + Send + 'static,
{
    async fn handle(&self, context: Context) -> Result<Option<IntentResult>> {
        (self.f)(context).await
    }
}

/// Wrap an async closure as an intent handler.
pub fn intent_handler<F, Fut>(f: F) -> FnIntentHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<IntentResult>>> + Send + 'static,
{
    FnIntentHandler { f }
}
