//! Context handler seam.

use crate::context::model::Context;
use crate::core::Result;
use async_trait::async_trait;
use std::future::Future;

/// Receives contexts delivered to a listener.
#[async_trait]
pub trait ContextHandler: Send + Sync {
    /// Handle one delivered context.
    async fn handle(&self, context: Context) -> Result<()>;
}

#[async_trait]
impl<H: ContextHandler + ?Sized> ContextHandler for std::sync::Arc<H> {
    async fn handle(&self, context: Context) -> Result<()> {
        (**self).handle(context).await
    }
}

/// Adapter turning an async closure into a [`ContextHandler`].
pub struct FnContextHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ContextHandler for FnContextHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, context: Context) -> Result<()> {
        (self.f)(context).await
    }
}

/// Wrap an async closure as a context handler.
pub fn context_handler<F, Fut>(f: F) -> FnContextHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnContextHandler { f }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;

    #[tokio::test]
    async fn test_closure_handler() {
        let handler = context_handler(|ctx: Context| async move {
            if ctx.context_type == "bad" {
                return Err(Error::HandlerFailed("bad context".to_string()));
            }
            Ok(())
        });

        assert!(handler.handle(Context::new("good")).await.is_ok());
        assert!(handler.handle(Context::new("bad")).await.is_err());
    }
}
