//! Test helpers.

/// Let tasks spawned by a broadcast run on the current test runtime.
pub(crate) async fn settle_tasks() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
