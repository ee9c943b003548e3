//! Subscription handles returned to callers.

use crate::core::ListenerId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

/// Kind of subscription a listener id belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Context,
    Intent,
}

/// Something that can drop a subscription it issued.
#[async_trait]
pub trait ListenerOwner: Send + Sync {
    /// Remove the subscription. Unknown ids are ignored.
    async fn release_listener(&self, kind: ListenerKind, listener_id: &str);
}

/// Handle to an active context or intent subscription.
///
/// `unsubscribe` is idempotent: only the first call reaches the owner.
pub struct Listener {
    id: ListenerId,
    kind: ListenerKind,
    active: AtomicBool,
    owner: Weak<dyn ListenerOwner>,
}

impl Listener {
    pub(crate) fn new(id: ListenerId, kind: ListenerKind, owner: Weak<dyn ListenerOwner>) -> Self {
        Self {
            id,
            kind,
            active: AtomicBool::new(true),
            owner,
        }
    }

    /// Listener ID
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Whether `unsubscribe` has not been called yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop receiving deliveries.
    pub async fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.release_listener(self.kind, &self.id).await;
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingOwner {
        released: Mutex<Vec<(ListenerKind, String)>>,
    }

    #[async_trait]
    impl ListenerOwner for RecordingOwner {
        async fn release_listener(&self, kind: ListenerKind, listener_id: &str) {
            self.released.lock().unwrap().push((kind, listener_id.to_string()));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let owner = Arc::new(RecordingOwner::default());
        let dyn_owner: Arc<dyn ListenerOwner> = owner.clone();
        let listener = Listener::new("ctx:w1:1".to_string(), ListenerKind::Context, Arc::downgrade(&dyn_owner));

        assert!(listener.is_active());
        listener.unsubscribe().await;
        listener.unsubscribe().await;

        assert!(!listener.is_active());
        assert_eq!(
            *owner.released.lock().unwrap(),
            vec![(ListenerKind::Context, "ctx:w1:1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_after_owner_dropped() {
        let owner: Arc<dyn ListenerOwner> = Arc::new(RecordingOwner::default());
        let listener = Listener::new("intent:w1:1".to_string(), ListenerKind::Intent, Arc::downgrade(&owner));
        drop(owner);

        listener.unsubscribe().await;
        assert!(!listener.is_active());
    }
}
