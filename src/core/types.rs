//! Common types used across interop modules.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Identifier of a workspace.
pub type WorkspaceId = String;

/// Identifier of a channel.
pub type ChannelId = String;

/// Identifier of a running application instance.
pub type AppInstanceId = String;

/// Identifier issued for a registered listener.
pub type ListenerId = String;

/// Name of an intent.
pub type IntentName = String;

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Lock helpers that recover from poisoning.
///
/// A panicking handler never runs while a guard is held, so the protected
/// state is still consistent when a guard was poisoned.
pub(crate) trait LockExt<T> {
    fn read_state(&self) -> RwLockReadGuard<'_, T>;
    fn write_state(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> LockExt<T> for RwLock<T> {
    fn read_state(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn lock_state<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
