//! Active workspace resolution.

use crate::core::{LockExt, WorkspaceId};
use std::sync::RwLock;

/// Source of the workspace every agent call is scoped to.
pub trait WorkspaceResolver: Send + Sync {
    /// Workspace currently active.
    fn active_workspace_id(&self) -> WorkspaceId;

    /// Switch the active workspace.
    fn set_active_workspace(&self, workspace_id: &str);
}

/// Resolver keeping the active workspace in memory.
pub struct InMemoryWorkspaceResolver {
    active: RwLock<WorkspaceId>,
}

impl InMemoryWorkspaceResolver {
    /// Start with the given workspace active.
    pub fn new(workspace_id: &str) -> Self {
        Self {
            active: RwLock::new(workspace_id.to_string()),
        }
    }
}

impl Default for InMemoryWorkspaceResolver {
    fn default() -> Self {
        Self::new("default")
    }
}

impl WorkspaceResolver for InMemoryWorkspaceResolver {
    fn active_workspace_id(&self) -> WorkspaceId {
        self.active.read_state().clone()
    }

    fn set_active_workspace(&self, workspace_id: &str) {
        *self.active.write_state() = workspace_id.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_workspace() {
        let resolver = InMemoryWorkspaceResolver::default();
        assert_eq!(resolver.active_workspace_id(), "default");

        resolver.set_active_workspace("w2");
        assert_eq!(resolver.active_workspace_id(), "w2");
    }
}
