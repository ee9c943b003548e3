//! Intent listener registry.
//!
//! Indexes intent listeners per workspace and intent name, and applies the
//! resolution policy used when an intent is raised.

use crate::context::{matches_filter, Context, ContextFilter};
use crate::core::{IntentName, ListenerId, LockExt, ResolutionError, Result, WorkspaceId};
use crate::intent::handler::IntentHandler;
use crate::intent::model::{AppIdentifier, AppMetadata, IntentTarget};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Stored registration backing an intent listener.
#[derive(Clone)]
pub struct IntentListenerDescriptor {
    /// Listener ID
    pub id: ListenerId,
    /// Intent handled
    pub intent: IntentName,
    /// Owning workspace
    pub workspace_id: WorkspaceId,
    /// Handler invoked when the intent is routed here
    pub handler: Arc<dyn IntentHandler>,
    /// Context type filter
    pub context_filter: ContextFilter,
    /// Declared application identity
    pub source: Option<AppIdentifier>,
}

impl IntentListenerDescriptor {
    /// Identity used for targeting and discovery.
    ///
    /// Listeners without a declared source get `workspace:<id>` with the
    /// listener id as instance.
    pub fn app_identifier(&self) -> AppIdentifier {
        match &self.source {
            Some(source) => source.clone(),
            None => AppIdentifier::new(&format!("workspace:{}", self.workspace_id))
                .with_instance(&self.id),
        }
    }

    /// Discovery metadata for this listener.
    pub fn app_metadata(&self) -> AppMetadata {
        AppMetadata::from_identifier(&self.app_identifier(), &self.intent)
    }

    /// Whether this listener accepts the context.
    pub fn accepts(&self, context: &Context) -> bool {
        matches_filter(self.context_filter.as_deref(), &context.context_type)
    }
}

impl std::fmt::Debug for IntentListenerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentListenerDescriptor")
            .field("id", &self.id)
            .field("intent", &self.intent)
            .field("workspace_id", &self.workspace_id)
            .field("context_filter", &self.context_filter)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

struct ListenerLocation {
    workspace_id: WorkspaceId,
    intent: IntentName,
    seq: u64,
}

type IntentTable = HashMap<IntentName, BTreeMap<u64, IntentListenerDescriptor>>;

#[derive(Default)]
struct RegistryState {
    workspaces: HashMap<WorkspaceId, IntentTable>,
    listener_index: HashMap<ListenerId, ListenerLocation>,
    listener_counter: u64,
}

/// Per-workspace intent listener index.
#[derive(Default)]
pub struct IntentRegistry {
    state: RwLock<RegistryState>,
}

impl IntentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an intent listener.
    pub fn register_listener(
        &self,
        workspace_id: &str,
        intent: &str,
        handler: Arc<dyn IntentHandler>,
        context_filter: ContextFilter,
        source: Option<AppIdentifier>,
    ) -> IntentListenerDescriptor {
        let mut state = self.state.write_state();
        state.listener_counter += 1;
        let seq = state.listener_counter;

        let descriptor = IntentListenerDescriptor {
            id: format!("intent:{}:{}", workspace_id, seq),
            intent: intent.to_string(),
            workspace_id: workspace_id.to_string(),
            handler,
            context_filter,
            source,
        };

        state
            .workspaces
            .entry(workspace_id.to_string())
            .or_default()
            .entry(intent.to_string())
            .or_default()
            .insert(seq, descriptor.clone());
        state.listener_index.insert(
            descriptor.id.clone(),
            ListenerLocation {
                workspace_id: workspace_id.to_string(),
                intent: intent.to_string(),
                seq,
            },
        );

        descriptor
    }

    /// Remove a listener, pruning empty intent and workspace entries.
    pub fn remove_listener(&self, listener_id: &str) -> bool {
        let mut state = self.state.write_state();
        let Some(location) = state.listener_index.remove(listener_id) else {
            return false;
        };

        let Some(intents) = state.workspaces.get_mut(&location.workspace_id) else {
            return false;
        };
        let removed = match intents.get_mut(&location.intent) {
            Some(listeners) => {
                let removed = listeners.remove(&location.seq).is_some();
                if listeners.is_empty() {
                    intents.remove(&location.intent);
                }
                removed
            }
            None => false,
        };
        if intents.is_empty() {
            state.workspaces.remove(&location.workspace_id);
        }
        removed
    }

    /// Listeners for an intent in a workspace, in registration order.
    pub fn get_listeners(&self, workspace_id: &str, intent: &str) -> Vec<IntentListenerDescriptor> {
        self.state
            .read_state()
            .workspaces
            .get(workspace_id)
            .and_then(|intents| intents.get(intent))
            .map(|listeners| listeners.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up a single listener by id.
    pub fn get_listener(&self, listener_id: &str) -> Option<IntentListenerDescriptor> {
        let state = self.state.read_state();
        let location = state.listener_index.get(listener_id)?;
        state
            .workspaces
            .get(&location.workspace_id)?
            .get(&location.intent)?
            .get(&location.seq)
            .cloned()
    }

    /// Every intent with listeners in a workspace, sorted by name.
    pub fn get_intents_for_workspace(
        &self,
        workspace_id: &str,
    ) -> Vec<(IntentName, Vec<IntentListenerDescriptor>)> {
        let state = self.state.read_state();
        let mut intents: Vec<(IntentName, Vec<IntentListenerDescriptor>)> = state
            .workspaces
            .get(workspace_id)
            .map(|intents| {
                intents
                    .iter()
                    .map(|(name, listeners)| (name.clone(), listeners.values().cloned().collect()))
                    .collect()
            })
            .unwrap_or_default();
        intents.sort_by(|a, b| a.0.cmp(&b.0));
        intents
    }

    /// Pick the listener a raised intent is routed to.
    ///
    /// Candidates are narrowed by context filter when a context is given.
    /// An explicit target takes the first matching candidate in registration
    /// order; without a target exactly one candidate must remain.
    pub fn resolve(
        &self,
        workspace_id: &str,
        intent: &str,
        context: Option<&Context>,
        target: Option<&IntentTarget>,
    ) -> Result<IntentListenerDescriptor> {
        let mut eligible = self.get_listeners(workspace_id, intent);
        if let Some(context) = context {
            eligible.retain(|descriptor| descriptor.accepts(context));
        }

        if let Some(target) = target {
            return eligible
                .into_iter()
                .find(|descriptor| target.matches(&descriptor.app_identifier()))
                .ok_or_else(|| {
                    ResolutionError::TargetNotFound {
                        intent: intent.to_string(),
                        target: target.to_string(),
                    }
                    .into()
                });
        }

        if eligible.is_empty() {
            return Err(ResolutionError::NoIntentHandler {
                intent: intent.to_string(),
            }
            .into());
        }

        if eligible.len() > 1 {
            return Err(ResolutionError::AmbiguousIntent {
                intent: intent.to_string(),
                count: eligible.len(),
            }
            .into());
        }

        Ok(eligible.remove(0))
    }

    /// Remove every listener of a workspace. Returns how many were dropped.
    pub fn clear_workspace(&self, workspace_id: &str) -> usize {
        let mut state = self.state.write_state();
        let Some(intents) = state.workspaces.remove(workspace_id) else {
            return 0;
        };

        let mut removed = 0;
        for descriptor in intents.values().flat_map(|listeners| listeners.values()) {
            state.listener_index.remove(&descriptor.id);
            removed += 1;
        }
        removed
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.state.read_state().listener_index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;
    use crate::intent::handler::intent_handler;

    fn noop_handler() -> Arc<dyn IntentHandler> {
        Arc::new(intent_handler(|_ctx: Context| async move { Ok(None) }))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = IntentRegistry::new();
        let descriptor =
            registry.register_listener("w1", "ViewChart", noop_handler(), None, None);

        assert!(descriptor.id.starts_with("intent:w1:"));
        assert_eq!(registry.get_listeners("w1", "ViewChart").len(), 1);
        assert!(registry.get_listeners("w2", "ViewChart").is_empty());
        assert_eq!(registry.get_listener(&descriptor.id).unwrap().intent, "ViewChart");
    }

    #[test]
    fn test_remove_prunes_empty_entries() {
        let registry = IntentRegistry::new();
        let a = registry.register_listener("w1", "ViewChart", noop_handler(), None, None);
        let b = registry.register_listener("w1", "ViewNews", noop_handler(), None, None);

        assert!(registry.remove_listener(&a.id));
        assert!(!registry.remove_listener(&a.id));
        assert_eq!(registry.get_intents_for_workspace("w1").len(), 1);

        assert!(registry.remove_listener(&b.id));
        assert!(registry.get_intents_for_workspace("w1").is_empty());
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_synthesized_identity() {
        let registry = IntentRegistry::new();
        let anonymous = registry.register_listener("w1", "ViewChart", noop_handler(), None, None);
        let named = registry.register_listener(
            "w1",
            "ViewChart",
            noop_handler(),
            None,
            Some(AppIdentifier::new("chart")),
        );

        let identity = anonymous.app_identifier();
        assert_eq!(identity.app_id, "workspace:w1");
        assert_eq!(identity.instance_id.as_deref(), Some(anonymous.id.as_str()));
        assert_eq!(named.app_identifier(), AppIdentifier::new("chart"));
        assert_eq!(named.app_metadata().title, "ViewChart");
    }

    #[test]
    fn test_resolve_zero_one_many() {
        let registry = IntentRegistry::new();
        let err = registry.resolve("w1", "x.ticket.view", None, None).unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::NoIntentHandler { .. })
        ));

        let first = registry.register_listener("w1", "x.ticket.view", noop_handler(), None, None);
        let chosen = registry.resolve("w1", "x.ticket.view", None, None).unwrap();
        assert_eq!(chosen.id, first.id);

        registry.register_listener("w1", "x.ticket.view", noop_handler(), None, None);
        let err = registry.resolve("w1", "x.ticket.view", None, None).unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::AmbiguousIntent { count: 2, .. })
        ));
    }

    #[test]
    fn test_resolve_with_target() {
        let registry = IntentRegistry::new();
        registry.register_listener(
            "w1",
            "x.ticket.view",
            noop_handler(),
            None,
            Some(AppIdentifier::new("app-a")),
        );
        let b = registry.register_listener(
            "w1",
            "x.ticket.view",
            noop_handler(),
            None,
            Some(AppIdentifier::new("app-b")),
        );

        let chosen = registry
            .resolve("w1", "x.ticket.view", None, Some(&IntentTarget::from("app-b")))
            .unwrap();
        assert_eq!(chosen.id, b.id);

        let err = registry
            .resolve("w1", "x.ticket.view", None, Some(&IntentTarget::from("app-c")))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::TargetNotFound { .. })
        ));

        let second_b = registry.register_listener(
            "w1",
            "x.ticket.view",
            noop_handler(),
            None,
            Some(AppIdentifier::new("app-b")),
        );
        let chosen = registry
            .resolve("w1", "x.ticket.view", None, Some(&IntentTarget::from("app-b")))
            .unwrap();
        assert_eq!(chosen.id, b.id);
        assert_ne!(chosen.id, second_b.id);

        let err = registry
            .resolve("w1", "x.unknown", None, Some(&IntentTarget::from("app-b")))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::TargetNotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_filters_by_context() {
        let registry = IntentRegistry::new();
        registry.register_listener(
            "w1",
            "ViewChart",
            noop_handler(),
            Some("fdc3.contact".to_string()),
            None,
        );
        let instrument = registry.register_listener(
            "w1",
            "ViewChart",
            noop_handler(),
            Some("fdc3.instrument".to_string()),
            None,
        );

        let chosen = registry
            .resolve("w1", "ViewChart", Some(&Context::new("fdc3.instrument")), None)
            .unwrap();
        assert_eq!(chosen.id, instrument.id);

        let err = registry
            .resolve("w1", "ViewChart", Some(&Context::new("fdc3.order")), None)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::NoIntentHandler { .. })
        ));
    }

    #[test]
    fn test_clear_workspace() {
        let registry = IntentRegistry::new();
        let a = registry.register_listener("w1", "A", noop_handler(), None, None);
        registry.register_listener("w1", "B", noop_handler(), None, None);
        registry.register_listener("w2", "A", noop_handler(), None, None);

        assert_eq!(registry.clear_workspace("w1"), 2);
        assert!(registry.get_listener(&a.id).is_none());
        assert!(!registry.remove_listener(&a.id));
        assert_eq!(registry.listener_count(), 1);
    }
}
