//! Intents
//!
//! - App identity, discovery metadata, targets and results
//! - Per-workspace intent listener registry
//! - Resolution and tie-break policy

pub mod handler;
pub mod model;
pub mod registry;

pub use handler::{intent_handler, FnIntentHandler, IntentHandler, NOTHING_CONTEXT_TYPE};
pub use model::{AppIdentifier, AppIntent, AppMetadata, IntentMetadata, IntentResult, IntentTarget};
pub use registry::{IntentListenerDescriptor, IntentRegistry};
