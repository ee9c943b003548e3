//! Desktop Agent
//!
//! Public interop API composed from the context, channel and intent layers:
//! - Broadcast and context listeners
//! - Intent raise, discovery and listeners
//! - Workspace channel proxies
//! - Workspace lifecycle (app membership, teardown)

pub mod channel;
pub mod config;
pub mod desktop_agent;
pub mod listener;
pub mod resolution;
pub mod workspace;

pub use channel::Channel;
pub use config::{AgentConfig, BridgeConfig};
pub use desktop_agent::DesktopAgent;
pub use listener::{Listener, ListenerKind, ListenerOwner};
pub use resolution::{ImplementationMetadata, IntentResolution, OptionalFeatures};
pub use workspace::{InMemoryWorkspaceResolver, WorkspaceResolver};
