//! # Workspace Interop
//!
//! Desktop interop agent with workspace isolation:
//! - **Context**: validated context payloads and filters
//! - **Channel**: one primary channel per workspace, fan-out bus
//! - **Intent**: workspace-scoped handler registry and resolution
//! - **Agent**: the desktop agent facade tying it together
//! - **Bridge**: backend RPC, frontend proxy and embedded-surface transports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use workspace_interop::agent::DesktopAgent;
//! use workspace_interop::context::{context_handler, Context};
//!
//! #[tokio::main]
//! async fn main() {
//!     let agent = DesktopAgent::default();
//!     agent
//!         .add_context_listener(context_handler(|ctx: Context| async move {
//!             println!("received {}", ctx.context_type);
//!             Ok(())
//!         }))
//!         .await
//!         .unwrap();
//!
//!     let report = agent.broadcast(Context::new("fdc3.instrument")).await.unwrap();
//!     println!("dispatched to {} listeners", report.dispatched.len());
//! }
//! ```

pub mod agent;
pub mod bridge;
pub mod channel;
pub mod context;
pub mod core;
pub mod intent;
pub mod monitoring;

pub use agent::{AgentConfig, BridgeConfig, DesktopAgent};
pub use context::Context;
pub use core::error::{Error, ResolutionError, Result};
