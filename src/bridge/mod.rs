//! Transport bridges
//!
//! - Backend RPC adapter over [`DesktopAgent`](crate::agent::DesktopAgent)
//! - Frontend proxy agent for remote surfaces
//! - Embedded-surface message bridge with origin allow-list

pub mod backend;
pub mod embedded;
pub mod frontend;
pub mod protocol;

pub use backend::{BackendConnection, BackendHub};
pub use embedded::{
    EmbeddedAgentClient, EmbeddedApi, EmbeddedBridge, EmbeddedRequest, EmbeddedResponse,
    MessageDisposition, MessagePort, REQUEST_NAMESPACE, RESPONSE_NAMESPACE,
};
pub use frontend::{FrontendAgent, RemoteChannel};
pub use protocol::{
    Fdc3Client, Fdc3Service, IntentResolutionPlain, RpcRequest, RpcResponse, FDC3_SERVICE_PATH,
};
