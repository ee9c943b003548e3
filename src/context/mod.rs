//! Context payloads
//!
//! - Typed context model and envelopes
//! - Validation and filter matching
//! - Handler seam for delivered contexts

pub mod handler;
pub mod model;
pub mod validator;

pub use handler::{context_handler, ContextHandler, FnContextHandler};
pub use model::{Context, ContextEnvelope, ContextFilter};
pub use validator::{matches_filter, ContextValidator};
