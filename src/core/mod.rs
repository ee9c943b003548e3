//! Core utilities and common types for the interop agent.

pub mod error;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, ResolutionError, Result};
pub use types::*;
