//! Context shape checks and filter matching.

use crate::context::model::Context;
use crate::core::{Error, Result};

/// Wildcard filter value.
pub const WILDCARD_FILTER: &str = "*";

/// Stateless validator for context payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContextValidator;

impl ContextValidator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self
    }

    /// Reject contexts with a blank type.
    pub fn validate(&self, context: &Context) -> Result<()> {
        if context.context_type.trim().is_empty() {
            return Err(Error::InvalidContext(
                "Context.type must be a non-empty string.".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a context passes a listener filter.
    pub fn matches_filter(&self, context: &Context, filter: Option<&str>) -> bool {
        matches_filter(filter, &context.context_type)
    }
}

/// Filter matching on a bare context type.
pub fn matches_filter(filter: Option<&str>, context_type: &str) -> bool {
    match filter {
        None | Some(WILDCARD_FILTER) => true,
        Some(expected) => expected == context_type,
    }
}
