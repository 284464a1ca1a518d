//! External collaborator seam: the hosting platform's invocation context.
//!
//! The framework never depends on a concrete trigger shape. Adapters
//! implement [`PlatformContext`] over whatever the platform hands them and
//! the lifecycle driver reports back through [`PlatformContext::complete`].

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::FrameworkError;

/// Result of one invocation, delivered through the platform completion
/// callback.
#[derive(Debug)]
pub enum Outcome {
    /// Completed normally; the callback receives no value.
    Success,
    /// Failed, but the error carried the drop flag; the callback receives no
    /// payload. Adapters treat this like [`Outcome::Success`].
    Dropped,
    /// Failed; the callback receives the error payload.
    Failure(FrameworkError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped)
    }

    pub fn error(&self) -> Option<&FrameworkError> {
        match self {
            Self::Failure(error) => Some(error),
            _ => None,
        }
    }
}

/// Contract the hosting platform must satisfy for one invocation.
#[async_trait]
pub trait PlatformContext: Send + Sync {
    /// Platform-assigned invocation id.
    fn invocation_id(&self) -> &str;

    /// Distributed trace header, when the platform propagates one.
    fn trace_id(&self) -> Option<String> {
        None
    }

    /// Action requested by the trigger adapter; `None` selects the default
    /// `process` action.
    fn action(&self) -> Option<String> {
        None
    }

    /// Whether this invocation runs the monitor branch instead of `process`.
    /// Adapters derive this from their trigger (an HTTP TRACE method, a query
    /// flag, ...).
    fn monitor(&self) -> bool {
        false
    }

    /// Raw trigger binding payload, if any.
    fn binding(&self) -> Option<Value> {
        None
    }

    /// Completion callback: no value on success, the error value on failure.
    async fn complete(&self, outcome: &Outcome);
}
