//! Error types.
//!
//! Two classes exist: programmer errors the caller cannot recover from
//! ([`ReconcilerError::NotAComponent`], [`ReconcilerError::InvariantViolation`])
//! and failures of external collaborators, passed through unchanged
//! ([`ReconcilerError::Work`]). Recoverable diagnostics are not errors; see
//! [`crate::diagnostics`].

use crate::types::ComponentHandle;

/// Errors surfaced by reconciler operations.
#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    /// The handle has no internal association with a work node.
    #[error("{}", not_a_component_message(.renderable))]
    NotAComponent {
        handle: ComponentHandle,
        /// The handle looks like a composite component (it can render).
        renderable: bool,
    },

    /// An internal invariant does not hold.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// An external collaborator (work loop, host) failed.
    #[error(transparent)]
    Work(Box<dyn std::error::Error + 'static>),
}

impl ReconcilerError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub(crate) fn not_a_component(handle: ComponentHandle) -> Self {
        Self::NotAComponent {
            handle,
            renderable: handle.is_renderable(),
        }
    }
}

fn not_a_component_message(renderable: &bool) -> &'static str {
    if *renderable {
        "Unable to find node on an unmounted component."
    } else {
        "Argument appears to not be a component."
    }
}

/// Result alias for reconciler operations.
pub type Result<T> = std::result::Result<T, ReconcilerError>;
