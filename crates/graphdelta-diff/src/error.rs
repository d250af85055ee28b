//! Error types for the diff crate.

use graphdelta_settings::SettingsError;
use graphdelta_types::TypeError;

/// Errors that can occur while building or refreshing a diff.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// Traversal re-entered an instance pair that is already on the current
    /// path under [`ReferenceHandling::Structural`](graphdelta_types::ReferenceHandling).
    #[error("reference loop: {member} re-enters an instance already on the path at {path}")]
    Loop { member: String, path: String },

    /// The two roots are instances of different types.
    #[error("cannot diff an instance of {x_type} against an instance of {y_type}")]
    TypeMismatch { x_type: String, y_type: String },

    /// The settings collaborator rejected a member or collection.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Object model access failed.
    #[error("object model error: {0}")]
    Type(#[from] TypeError),

    /// An engine invariant was violated.
    #[error("internal diff error: {0}")]
    Internal(String),
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
