//! Error types for the tracking crate.

use graphdelta_settings::SettingsError;
use graphdelta_types::TypeError;

/// Errors raised while setting up tracking.
///
/// Only activation fails fast; problems while handling a notification are
/// logged and never returned.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// Tracking would close a reference cycle under
    /// [`ReferenceHandling::Structural`](graphdelta_types::ReferenceHandling).
    #[error("reference loop: {member} re-enters an instance already tracked on the path at {path}")]
    Loop { member: String, path: String },

    /// The settings collaborator rejected a member, collection or type.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Object model access failed.
    #[error("object model error: {0}")]
    Type(#[from] TypeError),

    /// An engine invariant was violated.
    #[error("internal tracking error: {0}")]
    Internal(String),
}

/// Convenience alias for tracking results.
pub type TrackResult<T> = Result<T, TrackError>;
