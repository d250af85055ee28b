//! Error types for the settings crate.

use graphdelta_types::{ReferenceHandling, TypeError};

/// Errors raised when a member or type cannot be used under the active settings.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// A member's type cannot be compared or tracked under the policy.
    #[error(
        "member {member} of type {value_type} is not supported with {policy} reference handling \
         (at {path}); ignore the member or declare {value_type} immutable"
    )]
    UnsupportedMember {
        member: String,
        value_type: String,
        policy: ReferenceHandling,
        path: String,
    },

    /// A collection's item type cannot be compared or tracked under the policy.
    #[error(
        "items of type {item_type} in {collection} are not supported with {policy} reference \
         handling (at {path}); declare {item_type} immutable"
    )]
    UnsupportedItems {
        collection: String,
        item_type: String,
        policy: ReferenceHandling,
        path: String,
    },

    /// The type does not raise change notifications.
    #[error("type {type_name} cannot be tracked because it does not raise change notifications (at {path})")]
    NotTrackable { type_name: String, path: String },

    /// Object model error while reading a member.
    #[error("object model error: {0}")]
    Type(#[from] TypeError),
}

/// Convenience alias for settings results.
pub type SettingsResult<T> = Result<T, SettingsError>;
