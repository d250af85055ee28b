//! Settings for graphdelta traversals.
//!
//! Decides which members participate in a comparison or a tracking session,
//! which types are immutable, how values of a given type compare, and which
//! members are unsupported under the active [`ReferenceHandling`] policy.
//! Unsupported-member conditions are raised here, before an engine ever
//! touches the member.
//!
//! [`ReferenceHandling`]: graphdelta_types::ReferenceHandling

pub mod cache;
pub mod config;
pub mod error;
pub mod settings;

pub use cache::SettingsCache;
pub use config::{SettingsConfig, VisibilityFilter};
pub use error::{SettingsError, SettingsResult};
pub use settings::{Comparer, Settings, SettingsBuilder};
