//! Live change tracking for graphdelta.
//!
//! Subscribes to every notifying object reachable from a root and re-raises
//! their notifications as structured events, bubbling a generic `Changed`
//! up to every node that links to the object that changed. Links are
//! re-established when a reference member or a collection changes, so the
//! tracked set follows the graph as it is mutated.
//!
//! # Key Types
//!
//! - [`TrackerNode`] / [`NodeHandle`] -- Per-object tracker, shared through a [`TrackerCache`]
//! - [`TrackerEvent`] -- What listeners receive
//! - [`ChangeOrigin`] -- The object and notification behind a `Changed`

pub mod error;
pub mod event;
pub mod node;

pub use error::{TrackError, TrackResult};
pub use event::{ChangeOrigin, EventKind, TrackerEvent};
pub use node::{Listener, ListenerId, NodeHandle, TrackerCache, TrackerNode};
