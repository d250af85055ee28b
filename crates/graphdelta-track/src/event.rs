//! Structured tracker events.

use std::fmt;
use std::sync::Arc;

use graphdelta_types::{CollectionChange, MemberInfo, Notification, ObjectRef, Value};

/// Where a generic change started.
#[derive(Clone, Debug)]
pub struct ChangeOrigin {
    /// The object whose notification triggered the change.
    pub source: ObjectRef,
    /// The raw notification.
    pub notification: Notification,
}

/// Event raised by a [`TrackerNode`](crate::TrackerNode).
///
/// `Changed` is raised on the node that received the notification and then
/// on every node that links to it, each once. The specific events are raised
/// on the receiving node only, after its `Changed`.
#[derive(Clone, Debug)]
pub enum TrackerEvent {
    Changed(ChangeOrigin),
    MemberChanged { member: Arc<MemberInfo>, value: Value },
    ItemAdded { index: usize, item: Value },
    ItemRemoved { index: usize, item: Value },
    ItemReplaced { index: usize, old: Value, new: Value },
    ItemMoved { from: usize, to: usize, item: Value },
    Reset,
}

impl TrackerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Changed(_) => EventKind::Changed,
            Self::MemberChanged { .. } => EventKind::MemberChanged,
            Self::ItemAdded { .. } => EventKind::ItemAdded,
            Self::ItemRemoved { .. } => EventKind::ItemRemoved,
            Self::ItemReplaced { .. } => EventKind::ItemReplaced,
            Self::ItemMoved { .. } => EventKind::ItemMoved,
            Self::Reset => EventKind::Reset,
        }
    }

    /// The event a collection change translates to.
    pub fn from_collection_change(change: &CollectionChange) -> Self {
        match change.clone() {
            CollectionChange::Added { index, item } => Self::ItemAdded { index, item },
            CollectionChange::Removed { index, item } => Self::ItemRemoved { index, item },
            CollectionChange::Replaced { index, old, new } => Self::ItemReplaced { index, old, new },
            CollectionChange::Moved { from, to, item } => Self::ItemMoved { from, to, item },
            CollectionChange::Reset => Self::Reset,
        }
    }
}

/// Classification of tracker events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Changed,
    MemberChanged,
    ItemAdded,
    ItemRemoved,
    ItemReplaced,
    ItemMoved,
    Reset,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Changed => "Changed",
            Self::MemberChanged => "MemberChanged",
            Self::ItemAdded => "ItemAdded",
            Self::ItemRemoved => "ItemRemoved",
            Self::ItemReplaced => "ItemReplaced",
            Self::ItemMoved => "ItemMoved",
            Self::Reset => "Reset",
        };
        write!(f, "{s}")
    }
}
