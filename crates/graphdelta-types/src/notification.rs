use crate::value::Value;

/// A mutation notification raised synchronously by an [`Object`](crate::Object).
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// A member changed. `None` means any member may have changed.
    MemberChanged(Option<String>),
    /// A collection's contents changed.
    CollectionChanged(CollectionChange),
}

/// Payload of a collection change.
#[derive(Clone, Debug, PartialEq)]
pub enum CollectionChange {
    Added { index: usize, item: Value },
    Removed { index: usize, item: Value },
    Replaced { index: usize, old: Value, new: Value },
    Moved { from: usize, to: usize, item: Value },
    /// The collection changed wholesale (cleared or reloaded).
    Reset,
}
