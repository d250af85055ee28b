//! Keys of a diff builder's entries.

use std::fmt;
use std::sync::Arc;

use graphdelta_types::{Index, MemberInfo};

/// What a sub-difference is recorded under.
///
/// Ordering is deterministic: members by declaration, then indices, then the
/// rank sentinel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiffKey {
    Member(Arc<MemberInfo>),
    Index(Index),
    /// Array shape mismatch; at most one per builder.
    Rank,
}

impl DiffKey {
    pub fn member(member: &Arc<MemberInfo>) -> Self {
        Self::Member(Arc::clone(member))
    }

    pub fn item(index: usize) -> Self {
        Self::Index(Index::Item(index))
    }
}

impl fmt::Display for DiffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member(m) => write!(f, "{}", m.name()),
            Self::Index(index) => write!(f, "{index}"),
            Self::Rank => write!(f, "[rank]"),
        }
    }
}
