//! Structural diff engine for graphdelta.
//!
//! Compares two object graphs member by member and item by item, recursing
//! into nested references as the active
//! [`ReferenceHandling`](graphdelta_types::ReferenceHandling) allows, and
//! produces an immutable, cycle-safe difference tree.
//!
//! # Key Types
//!
//! - [`DiffBuilder`] / [`BuilderHandle`] -- Per-pair accumulator, shared through a [`BuilderCache`]
//! - [`ValueDiff`] / [`SubDiff`] -- Immutable result tree (member, index and rank differences)
//! - [`LeafDiff`] -- Flattened differing leaf with its route
//! - [`DiffKey`] -- What a sub-difference is recorded under

pub mod builder;
pub mod error;
pub mod key;
pub mod render;
pub mod tree;

pub use builder::{diff, BuilderCache, BuilderHandle, DiffBuilder};
pub use error::{DiffError, DiffResult};
pub use key::DiffKey;
pub use tree::{DiffTree, IndexDiff, LeafDiff, MemberDiff, RankDiff, SubDiff, ValueDiff};
