//! Object model for graphdelta.
//!
//! The diff and tracking engines operate on dynamically typed object graphs.
//! This crate defines that model and the small vocabulary shared by every
//! other graphdelta crate.
//!
//! # Key Types
//!
//! - [`Value`] / [`Object`] / [`ObjectRef`] -- Values and shared, lockable objects
//! - [`TypeInfo`] / [`TypeKind`] / [`MemberInfo`] -- Type descriptors, decided once per type
//! - [`Notification`] / [`CollectionChange`] -- Mutation notifications raised by objects
//! - [`IdentityKey`] -- Reference-identity key (single object or ordered pair)
//! - [`Path`] / [`PathStep`] / [`Index`] -- Traversal route used for loop detection and diagnostics
//! - [`ReferenceHandling`] -- Policy for recursing into reference-typed members

pub mod error;
pub mod identity;
pub mod notification;
pub mod object;
pub mod path;
pub mod policy;
pub mod type_info;
pub mod value;

pub use error::{TypeError, TypeResult};
pub use identity::{address, IdentityKey};
pub use notification::{CollectionChange, Notification};
pub use object::{Handler, Object, ObjectRef, SubscriptionId};
pub use path::{Index, Path, PathStep};
pub use policy::ReferenceHandling;
pub use type_info::{scalar, MemberInfo, ObjectTypeBuilder, TypeInfo, TypeKind, Visibility};
pub use value::Value;
