//! Type descriptors.
//!
//! A [`TypeInfo`] is declared once and shared by every instance of the type.
//! Its [`TypeKind`] is the closed set of shapes the engines dispatch on, so
//! the "is this a plain object, a collection or an array" decision is made
//! when the type is declared and never again.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Built-in scalar type names.
pub mod scalar {
    pub const NULL: &str = "null";
    pub const BOOL: &str = "bool";
    pub const INT: &str = "i64";
    pub const FLOAT: &str = "f64";
    pub const STRING: &str = "string";
    /// Declared type of members that may hold values of any type.
    pub const ANY: &str = "any";

    /// Returns `true` for the built-in scalar type names.
    pub fn is_scalar(type_name: &str) -> bool {
        matches!(type_name, NULL | BOOL | INT | FLOAT | STRING)
    }
}

/// Member visibility, consumed by the settings visibility filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Public,
    Private,
}

/// Descriptor of a single member of an object type.
///
/// Two descriptors are equal when they name the same member of the same
/// declaring type.
#[derive(Clone, Debug)]
pub struct MemberInfo {
    declaring_type: String,
    name: String,
    value_type: String,
    index: usize,
    visibility: Visibility,
}

impl MemberInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    /// Declared type name of the member's values.
    pub fn value_type(&self) -> &str {
        &self.value_type
    }

    /// Position of the member's slot in its declaring type.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// `Type.member` form used by settings and diagnostics.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.name)
    }
}

impl PartialEq for MemberInfo {
    fn eq(&self, other: &Self) -> bool {
        self.declaring_type == other.declaring_type && self.name == other.name
    }
}

impl Eq for MemberInfo {}

impl Hash for MemberInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.declaring_type.hash(state);
        self.name.hash(state);
    }
}

impl PartialOrd for MemberInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemberInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.declaring_type, self.index, &self.name).cmp(&(
            &other.declaring_type,
            other.index,
            &other.name,
        ))
    }
}

impl fmt::Display for MemberInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

/// Shape of a type.
#[derive(Clone, Debug)]
pub enum TypeKind {
    /// Plain object with named members.
    Object { members: Vec<Arc<MemberInfo>> },
    /// Growable, ordered collection.
    List { item_type: String },
    /// Fixed-shape multi-dimensional array.
    Array { item_type: String, rank: usize },
}

/// A declared type.
#[derive(Clone, Debug)]
pub struct TypeInfo {
    name: String,
    kind: TypeKind,
    notifies: bool,
}

impl TypeInfo {
    /// Start declaring a plain object type.
    pub fn object(name: impl Into<String>) -> ObjectTypeBuilder {
        ObjectTypeBuilder {
            name: name.into(),
            members: Vec::new(),
            notifies: true,
        }
    }

    /// Declare a collection type. Collections raise change notifications.
    pub fn list(name: impl Into<String>, item_type: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind: TypeKind::List {
                item_type: item_type.into(),
            },
            notifies: true,
        })
    }

    /// Declare an array type. Arrays never raise change notifications.
    pub fn array(name: impl Into<String>, item_type: impl Into<String>, rank: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind: TypeKind::Array {
                item_type: item_type.into(),
                rank,
            },
            notifies: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Whether instances raise [`Notification`](crate::Notification)s on mutation.
    pub fn notifies(&self) -> bool {
        self.notifies
    }

    /// Declared members; empty for collections and arrays.
    pub fn members(&self) -> &[Arc<MemberInfo>] {
        match &self.kind {
            TypeKind::Object { members } => members,
            _ => &[],
        }
    }

    /// Look up a member by name.
    pub fn member(&self, name: &str) -> Option<&Arc<MemberInfo>> {
        self.members().iter().find(|m| m.name == name)
    }

    /// Declared item type of a collection or array.
    pub fn item_type(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::List { item_type } | TypeKind::Array { item_type, .. } => Some(item_type),
            TypeKind::Object { .. } => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self.kind, TypeKind::Object { .. })
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, TypeKind::List { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }
}

/// Builder for plain object types.
#[derive(Debug)]
pub struct ObjectTypeBuilder {
    name: String,
    members: Vec<(String, String, Visibility)>,
    notifies: bool,
}

impl ObjectTypeBuilder {
    /// Add a public member. Redeclaring a name replaces the earlier declaration.
    pub fn member(self, name: impl Into<String>, value_type: impl Into<String>) -> Self {
        self.declare(name.into(), value_type.into(), Visibility::Public)
    }

    /// Add a private member.
    pub fn private_member(self, name: impl Into<String>, value_type: impl Into<String>) -> Self {
        self.declare(name.into(), value_type.into(), Visibility::Private)
    }

    /// Instances of this type do not raise change notifications.
    pub fn silent(mut self) -> Self {
        self.notifies = false;
        self
    }

    pub fn build(self) -> Arc<TypeInfo> {
        let members = self
            .members
            .into_iter()
            .enumerate()
            .map(|(index, (name, value_type, visibility))| {
                Arc::new(MemberInfo {
                    declaring_type: self.name.clone(),
                    name,
                    value_type,
                    index,
                    visibility,
                })
            })
            .collect();
        Arc::new(TypeInfo {
            name: self.name,
            kind: TypeKind::Object { members },
            notifies: self.notifies,
        })
    }

    fn declare(mut self, name: String, value_type: String, visibility: Visibility) -> Self {
        match self.members.iter_mut().find(|(n, _, _)| *n == name) {
            Some(slot) => *slot = (name, value_type, visibility),
            None => self.members.push((name, value_type, visibility)),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_members_are_indexed_in_declaration_order() {
        let ty = TypeInfo::object("Parent")
            .member("name", scalar::STRING)
            .member("child", "Child")
            .private_member("secret", scalar::INT)
            .build();

        assert!(ty.is_object());
        assert!(ty.notifies());
        let names: Vec<&str> = ty.members().iter().map(|m| m.name()).collect();
        assert_eq!(names, ["name", "child", "secret"]);
        assert_eq!(ty.member("child").unwrap().index(), 1);
        assert_eq!(ty.member("secret").unwrap().visibility(), Visibility::Private);
        assert_eq!(ty.member("child").unwrap().qualified_name(), "Parent.child");
    }

    #[test]
    fn redeclared_member_replaces_earlier_slot() {
        let ty = TypeInfo::object("T")
            .member("a", scalar::INT)
            .member("a", scalar::STRING)
            .build();
        assert_eq!(ty.members().len(), 1);
        assert_eq!(ty.member("a").unwrap().value_type(), scalar::STRING);
    }

    #[test]
    fn member_equality_ignores_value_type() {
        let a = TypeInfo::object("T").member("m", scalar::INT).build();
        let b = TypeInfo::object("T").member("m", scalar::STRING).build();
        assert_eq!(a.members()[0], b.members()[0]);
    }

    #[test]
    fn collections_and_arrays() {
        let list = TypeInfo::list("Children", "Child");
        assert!(list.is_list());
        assert!(list.notifies());
        assert_eq!(list.item_type(), Some("Child"));
        assert!(list.members().is_empty());

        let grid = TypeInfo::array("Grid", scalar::INT, 2);
        assert!(grid.is_array());
        assert!(!grid.notifies());
        assert!(matches!(grid.kind(), TypeKind::Array { rank: 2, .. }));
    }

    #[test]
    fn scalar_names() {
        assert!(scalar::is_scalar("i64"));
        assert!(scalar::is_scalar("string"));
        assert!(!scalar::is_scalar(scalar::ANY));
        assert!(!scalar::is_scalar("Child"));
    }
}
