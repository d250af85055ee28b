//! Reference-identity keys.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::object::ObjectRef;

/// Address of the object's allocation; stable while any reference is alive.
pub fn address(obj: &ObjectRef) -> usize {
    Arc::as_ptr(obj) as usize
}

/// Cache key for a single object or an ordered pair of objects.
///
/// Keys compare and hash by reference identity only, never by value. A key
/// holds strong references, so its objects stay alive (and their addresses
/// stay unique) for as long as the key does.
#[derive(Clone, Debug)]
pub enum IdentityKey {
    Single(ObjectRef),
    Pair(ObjectRef, ObjectRef),
}

impl IdentityKey {
    pub fn single(obj: &ObjectRef) -> Self {
        Self::Single(Arc::clone(obj))
    }

    pub fn pair(x: &ObjectRef, y: &ObjectRef) -> Self {
        Self::Pair(Arc::clone(x), Arc::clone(y))
    }

    fn addresses(&self) -> (usize, Option<usize>) {
        match self {
            Self::Single(obj) => (address(obj), None),
            Self::Pair(x, y) => (address(x), Some(address(y))),
        }
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.addresses() == other.addresses()
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addresses().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::type_info::{scalar, TypeInfo};
    use std::collections::HashSet;

    #[test]
    fn keys_compare_by_identity_not_value() {
        let ty = TypeInfo::object("P").member("v", scalar::INT).build();
        let a = Object::with_values(&ty, [("v", 1)]).unwrap();
        let b = Object::with_values(&ty, [("v", 1)]).unwrap();

        assert_eq!(IdentityKey::single(&a), IdentityKey::single(&a));
        assert_ne!(IdentityKey::single(&a), IdentityKey::single(&b));
        assert_eq!(IdentityKey::pair(&a, &b), IdentityKey::pair(&a, &b));
        assert_ne!(IdentityKey::pair(&a, &b), IdentityKey::pair(&b, &a));
        assert_ne!(IdentityKey::single(&a), IdentityKey::pair(&a, &a));

        let set: HashSet<IdentityKey> = [
            IdentityKey::pair(&a, &b),
            IdentityKey::pair(&a, &b),
            IdentityKey::single(&a),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }
}
