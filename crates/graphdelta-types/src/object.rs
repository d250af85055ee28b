//! Shared, lockable objects.
//!
//! An [`Object`] is always handled through an [`ObjectRef`] so that identity
//! is well defined. Mutations take the instance lock only for the write; any
//! resulting [`Notification`] is raised after the lock is released, because
//! handlers routinely read the object they are notified about.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{TypeError, TypeResult};
use crate::identity::address;
use crate::notification::{CollectionChange, Notification};
use crate::type_info::{MemberInfo, TypeInfo, TypeKind};
use crate::value::Value;

/// Shared handle to an object. Identity is the allocation.
pub type ObjectRef = Arc<Object>;

/// Callback invoked synchronously for every notification an object raises.
pub type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Token returned by [`Object::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Body {
    Fields(Vec<Value>),
    Items(Vec<Value>),
    Cells { lengths: Vec<usize>, cells: Vec<Value> },
}

/// An instance of a [`TypeInfo`].
pub struct Object {
    type_info: Arc<TypeInfo>,
    body: RwLock<Body>,
    subscribers: RwLock<Vec<(SubscriptionId, Handler)>>,
    next_subscription: AtomicU64,
}

impl Object {
    /// Create an instance with every member `Null`, an empty collection, or
    /// a zero-length array.
    pub fn new(type_info: &Arc<TypeInfo>) -> ObjectRef {
        let body = match type_info.kind() {
            TypeKind::Object { members } => Body::Fields(vec![Value::Null; members.len()]),
            TypeKind::List { .. } => Body::Items(Vec::new()),
            TypeKind::Array { rank, .. } => Body::Cells {
                lengths: vec![0; *rank],
                cells: Vec::new(),
            },
        };
        Arc::new(Self {
            type_info: Arc::clone(type_info),
            body: RwLock::new(body),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Create a plain object and assign the given members without notifying.
    pub fn with_values<I, N, V>(type_info: &Arc<TypeInfo>, values: I) -> TypeResult<ObjectRef>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<Value>,
    {
        let obj = Self::new(type_info);
        obj.expect_kind(type_info.is_object(), "an object type")?;
        for (name, value) in values {
            obj.set_silent(name.as_ref(), value.into())?;
        }
        Ok(obj)
    }

    /// Create a collection holding `items`.
    pub fn list<I>(type_info: &Arc<TypeInfo>, items: I) -> TypeResult<ObjectRef>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let obj = Self::new(type_info);
        obj.expect_kind(type_info.is_list(), "a collection type")?;
        *obj.write() = Body::Items(items.into_iter().map(Into::into).collect());
        Ok(obj)
    }

    /// Create an array with the given lengths; `cells` are in row-major order.
    pub fn array(
        type_info: &Arc<TypeInfo>,
        lengths: Vec<usize>,
        cells: Vec<Value>,
    ) -> TypeResult<ObjectRef> {
        let obj = Self::new(type_info);
        let TypeKind::Array { rank, .. } = type_info.kind() else {
            return Err(obj.wrong_kind("an array type"));
        };
        let expected: usize = lengths.iter().product();
        if lengths.len() != *rank || expected != cells.len() {
            return Err(TypeError::ShapeMismatch {
                lengths,
                expected,
                actual: cells.len(),
            });
        }
        *obj.write() = Body::Cells { lengths, cells };
        Ok(obj)
    }

    pub fn type_info(&self) -> &Arc<TypeInfo> {
        &self.type_info
    }

    pub fn type_name(&self) -> &str {
        self.type_info.name()
    }

    // ---------------------------------------------------------------
    // Members
    // ---------------------------------------------------------------

    /// Resolve a member of this object's type by name.
    pub fn member(&self, name: &str) -> TypeResult<Arc<MemberInfo>> {
        self.type_info
            .member(name)
            .cloned()
            .ok_or_else(|| TypeError::UnknownMember {
                type_name: self.type_name().to_string(),
                member: name.to_string(),
            })
    }

    /// Read a member value. The member must be declared by this object's type.
    pub fn get(&self, member: &MemberInfo) -> TypeResult<Value> {
        self.check_member(member)?;
        match &*self.read() {
            Body::Fields(fields) => Ok(fields[member.index()].clone()),
            _ => Err(self.wrong_kind("an object type")),
        }
    }

    /// Read a member value by name.
    pub fn get_by_name(&self, name: &str) -> TypeResult<Value> {
        let member = self.member(name)?;
        self.get(&member)
    }

    /// Assign a member and raise a named change notification if the value changed.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> TypeResult<()> {
        let member = self.member(name)?;
        self.set_member(&member, value)
    }

    /// Assign a member by descriptor and notify if the value changed.
    pub fn set_member(&self, member: &MemberInfo, value: impl Into<Value>) -> TypeResult<()> {
        if self.store(member, value.into())? {
            self.notify(Notification::MemberChanged(Some(member.name().to_string())));
        }
        Ok(())
    }

    /// Assign a member without notifying. Returns `true` if the value changed.
    pub fn set_silent(&self, name: &str, value: impl Into<Value>) -> TypeResult<bool> {
        let member = self.member(name)?;
        self.store(&member, value.into())
    }

    /// Raise an unnamed change notification: "any member may have changed".
    pub fn notify_all(&self) {
        self.notify(Notification::MemberChanged(None));
    }

    fn store(&self, member: &MemberInfo, value: Value) -> TypeResult<bool> {
        self.check_member(member)?;
        match &mut *self.write() {
            Body::Fields(fields) => {
                let slot = &mut fields[member.index()];
                if *slot == value {
                    return Ok(false);
                }
                *slot = value;
                Ok(true)
            }
            _ => Err(self.wrong_kind("an object type")),
        }
    }

    fn check_member(&self, member: &MemberInfo) -> TypeResult<()> {
        let declared = self
            .type_info
            .members()
            .get(member.index())
            .is_some_and(|m| **m == *member);
        if declared {
            Ok(())
        } else {
            Err(TypeError::ForeignMember {
                type_name: self.type_name().to_string(),
                member: member.qualified_name(),
            })
        }
    }

    // ---------------------------------------------------------------
    // Collections
    // ---------------------------------------------------------------

    /// Number of items (collections), cells (arrays) or members (objects).
    pub fn len(&self) -> usize {
        match &*self.read() {
            Body::Fields(v) | Body::Items(v) => v.len(),
            Body::Cells { cells, .. } => cells.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the collection's items.
    pub fn items(&self) -> TypeResult<Vec<Value>> {
        match &*self.read() {
            Body::Items(items) => Ok(items.clone()),
            _ => Err(self.wrong_kind("a collection type")),
        }
    }

    pub fn item(&self, index: usize) -> TypeResult<Value> {
        match &*self.read() {
            Body::Items(items) => items.get(index).cloned().ok_or(TypeError::IndexOutOfRange {
                index,
                len: items.len(),
            }),
            _ => Err(self.wrong_kind("a collection type")),
        }
    }

    pub fn push(&self, item: impl Into<Value>) -> TypeResult<()> {
        let index = self.len();
        self.insert(index, item)
    }

    pub fn insert(&self, index: usize, item: impl Into<Value>) -> TypeResult<()> {
        let item = item.into();
        self.edit_items(|items| {
            check_index(index, items.len() + 1)?;
            items.insert(index, item.clone());
            Ok(CollectionChange::Added { index, item })
        })
        .map(drop)
    }

    pub fn remove(&self, index: usize) -> TypeResult<Value> {
        let change = self.edit_items(|items| {
            check_index(index, items.len())?;
            let item = items.remove(index);
            Ok(CollectionChange::Removed { index, item })
        })?;
        match change {
            CollectionChange::Removed { item, .. } => Ok(item),
            _ => unreachable!("remove always produces a Removed change"),
        }
    }

    /// Replace the item at `index`, returning the previous item.
    pub fn replace(&self, index: usize, item: impl Into<Value>) -> TypeResult<Value> {
        let new = item.into();
        let change = self.edit_items(|items| {
            check_index(index, items.len())?;
            let old = std::mem::replace(&mut items[index], new.clone());
            Ok(CollectionChange::Replaced { index, old, new })
        })?;
        match change {
            CollectionChange::Replaced { old, .. } => Ok(old),
            _ => unreachable!("replace always produces a Replaced change"),
        }
    }

    pub fn move_item(&self, from: usize, to: usize) -> TypeResult<()> {
        self.edit_items(|items| {
            check_index(from, items.len())?;
            check_index(to, items.len())?;
            let item = items.remove(from);
            items.insert(to, item.clone());
            Ok(CollectionChange::Moved { from, to, item })
        })
        .map(drop)
    }

    pub fn clear(&self) -> TypeResult<()> {
        self.edit_items(|items| {
            items.clear();
            Ok(CollectionChange::Reset)
        })
        .map(drop)
    }

    fn edit_items<F>(&self, edit: F) -> TypeResult<CollectionChange>
    where
        F: FnOnce(&mut Vec<Value>) -> TypeResult<CollectionChange>,
    {
        let change = match &mut *self.write() {
            Body::Items(items) => edit(items)?,
            _ => return Err(self.wrong_kind("a collection type")),
        };
        self.notify(Notification::CollectionChanged(change.clone()));
        Ok(change)
    }

    // ---------------------------------------------------------------
    // Arrays
    // ---------------------------------------------------------------

    /// Length of each dimension. Collections report a single dimension.
    pub fn lengths(&self) -> Vec<usize> {
        match &*self.read() {
            Body::Cells { lengths, .. } => lengths.clone(),
            Body::Items(items) => vec![items.len()],
            Body::Fields(_) => Vec::new(),
        }
    }

    pub fn cell(&self, indices: &[usize]) -> TypeResult<Value> {
        match &*self.read() {
            Body::Cells { lengths, cells } => Ok(cells[offset(lengths, indices)?].clone()),
            _ => Err(self.wrong_kind("an array type")),
        }
    }

    /// Assign a cell. Arrays do not notify.
    pub fn set_cell(&self, indices: &[usize], value: impl Into<Value>) -> TypeResult<()> {
        match &mut *self.write() {
            Body::Cells { lengths, cells } => {
                let at = offset(lengths, indices)?;
                cells[at] = value.into();
                Ok(())
            }
            _ => Err(self.wrong_kind("an array type")),
        }
    }

    /// All cells with their indices, in row-major order.
    pub fn cells(&self) -> TypeResult<Vec<(Vec<usize>, Value)>> {
        match &*self.read() {
            Body::Cells { lengths, cells } => {
                let mut out = Vec::with_capacity(cells.len());
                let mut indices = vec![0; lengths.len()];
                for cell in cells {
                    out.push((indices.clone(), cell.clone()));
                    for dim in (0..lengths.len()).rev() {
                        indices[dim] += 1;
                        if indices[dim] < lengths[dim] {
                            break;
                        }
                        indices[dim] = 0;
                    }
                }
                Ok(out)
            }
            _ => Err(self.wrong_kind("an array type")),
        }
    }

    // ---------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------

    /// Register a handler for this object's notifications.
    pub fn subscribe(&self, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    /// Remove a handler. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify(&self, notification: Notification) {
        if !self.type_info.notifies() {
            return;
        }
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(&notification);
        }
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Body> {
        self.body.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Body> {
        self.body.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move every reference held by this object out of its body.
    fn take_references(&mut self) -> Vec<ObjectRef> {
        let values = match self.body.get_mut().unwrap_or_else(PoisonError::into_inner) {
            Body::Fields(values) | Body::Items(values) => values,
            Body::Cells { cells, .. } => cells,
        };
        mem::take(values)
            .into_iter()
            .filter_map(|value| match value {
                Value::Ref(obj) => Some(obj),
                _ => None,
            })
            .collect()
    }

    fn expect_kind(&self, ok: bool, expected: &'static str) -> TypeResult<()> {
        if ok {
            Ok(())
        } else {
            Err(self.wrong_kind(expected))
        }
    }

    fn wrong_kind(&self, expected: &'static str) -> TypeError {
        TypeError::WrongKind {
            type_name: self.type_name().to_string(),
            expected,
        }
    }
}

// Long reference chains are torn down from a work list, not by nested drops.
impl Drop for Object {
    fn drop(&mut self) {
        let mut pending = self.take_references();
        while let Some(obj) = pending.pop() {
            if let Ok(mut owned) = Arc::try_unwrap(obj) {
                pending.append(&mut owned.take_references());
            }
        }
    }
}

// Objects may be cyclic, so Debug never descends into member values.
impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.type_name())
            .field("address", &format_args!("{:#x}", address_of(self)))
            .finish()
    }
}

fn address_of(obj: &Object) -> usize {
    obj as *const Object as usize
}

fn check_index(index: usize, len: usize) -> TypeResult<()> {
    if index < len {
        Ok(())
    } else {
        Err(TypeError::IndexOutOfRange { index, len })
    }
}

fn offset(lengths: &[usize], indices: &[usize]) -> TypeResult<usize> {
    let out_of_range = || TypeError::CellOutOfRange {
        indices: indices.to_vec(),
        lengths: lengths.to_vec(),
    };
    if indices.len() != lengths.len() {
        return Err(out_of_range());
    }
    let mut at = 0;
    for (&i, &len) in indices.iter().zip(lengths) {
        if i >= len {
            return Err(out_of_range());
        }
        at = at * len + i;
    }
    Ok(at)
}
