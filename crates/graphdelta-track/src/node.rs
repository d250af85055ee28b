//! Live tracker nodes.
//!
//! A [`TrackerNode`] subscribes to one object's change notifications and
//! turns them into [`TrackerEvent`]s. Nodes for nested objects are shared
//! through a per-call [`TrackerCache`] keyed by object identity and linked
//! to every node that references them, so a deep mutation is observable at
//! the root without re-walking the graph.
//!
//! # Lifecycle
//!
//! Created (subscribed to the source) -> Active (handling notifications)
//! -> Released (unsubscribed, children unlinked). Release happens when the
//! last hold on the node is dropped and is idempotent.
//!
//! # Links
//!
//! A link that would close a cycle of counted links (its target is being
//! built or relinked, or can reach such a node) is held weakly. Counted
//! links stay acyclic, so dropping the root handle releases every node.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::vec;

use tracing::{debug, trace, warn};

use graphdelta_cache::{retire, Finalize, RefCountCache, RefCounted, WeakCache, ADDRESS_SETS};
use graphdelta_settings::Settings;
use graphdelta_types::{
    CollectionChange, IdentityKey, MemberInfo, Notification, ObjectRef, Path, SubscriptionId,
    TypeKind, Value,
};

use crate::error::{TrackError, TrackResult};
use crate::event::{ChangeOrigin, TrackerEvent};

/// Identity cache shared by the nodes of one tracked graph.
pub type TrackerCache = RefCountCache<IdentityKey, TrackerNode>;

/// Counted hold on a cached tracker node.
pub type NodeHandle = RefCounted<IdentityKey, TrackerNode>;

/// Callback receiving a node's events.
pub type Listener = Arc<dyn Fn(&TrackerEvent) + Send + Sync>;

/// Identifies a listener registered with [`TrackerNode::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// ---------------------------------------------------------------
// Child links
// ---------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ChildKey {
    Member(Arc<MemberInfo>),
    Item(usize),
}

impl ChildKey {
    fn describe(&self) -> String {
        match self {
            Self::Member(member) => member.qualified_name(),
            Self::Item(index) => format!("[{index}]"),
        }
    }
}

enum Link {
    Owned(NodeHandle),
    Back(Weak<TrackerNode>),
}

/// A parent's link to a child. Dropping it unregisters the parent from the
/// child, then releases the hold, if any.
struct ChildLink {
    link: Link,
    parent: usize,
}

impl ChildLink {
    fn target(&self) -> Option<Arc<TrackerNode>> {
        match &self.link {
            Link::Owned(handle) => Some(Arc::clone(handle.value())),
            Link::Back(weak) => weak.upgrade(),
        }
    }
}

impl Drop for ChildLink {
    fn drop(&mut self) {
        if let Some(child) = self.target() {
            child.remove_parent(self.parent);
        }
    }
}

#[derive(Default)]
struct NodeState {
    subscription: Option<SubscriptionId>,
    children: HashMap<ChildKey, ChildLink>,
}

struct Building<'a>(&'a AtomicBool);

impl Drop for Building<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A node whose links are being made, on the activation stack.
struct Frame {
    node: Arc<TrackerNode>,
    pending: vec::IntoIter<(ChildKey, Value)>,
    fresh: HashMap<ChildKey, ChildLink>,
    /// Created child being activated on the frame above.
    waiting: Option<(ChildKey, NodeHandle)>,
}

impl Frame {
    fn new(node: Arc<TrackerNode>, candidates: Vec<(ChildKey, Value)>) -> Self {
        Self {
            node,
            pending: candidates.into_iter(),
            fresh: HashMap::new(),
            waiting: None,
        }
    }

    /// Install the links of a newly created node and take it off the stack.
    fn finish(self) {
        let Frame { node, fresh, .. } = self;
        let stale = node.replace_children(fresh, |_| true);
        node.building.store(false, Ordering::Release);
        drop(stale);
    }
}

/// Explicit stack of one linking run. The bottom frame is the node that
/// started it, whose building flag belongs to its own relink guard.
struct Activation {
    frames: Vec<Frame>,
}

impl Drop for Activation {
    fn drop(&mut self) {
        while self.frames.len() > 1 {
            if let Some(frame) = self.frames.pop() {
                frame.node.building.store(false, Ordering::Release);
            }
        }
    }
}

// ---------------------------------------------------------------
// TrackerNode
// ---------------------------------------------------------------

/// Live change tracker for one object.
pub struct TrackerNode {
    source: ObjectRef,
    settings: Arc<Settings>,
    cache: WeakCache<IdentityKey, TrackerNode>,
    path: Path,
    members: Arc<[Arc<MemberInfo>]>,
    state: Mutex<NodeState>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    parents: Mutex<Vec<Weak<TrackerNode>>>,
    building: AtomicBool,
    released: AtomicBool,
}

impl TrackerNode {
    fn new(source: &ObjectRef, settings: &Arc<Settings>, cache: &TrackerCache, path: &Path) -> Self {
        Self {
            source: Arc::clone(source),
            settings: Arc::clone(settings),
            cache: cache.downgrade(),
            path: path.clone(),
            members: settings.members(source.type_info()),
            state: Mutex::new(NodeState::default()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            parents: Mutex::new(Vec::new()),
            building: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }
    }

    /// Start tracking `source` and everything reachable from it, in a fresh cache.
    pub fn track(source: &ObjectRef, settings: &Arc<Settings>) -> TrackResult<NodeHandle> {
        let cache = TrackerCache::new();
        Self::get_or_create(&cache, source, settings, &Path::root(source.type_name()))
    }

    /// Resolve the node for `source` in `cache`, creating and activating it
    /// if absent.
    pub fn get_or_create(
        cache: &TrackerCache,
        source: &ObjectRef,
        settings: &Arc<Settings>,
        path: &Path,
    ) -> TrackResult<NodeHandle> {
        Self::resolve(cache, source, settings, path).map(|(handle, _)| handle)
    }

    fn resolve(
        cache: &TrackerCache,
        source: &ObjectRef,
        settings: &Arc<Settings>,
        path: &Path,
    ) -> TrackResult<(NodeHandle, bool)> {
        let (handle, created) = Self::lookup(cache, source, settings, path)?;
        if created {
            handle.value().activate()?;
        }
        Ok((handle, created))
    }

    /// Find or create the node for `source`. A created node is subscribed to
    /// its source but has no links yet.
    fn lookup(
        cache: &TrackerCache,
        source: &ObjectRef,
        settings: &Arc<Settings>,
        path: &Path,
    ) -> TrackResult<(NodeHandle, bool)> {
        settings.ensure_trackable(source.type_info(), path)?;
        let (handle, created) = cache.get_or_create(IdentityKey::single(source), || {
            Self::new(source, settings, cache, path)
        });
        if created {
            debug!(type_name = source.type_name(), %path, "created tracker node");
            handle.value().subscribe_source();
        }
        Ok((handle, created))
    }

    fn subscribe_source(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let subscription = self.source.subscribe(Arc::new(move |notification: &Notification| {
            if let Some(node) = weak.upgrade() {
                node.on_notification(notification);
            }
        }));
        self.lock().subscription = Some(subscription);
    }

    fn activate(self: &Arc<Self>) -> TrackResult<()> {
        self.relink(|node| {
            let fresh = node.link_all(node.candidates()?)?;
            drop(node.replace_children(fresh, |_| true));
            Ok(())
        })
    }

    pub fn source(&self) -> &ObjectRef {
        &self.source
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Route by which this node was first reached.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Members whose changes are reported, in declaration order.
    pub fn members(&self) -> &[Arc<MemberInfo>] {
        &self.members
    }

    /// The cache this node lives in, while any handle into it is alive.
    pub fn cache(&self) -> Option<TrackerCache> {
        self.cache.upgrade()
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Number of linked child nodes.
    pub fn child_count(&self) -> usize {
        self.lock().children.len()
    }

    /// Number of live nodes linking to this one.
    pub fn parent_count(&self) -> usize {
        self.parents().len()
    }

    /// The node tracking the value of member `name`.
    pub fn child(&self, name: &str) -> Option<Arc<TrackerNode>> {
        self.lock().children.iter().find_map(|(key, link)| match key {
            ChildKey::Member(member) if member.name() == name => link.target(),
            _ => None,
        })
    }

    /// The node tracking collection item `index`.
    pub fn item(&self, index: usize) -> Option<Arc<TrackerNode>> {
        self.lock()
            .children
            .get(&ChildKey::Item(index))
            .and_then(ChildLink::target)
    }

    // ---------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------

    /// Register a listener for this node's events.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TrackerEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn raise(&self, event: &TrackerEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        trace!(kind = %event.kind(), listeners = listeners.len(), "raising tracker event");
        for listener in listeners {
            listener(event);
        }
    }

    /// Raise `Changed` here, then on every node that links here, each once.
    fn raise_changed(self: &Arc<Self>, notification: &Notification) {
        let event = TrackerEvent::Changed(ChangeOrigin {
            source: Arc::clone(&self.source),
            notification: notification.clone(),
        });
        let mut visited = ADDRESS_SETS.borrow();
        let mut queue = VecDeque::from([Arc::clone(self)]);
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node.address()) || node.is_released() {
                continue;
            }
            node.raise(&event);
            queue.extend(node.parents());
        }
    }

    // ---------------------------------------------------------------
    // Notification handling
    // ---------------------------------------------------------------

    fn on_notification(self: &Arc<Self>, notification: &Notification) {
        if self.is_released() {
            return;
        }
        let result = match notification {
            Notification::MemberChanged(Some(name)) => self.on_member_changed(notification, name),
            Notification::MemberChanged(None) => self.on_all_changed(notification),
            Notification::CollectionChanged(change) => {
                self.on_collection_changed(notification, change)
            }
        };
        if let Err(error) = result {
            warn!(
                type_name = self.source.type_name(),
                path = %self.path,
                %error,
                "failed to relink after change notification"
            );
        }
    }

    fn on_member_changed(self: &Arc<Self>, notification: &Notification, name: &str) -> TrackResult<()> {
        let Some(member) = self.settings.resolve_member(self.source.type_info(), name) else {
            trace!(type_name = self.source.type_name(), member = name, "change of an undeclared member");
            return Ok(());
        };
        if self.settings.is_ignoring_member(&member) {
            return Ok(());
        }
        let value = self.settings.get_value(&self.source, &member)?;
        let relinked = self.relink(|node| node.relink_member(&member, &value));
        self.raise_changed(notification);
        self.raise(&TrackerEvent::MemberChanged { member, value });
        relinked
    }

    fn on_all_changed(self: &Arc<Self>, notification: &Notification) -> TrackResult<()> {
        let relinked = self.relink(|node| node.relink_members());
        self.raise_changed(notification);
        for member in self.members.iter() {
            match self.settings.get_value(&self.source, member) {
                Ok(value) => self.raise(&TrackerEvent::MemberChanged {
                    member: Arc::clone(member),
                    value,
                }),
                Err(error) => warn!(member = %member, %error, "failed to read member for replay"),
            }
        }
        relinked
    }

    fn on_collection_changed(
        self: &Arc<Self>,
        notification: &Notification,
        change: &CollectionChange,
    ) -> TrackResult<()> {
        let immutable_items = self
            .source
            .type_info()
            .item_type()
            .is_some_and(|item_type| self.settings.is_immutable(item_type));
        let relinked = if immutable_items {
            Ok(())
        } else {
            self.relink(|node| node.relink_items())
        };
        self.raise_changed(notification);
        self.raise(&TrackerEvent::from_collection_change(change));
        relinked
    }

    // ---------------------------------------------------------------
    // Linking
    // ---------------------------------------------------------------

    /// Run `f` with this node marked as building. A relink that is already
    /// in progress is not restarted.
    fn relink<F>(self: &Arc<Self>, f: F) -> TrackResult<()>
    where
        F: FnOnce(&Arc<Self>) -> TrackResult<()>,
    {
        if self.building.swap(true, Ordering::AcqRel) {
            trace!(path = %self.path, "relink already in progress");
            return Ok(());
        }
        let _building = Building(&self.building);
        f(self)
    }

    fn relink_members(self: &Arc<Self>) -> TrackResult<()> {
        let fresh = self.link_all(self.member_candidates()?)?;
        let stale = self.replace_children(fresh, |key| matches!(key, ChildKey::Member(_)));
        drop(stale);
        Ok(())
    }

    fn relink_member(self: &Arc<Self>, member: &Arc<MemberInfo>, value: &Value) -> TrackResult<()> {
        let key = ChildKey::Member(Arc::clone(member));
        let link = self.link_all(vec![(key.clone(), value.clone())])?.remove(&key);
        let stale = {
            let mut state = self.lock();
            match link {
                Some(link) => state.children.insert(key, link),
                None => state.children.remove(&key),
            }
        };
        drop(stale);
        Ok(())
    }

    fn relink_items(self: &Arc<Self>) -> TrackResult<()> {
        let fresh = self.link_all(self.item_candidates()?)?;
        let stale = self.replace_children(fresh, |key| matches!(key, ChildKey::Item(_)));
        drop(stale);
        Ok(())
    }

    /// Swap in `fresh` for the children matching `stale_if`. The replaced
    /// links are returned so they are dropped outside the lock.
    fn replace_children<F>(&self, fresh: HashMap<ChildKey, ChildLink>, stale_if: F) -> Vec<ChildLink>
    where
        F: Fn(&ChildKey) -> bool,
    {
        let mut state = self.lock();
        let (stale, kept): (Vec<_>, Vec<_>) = mem::take(&mut state.children)
            .into_iter()
            .partition(|(key, _)| stale_if(key));
        state.children = kept.into_iter().chain(fresh).collect();
        stale.into_iter().map(|(_, link)| link).collect()
    }

    /// Every value this node may link to, keyed by where it sits.
    fn candidates(&self) -> TrackResult<Vec<(ChildKey, Value)>> {
        match self.source.type_info().kind() {
            TypeKind::Object { .. } => self.member_candidates(),
            TypeKind::List { .. } => self.item_candidates(),
            TypeKind::Array { .. } => Err(TrackError::Internal(format!(
                "{} supports neither member nor collection change tracking",
                self.source.type_name()
            ))),
        }
    }

    fn member_candidates(&self) -> TrackResult<Vec<(ChildKey, Value)>> {
        let mut candidates = Vec::with_capacity(self.members.len());
        for member in self.members.iter() {
            self.settings.ensure_supported(member, &self.path)?;
            let value = self.settings.get_value(&self.source, member)?;
            candidates.push((ChildKey::Member(Arc::clone(member)), value));
        }
        Ok(candidates)
    }

    fn item_candidates(&self) -> TrackResult<Vec<(ChildKey, Value)>> {
        self.settings
            .ensure_supported_items(self.source.type_info(), &self.path)?;
        let items = self.source.items()?;
        Ok(items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (ChildKey::Item(index), item))
            .collect())
    }

    /// Link this node to `candidates`, returning the links by key.
    ///
    /// Nodes created on the way are linked in turn, depth first from an
    /// explicit stack, and stay marked as building while on it.
    fn link_all(
        self: &Arc<Self>,
        candidates: Vec<(ChildKey, Value)>,
    ) -> TrackResult<HashMap<ChildKey, ChildLink>> {
        let mut stack = Activation {
            frames: vec![Frame::new(Arc::clone(self), candidates)],
        };
        loop {
            let Some(frame) = stack.frames.last_mut() else {
                return Err(TrackError::Internal("activation stack emptied early".into()));
            };
            if let Some((key, value)) = frame.pending.next() {
                let node = Arc::clone(&frame.node);
                let Some((child, created)) = node.resolve_child(&key, &value)? else {
                    continue;
                };
                if created {
                    let next = Frame::new(Arc::clone(child.value()), child.candidates()?);
                    next.node.building.store(true, Ordering::Release);
                    frame.waiting = Some((key, child));
                    stack.frames.push(next);
                } else {
                    let link = node.finish_link(&key, child)?;
                    frame.fresh.insert(key, link);
                }
                continue;
            }

            let Some(done) = stack.frames.pop() else {
                continue;
            };
            let Some(parent) = stack.frames.last_mut() else {
                return Ok(done.fresh);
            };
            done.finish();
            if let Some((key, child)) = parent.waiting.take() {
                let link = parent.node.finish_link(&key, child)?;
                parent.fresh.insert(key, link);
            }
        }
    }

    /// Resolve the node for a linked value, if the value is tracked into.
    fn resolve_child(&self, key: &ChildKey, value: &Value) -> TrackResult<Option<(NodeHandle, bool)>> {
        let Value::Ref(target) = value else {
            return Ok(None);
        };
        if !self.tracks_into(target) {
            return Ok(None);
        }
        let cache = self
            .cache
            .upgrade()
            .ok_or_else(|| TrackError::Internal("tracker cache released while linking".into()))?;
        Self::lookup(&cache, target, &self.settings, &self.child_path(key)).map(Some)
    }

    /// Immutable types and types with a registered comparer are leaves.
    fn tracks_into(&self, target: &ObjectRef) -> bool {
        self.settings.reference_handling().is_structural()
            && !self.settings.is_immutable(target.type_name())
            && self.settings.comparer(target.type_name()).is_none()
    }

    fn child_path(&self, key: &ChildKey) -> Path {
        match key {
            ChildKey::Member(member) => self.path.with_member(member),
            ChildKey::Item(index) => self.path.with_item(*index),
        }
    }

    /// Link to a resolved child, weakly if the link would close a cycle.
    fn finish_link(self: &Arc<Self>, key: &ChildKey, child: NodeHandle) -> TrackResult<ChildLink> {
        let closes_cycle = child.reaches_building();
        if closes_cycle && self.settings.reference_handling().rejects_loops() {
            return Err(TrackError::Loop {
                member: key.describe(),
                path: self.child_path(key).to_string(),
            });
        }
        let node = Arc::clone(child.value());
        let link = if closes_cycle {
            trace!(path = %self.child_path(key), "linking back to a node in flight");
            Link::Back(Arc::downgrade(&node))
        } else {
            Link::Owned(child)
        };
        node.add_parent(Arc::downgrade(self));
        Ok(ChildLink {
            link,
            parent: self.address(),
        })
    }

    /// Returns `true` if this node, or a node reachable from it through
    /// counted links, is building.
    fn reaches_building(&self) -> bool {
        if self.is_building() {
            return true;
        }
        let mut visited = ADDRESS_SETS.borrow();
        let mut stack = Vec::new();
        visited.insert(self.address());
        self.push_owned(&mut stack);
        while let Some(node) = stack.pop() {
            if !visited.insert(node.address()) {
                continue;
            }
            if node.is_building() {
                return true;
            }
            node.push_owned(&mut stack);
        }
        false
    }

    fn push_owned(&self, stack: &mut Vec<Arc<TrackerNode>>) {
        for link in self.lock().children.values() {
            if let Link::Owned(handle) = &link.link {
                stack.push(Arc::clone(handle.value()));
            }
        }
    }

    fn add_parent(&self, parent: Weak<TrackerNode>) {
        self.parents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(parent);
    }

    fn remove_parent(&self, parent: usize) {
        let mut parents = self.parents.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = parents.iter().position(|p| p.as_ptr() as usize == parent) {
            parents.remove(pos);
        }
    }

    fn parents(&self) -> Vec<Arc<TrackerNode>> {
        self.parents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn address(&self) -> usize {
        self as *const TrackerNode as usize
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Finalize for TrackerNode {
    /// Unsubscribe from the source and unlink every child.
    fn finalize(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let (subscription, children) = {
            let mut state = self.lock();
            (state.subscription.take(), mem::take(&mut state.children))
        };
        if let Some(id) = subscription {
            self.source.unsubscribe(id);
        }
        debug!(
            type_name = self.source.type_name(),
            path = %self.path,
            children = children.len(),
            "released tracker node"
        );
        retire(children);
    }
}

impl fmt::Debug for TrackerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerNode")
            .field("source", &self.source)
            .field("path", &self.path.to_string())
            .field("children", &self.child_count())
            .field("released", &self.is_released())
            .finish()
    }
}
