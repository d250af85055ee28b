//! Diff builders.
//!
//! A [`DiffBuilder`] accumulates the differences between one pair of
//! objects. Builders for nested pairs are shared through a per-call
//! [`BuilderCache`] keyed by the identity pair, so a sub-object reachable
//! from several parents gets exactly one builder, held once per parent link.
//!
//! An entry may defer to another builder ("whatever that builder ends up
//! containing"); this is how cyclic graphs resolve without unbounded
//! recursion. A link to a builder that is still being populated further up
//! the current traversal is held weakly. Counted links therefore never point
//! back up the traversal, they form a DAG, and dropping the root handle
//! releases every builder exactly once.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::vec;

use tracing::{debug, trace};

use graphdelta_cache::{retire, Finalize, RefCountCache, RefCounted, WeakCache, ADDRESS_SETS};
use graphdelta_settings::Settings;
use graphdelta_types::{IdentityKey, Index, MemberInfo, ObjectRef, Path, TypeKind, Value};

use crate::error::{DiffError, DiffResult};
use crate::key::DiffKey;
use crate::tree::{DiffTree, RankDiff, RawEntry, RawNode, ValueDiff};

/// Identity cache shared by the builders of one diff call.
pub type BuilderCache = RefCountCache<IdentityKey, DiffBuilder>;

/// Counted hold on a cached builder.
pub type BuilderHandle = RefCounted<IdentityKey, DiffBuilder>;

// Refresh passes are numbered globally; 0 means "never populated".
static NEXT_PASS: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------
// Entries
// ---------------------------------------------------------------

enum Link {
    Owned(BuilderHandle),
    /// Points at a builder that was in flight when the link was made.
    Back(Weak<DiffBuilder>),
}

impl Link {
    fn target(&self) -> Option<Arc<DiffBuilder>> {
        match self {
            Self::Owned(handle) => Some(Arc::clone(handle.value())),
            Self::Back(weak) => weak.upgrade(),
        }
    }

    fn address(&self) -> usize {
        match self {
            Self::Owned(handle) => Arc::as_ptr(handle.value()) as usize,
            Self::Back(weak) => weak.as_ptr() as usize,
        }
    }
}

enum Entry {
    Leaf { x: Value, y: Value },
    Rank(RankDiff),
    Deferred(Link),
}

impl Entry {
    fn same_as(&self, other: &Entry) -> bool {
        match (self, other) {
            (Self::Leaf { x: a, y: b }, Self::Leaf { x: c, y: d }) => a == c && b == d,
            (Self::Rank(a), Self::Rank(b)) => a == b,
            (Self::Deferred(a), Self::Deferred(b)) => a.address() == b.address(),
            _ => false,
        }
    }
}

type Entries = HashMap<DiffKey, Entry>;

fn same_entries(old: &Entries, new: &Entries) -> bool {
    old.len() == new.len()
        && old
            .iter()
            .all(|(key, entry)| new.get(key).is_some_and(|n| entry.same_as(n)))
}

/// State of one populate pass.
struct Walk {
    fresh: Entries,
    pass: u64,
    child_changed: bool,
}

/// One pending comparison of a builder's walk.
struct Pair {
    key: DiffKey,
    x: Value,
    y: Value,
    path: Path,
}

/// A linked builder that has to be populated before its link is settled.
struct Descend {
    key: DiffKey,
    child: BuilderHandle,
    path: Path,
}

/// The builder a frame populates: the one `refresh` was called on, or a
/// linked builder reached during the pass.
enum Subject<'a> {
    Root(&'a DiffBuilder),
    Linked(Arc<DiffBuilder>),
}

impl Deref for Subject<'_> {
    type Target = DiffBuilder;

    fn deref(&self) -> &DiffBuilder {
        match self {
            Self::Root(builder) => builder,
            Self::Linked(builder) => builder,
        }
    }
}

/// A builder on the walk stack. Its `refreshing` flag is set for as long as
/// the frame is on the stack.
struct Frame<'a> {
    builder: Subject<'a>,
    pending: vec::IntoIter<Pair>,
    walk: Walk,
    /// Child being populated on the frame above, with the key it goes under.
    waiting: Option<(DiffKey, BuilderHandle)>,
}

impl Frame<'_> {
    /// Link `child` under `key` unless it settled empty.
    fn settle(&mut self) {
        if let Some((key, child)) = self.waiting.take() {
            if !child.is_empty() {
                self.walk.fresh.insert(key, Entry::Deferred(Link::Owned(child)));
            }
        }
    }

    /// Replace the builder's entries and leave the stack. Returns `true` if
    /// anything here or below changed.
    fn finish(self) -> bool {
        let Frame { builder, walk, .. } = self;
        let (previous, drifted) = {
            let mut entries = builder.lock();
            let drifted = !same_entries(&entries, &walk.fresh);
            (mem::replace(&mut *entries, walk.fresh), drifted)
        };
        builder.refreshing.store(false, Ordering::Release);
        retire(previous);
        drifted || walk.child_changed
    }
}

/// Explicit walk stack of one refresh pass.
struct Stack<'a> {
    frames: Vec<Frame<'a>>,
    pass: u64,
}

impl<'a> Stack<'a> {
    /// Start populating `builder`. Returns `false`, leaving the stack as it
    /// was, if the builder is already being populated.
    fn push(&mut self, builder: Subject<'a>, path: &Path) -> DiffResult<bool> {
        if builder.refreshing.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        builder.pass.store(self.pass, Ordering::Release);
        let mut walk = Walk {
            fresh: HashMap::new(),
            pass: self.pass,
            child_changed: false,
        };
        let pairs = match builder.pairs(path, &mut walk) {
            Ok(pairs) => pairs,
            Err(err) => {
                builder.refreshing.store(false, Ordering::Release);
                return Err(err);
            }
        };
        self.frames.push(Frame {
            builder,
            pending: pairs.into_iter(),
            walk,
            waiting: None,
        });
        Ok(true)
    }
}

// An error leaves frames behind; they are unwound innermost first.
impl Drop for Stack<'_> {
    fn drop(&mut self) {
        while let Some(frame) = self.frames.pop() {
            frame.builder.refreshing.store(false, Ordering::Release);
        }
    }
}

// ---------------------------------------------------------------
// DiffBuilder
// ---------------------------------------------------------------

/// Mutable accumulator of the differences between `x` and `y`.
pub struct DiffBuilder {
    x: ObjectRef,
    y: ObjectRef,
    settings: Arc<Settings>,
    cache: WeakCache<IdentityKey, DiffBuilder>,
    entries: Mutex<Entries>,
    refreshing: AtomicBool,
    pass: AtomicU64,
    finalized: AtomicBool,
}

impl DiffBuilder {
    fn new(x: &ObjectRef, y: &ObjectRef, settings: &Arc<Settings>, cache: &BuilderCache) -> Self {
        Self {
            x: Arc::clone(x),
            y: Arc::clone(y),
            settings: Arc::clone(settings),
            cache: cache.downgrade(),
            entries: Mutex::new(HashMap::new()),
            refreshing: AtomicBool::new(false),
            pass: AtomicU64::new(0),
            finalized: AtomicBool::new(false),
        }
    }

    /// Build the diff of `x` against `y` in a fresh cache.
    ///
    /// The returned root handle keeps every nested builder alive; dropping it
    /// releases them all.
    pub fn create(x: &ObjectRef, y: &ObjectRef, settings: &Arc<Settings>) -> DiffResult<BuilderHandle> {
        if x.type_name() != y.type_name() {
            return Err(DiffError::TypeMismatch {
                x_type: x.type_name().to_string(),
                y_type: y.type_name().to_string(),
            });
        }
        let cache = BuilderCache::new();
        let (handle, _) = Self::try_create(&cache, x, y, settings);
        handle.refresh()?;
        Ok(handle)
    }

    /// Resolve or create the builder for `(x, y)` without populating it.
    ///
    /// The flag is `true` when a new builder was made; the caller is then
    /// responsible for populating it with [`refresh`](Self::refresh). An
    /// existing builder may still be in flight and is completed by whoever
    /// created it.
    pub fn try_create(
        cache: &BuilderCache,
        x: &ObjectRef,
        y: &ObjectRef,
        settings: &Arc<Settings>,
    ) -> (BuilderHandle, bool) {
        let (handle, created) =
            cache.get_or_create(IdentityKey::pair(x, y), || Self::new(x, y, settings, cache));
        if created {
            debug!(type_name = x.type_name(), "created diff builder");
        }
        (handle, created)
    }

    pub fn x(&self) -> &ObjectRef {
        &self.x
    }

    pub fn y(&self) -> &ObjectRef {
        &self.y
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// The cache this builder lives in, while any handle into it is alive.
    pub fn cache(&self) -> Option<BuilderCache> {
        self.cache.upgrade()
    }

    /// Returns `true` while a refresh of this builder is on the stack.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Number of recorded sub-differences, including deferred ones.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, key: &DiffKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Recorded keys in deterministic order.
    pub fn keys(&self) -> Vec<DiffKey> {
        let mut keys: Vec<DiffKey> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    // ---------------------------------------------------------------
    // Recording
    // ---------------------------------------------------------------

    /// Record differing member values. The latest write for a key wins.
    pub fn add_member(&self, member: &Arc<MemberInfo>, x: Value, y: Value) {
        self.insert(DiffKey::member(member), Entry::Leaf { x, y });
    }

    /// Record differing item or cell values.
    pub fn add_index(&self, index: Index, x: Value, y: Value) {
        self.insert(DiffKey::Index(index), Entry::Leaf { x, y });
    }

    /// Record an array shape mismatch.
    pub fn add_rank(&self, rank: RankDiff) {
        self.insert(DiffKey::Rank, Entry::Rank(rank));
    }

    /// Record that the difference under `key` is whatever `child` contains.
    ///
    /// Takes a counted hold on `child`, unless `child` is in flight or can
    /// already reach this builder through counted links; such back links are
    /// held weakly.
    pub fn add_deferred(&self, key: DiffKey, child: &BuilderHandle) -> DiffResult<()> {
        let link = if child.is_refreshing() || child.reaches(self) {
            Link::Back(Arc::downgrade(child.value()))
        } else {
            let hold = child.retain().ok_or_else(|| {
                DiffError::Internal(format!("deferred link under {key} to a released builder"))
            })?;
            Link::Owned(hold)
        };
        self.insert(key, Entry::Deferred(link));
        Ok(())
    }

    /// Remove the entry under `key`. Returns `false` if there was none.
    pub fn remove(&self, key: &DiffKey) -> bool {
        let removed = self.lock().remove(key);
        removed.is_some()
    }

    fn insert(&self, key: DiffKey, entry: Entry) {
        let replaced = self.lock().insert(key, entry);
        // Released outside the lock.
        drop(replaced);
    }

    // ---------------------------------------------------------------
    // Refresh
    // ---------------------------------------------------------------

    /// Re-walk the pair and replace the recorded state.
    ///
    /// Linked builders are refreshed once per pass, children that settled
    /// empty are dropped, and leaf values are compared against the recorded
    /// ones. Returns `true` if anything here or in a linked builder changed.
    /// Calling this while the same builder is already refreshing returns
    /// `Ok(false)` without doing anything.
    pub fn refresh(&self) -> DiffResult<bool> {
        let pass = NEXT_PASS.fetch_add(1, Ordering::Relaxed);
        let path = Path::root(self.x.type_name());
        let changed = self.populate(&path, pass)?;
        trace!(type_name = self.x.type_name(), pass, changed, "refreshed diff builder");
        Ok(changed)
    }

    /// Populate this builder and every linked builder that is new or stale
    /// for `pass`, depth first from an explicit stack.
    fn populate(&self, path: &Path, pass: u64) -> DiffResult<bool> {
        let mut stack = Stack {
            frames: Vec::new(),
            pass,
        };
        if !stack.push(Subject::Root(self), path)? {
            return Ok(false);
        }
        loop {
            let Some(frame) = stack.frames.last_mut() else {
                return Err(DiffError::Internal("refresh stack emptied early".into()));
            };
            if let Some(pair) = frame.pending.next() {
                let Some(descend) = frame.builder.compare(pair, &mut frame.walk)? else {
                    continue;
                };
                let Descend { key, child, path } = descend;
                let target = Subject::Linked(Arc::clone(child.value()));
                frame.waiting = Some((key, child));
                if !stack.push(target, &path)? {
                    // Populated concurrently; take it as it stands.
                    if let Some(frame) = stack.frames.last_mut() {
                        frame.settle();
                    }
                }
                continue;
            }

            let Some(done) = stack.frames.pop() else {
                continue;
            };
            let changed = done.finish();
            match stack.frames.last_mut() {
                Some(parent) => {
                    parent.walk.child_changed |= changed;
                    parent.settle();
                }
                None => return Ok(changed),
            }
        }
    }

    /// Every comparison a walk of this builder makes, in walk order. An
    /// array shape mismatch is recorded straight into `walk`.
    fn pairs(&self, path: &Path, walk: &mut Walk) -> DiffResult<Vec<Pair>> {
        match self.x.type_info().kind() {
            TypeKind::Object { .. } => self.member_pairs(path),
            TypeKind::List { .. } => self.item_pairs(path),
            TypeKind::Array { .. } => self.cell_pairs(path, walk),
        }
    }

    fn member_pairs(&self, path: &Path) -> DiffResult<Vec<Pair>> {
        let members = self.settings.members(self.x.type_info());
        let mut pairs = Vec::with_capacity(members.len());
        for member in members.iter() {
            self.settings.ensure_supported(member, path)?;
            pairs.push(Pair {
                key: DiffKey::member(member),
                x: self.settings.get_value(&self.x, member)?,
                y: self.settings.get_value(&self.y, member)?,
                path: path.with_member(member),
            });
        }
        Ok(pairs)
    }

    fn item_pairs(&self, path: &Path) -> DiffResult<Vec<Pair>> {
        self.settings.ensure_supported_items(self.x.type_info(), path)?;
        let xs = self.x.items()?;
        let ys = self.y.items()?;
        let pairs = (0..xs.len().max(ys.len()))
            .map(|i| Pair {
                key: DiffKey::item(i),
                x: xs.get(i).cloned().unwrap_or(Value::Missing),
                y: ys.get(i).cloned().unwrap_or(Value::Missing),
                path: path.with_item(i),
            })
            .collect();
        Ok(pairs)
    }

    fn cell_pairs(&self, path: &Path, walk: &mut Walk) -> DiffResult<Vec<Pair>> {
        self.settings.ensure_supported_items(self.x.type_info(), path)?;
        let x_lengths = self.x.lengths();
        let y_lengths = self.y.lengths();
        if x_lengths != y_lengths {
            walk.fresh.insert(
                DiffKey::Rank,
                Entry::Rank(RankDiff {
                    x: Value::Ref(Arc::clone(&self.x)),
                    y: Value::Ref(Arc::clone(&self.y)),
                    x_lengths,
                    y_lengths,
                }),
            );
            return Ok(Vec::new());
        }
        let pairs = self
            .x
            .cells()?
            .into_iter()
            .zip(self.y.cells()?)
            .map(|((indices, x), (_, y))| {
                let index = Index::Cell(indices);
                Pair {
                    path: path.with_index(&index),
                    key: DiffKey::Index(index),
                    x,
                    y,
                }
            })
            .collect();
        Ok(pairs)
    }

    /// Record the outcome of one comparison. Returns the linked builder when
    /// it has to be populated before the link can be settled.
    fn compare(&self, pair: Pair, walk: &mut Walk) -> DiffResult<Option<Descend>> {
        let Pair { key, x, y, path } = pair;
        if let (Value::Ref(xo), Value::Ref(yo)) = (&x, &y) {
            if Arc::ptr_eq(xo, yo) {
                return Ok(None);
            }
            if self.recurses_into(xo, yo) {
                return self.link(key, xo, yo, path, walk);
            }
        }
        if !self.settings.equal_values(&x, &y) {
            walk.fresh.insert(key, Entry::Leaf { x, y });
        }
        Ok(None)
    }

    /// A registered comparer makes the pair a leaf compared by value.
    fn recurses_into(&self, x: &ObjectRef, y: &ObjectRef) -> bool {
        self.settings.reference_handling().is_structural()
            && x.type_name() == y.type_name()
            && !self.settings.is_immutable(x.type_name())
            && self.settings.comparer(x.type_name()).is_none()
    }

    fn link(
        &self,
        key: DiffKey,
        x: &ObjectRef,
        y: &ObjectRef,
        path: Path,
        walk: &mut Walk,
    ) -> DiffResult<Option<Descend>> {
        let cache = self
            .cache
            .upgrade()
            .ok_or_else(|| DiffError::Internal("builder cache released during refresh".into()))?;
        let (child, created) = Self::try_create(&cache, x, y, &self.settings);

        if !created && child.is_refreshing() {
            if self.settings.reference_handling().rejects_loops() {
                return Err(DiffError::Loop {
                    member: describe(&key),
                    path: path.to_string(),
                });
            }
            trace!(%path, "linking back to a builder in flight");
            walk.fresh
                .insert(key, Entry::Deferred(Link::Back(Arc::downgrade(child.value()))));
            return Ok(None);
        }

        if created || child.pass.load(Ordering::Acquire) != walk.pass {
            return Ok(Some(Descend { key, child, path }));
        }
        if !child.is_empty() {
            walk.fresh.insert(key, Entry::Deferred(Link::Owned(child)));
        }
        Ok(None)
    }

    // ---------------------------------------------------------------
    // Reading
    // ---------------------------------------------------------------

    /// Returns `true` if no leaf or rank difference is reachable through
    /// this builder's links.
    ///
    /// A linked builder that is still refreshing counts as non-empty.
    pub fn is_empty(&self) -> bool {
        let mut visited = ADDRESS_SETS.borrow();
        let mut stack = Vec::new();
        visited.insert(self.address());
        if self.scan(&mut stack) {
            return false;
        }
        while let Some(builder) = stack.pop() {
            if !visited.insert(builder.address()) {
                continue;
            }
            if builder.is_refreshing() || builder.scan(&mut stack) {
                return false;
            }
        }
        true
    }

    /// Refresh, then read the current state out as an immutable tree.
    ///
    /// Returns `None` when `x` and `y` are structurally equal.
    pub fn snapshot(&self) -> DiffResult<Option<ValueDiff>> {
        self.refresh()?;
        Ok(self.view())
    }

    /// Read the recorded state out as an immutable tree without refreshing.
    pub fn view(&self) -> Option<ValueDiff> {
        let mut ids: HashMap<usize, usize> = HashMap::new();
        ids.insert(self.address(), 0);
        let mut queue: Vec<Arc<DiffBuilder>> = Vec::new();
        let mut raw = vec![self.raw_node(&mut ids, &mut queue)];
        let mut next = 0;
        while let Some(builder) = queue.get(next).cloned() {
            raw.push(builder.raw_node(&mut ids, &mut queue));
            next += 1;
        }
        DiffTree::assemble(raw)
    }

    fn raw_node(&self, ids: &mut HashMap<usize, usize>, queue: &mut Vec<Arc<DiffBuilder>>) -> RawNode {
        let entries = self.lock();
        let mut out = Vec::with_capacity(entries.len());
        for (key, entry) in entries.iter() {
            let raw = match entry {
                Entry::Leaf { x, y } => RawEntry::Leaf(x.clone(), y.clone()),
                Entry::Rank(rank) => RawEntry::Rank(rank.clone()),
                Entry::Deferred(link) => {
                    let Some(target) = link.target() else {
                        continue;
                    };
                    let id = *ids.entry(target.address()).or_insert_with(|| {
                        queue.push(target);
                        queue.len()
                    });
                    RawEntry::Child(id)
                }
            };
            out.push((key.clone(), raw));
        }
        drop(entries);
        RawNode {
            x: Value::Ref(Arc::clone(&self.x)),
            y: Value::Ref(Arc::clone(&self.y)),
            entries: out,
        }
    }

    /// Returns `true` if a leaf or rank entry is recorded here; queues every
    /// linked builder otherwise.
    fn scan(&self, stack: &mut Vec<Arc<DiffBuilder>>) -> bool {
        let entries = self.lock();
        for entry in entries.values() {
            match entry {
                Entry::Leaf { .. } | Entry::Rank(_) => return true,
                Entry::Deferred(link) => stack.extend(link.target()),
            }
        }
        false
    }

    /// Returns `true` if `target` is this builder or reachable from it
    /// through counted links.
    fn reaches(&self, target: &DiffBuilder) -> bool {
        let goal = target.address();
        let mut visited = ADDRESS_SETS.borrow();
        let mut stack: Vec<Arc<DiffBuilder>> = Vec::new();
        if self.address() == goal {
            return true;
        }
        visited.insert(self.address());
        self.push_owned(&mut stack);
        while let Some(builder) = stack.pop() {
            let address = builder.address();
            if address == goal {
                return true;
            }
            if visited.insert(address) {
                builder.push_owned(&mut stack);
            }
        }
        false
    }

    fn push_owned(&self, stack: &mut Vec<Arc<DiffBuilder>>) {
        for entry in self.lock().values() {
            if let Entry::Deferred(Link::Owned(handle)) = entry {
                stack.push(Arc::clone(handle.value()));
            }
        }
    }

    fn address(&self) -> usize {
        self as *const DiffBuilder as usize
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn describe(key: &DiffKey) -> String {
    match key {
        DiffKey::Member(member) => member.qualified_name(),
        other => other.to_string(),
    }
}

impl Finalize for DiffBuilder {
    /// Drop every recorded entry, releasing the holds on linked builders.
    fn finalize(&self) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        let entries = mem::take(&mut *self.lock());
        debug!(
            type_name = self.x.type_name(),
            entries = entries.len(),
            "finalizing diff builder"
        );
        retire(entries);
    }
}

impl fmt::Debug for DiffBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffBuilder")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("entries", &self.len())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

/// Diff `x` against `y` in one call.
///
/// Returns `None` when the graphs are structurally equal.
pub fn diff(x: &ObjectRef, y: &ObjectRef, settings: &Arc<Settings>) -> DiffResult<Option<ValueDiff>> {
    Ok(DiffBuilder::create(x, y, settings)?.view())
}
