//! Traversal paths.
//!
//! A [`Path`] records how traversal reached the current node: the root type
//! followed by member, collection-item and array-cell steps. Paths are
//! persistent: appending a step returns a new path that shares its prefix
//! with the original, so every edge of a traversal gets its own path cheaply.

use std::fmt;
use std::sync::Arc;

use crate::type_info::MemberInfo;

/// Position inside a collection or array.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Index {
    Item(usize),
    Cell(Vec<usize>),
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item(i) => write!(f, "[{i}]"),
            Self::Cell(indices) => {
                let parts: Vec<String> = indices.iter().map(usize::to_string).collect();
                write!(f, "[{}]", parts.join(","))
            }
        }
    }
}

/// One step of a path.
#[derive(Clone, Debug)]
pub enum PathStep {
    Member(Arc<MemberInfo>),
    Item(usize),
    Cell(Vec<usize>),
}

impl From<Index> for PathStep {
    fn from(index: Index) -> Self {
        match index {
            Index::Item(i) => Self::Item(i),
            Index::Cell(indices) => Self::Cell(indices),
        }
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member(m) => write!(f, ".{}", m.name()),
            Self::Item(i) => write!(f, "[{i}]"),
            Self::Cell(indices) => write!(f, "{}", Index::Cell(indices.clone())),
        }
    }
}

#[derive(Debug)]
struct Segment {
    step: PathStep,
    parent: Option<Arc<Segment>>,
}

// Deep paths would otherwise free their segments recursively.
impl Drop for Segment {
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(segment) = parent {
            parent = match Arc::try_unwrap(segment) {
                Ok(mut owned) => owned.parent.take(),
                Err(_) => None,
            };
        }
    }
}

/// Immutable, append-only traversal route.
#[derive(Clone, Debug)]
pub struct Path {
    root: Arc<str>,
    last: Option<Arc<Segment>>,
    len: usize,
}

impl Path {
    /// An empty path starting at an instance of `root_type`.
    pub fn root(root_type: &str) -> Self {
        Self {
            root: Arc::from(root_type),
            last: None,
            len: 0,
        }
    }

    pub fn root_type(&self) -> &str {
        &self.root
    }

    /// Number of steps after the root.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The most recent step.
    pub fn last(&self) -> Option<&PathStep> {
        self.last.as_ref().map(|s| &s.step)
    }

    /// A new path with `step` appended.
    pub fn with(&self, step: PathStep) -> Self {
        Self {
            root: Arc::clone(&self.root),
            last: Some(Arc::new(Segment {
                step,
                parent: self.last.clone(),
            })),
            len: self.len + 1,
        }
    }

    pub fn with_member(&self, member: &Arc<MemberInfo>) -> Self {
        self.with(PathStep::Member(Arc::clone(member)))
    }

    pub fn with_item(&self, index: usize) -> Self {
        self.with(PathStep::Item(index))
    }

    pub fn with_index(&self, index: &Index) -> Self {
        self.with(PathStep::from(index.clone()))
    }

    /// Returns `true` if `member` was already stepped through on this path.
    ///
    /// Only the current route is scanned. This is a diagnostic query: loops
    /// are detected by re-entering an instance, not by a repeated member.
    pub fn contains_member(&self, member: &MemberInfo) -> bool {
        self.segments()
            .any(|s| matches!(&s.step, PathStep::Member(m) if **m == *member))
    }

    /// Steps from the root outwards.
    pub fn steps(&self) -> Vec<PathStep> {
        let mut steps: Vec<PathStep> = self.segments().map(|s| s.step.clone()).collect();
        steps.reverse();
        steps
    }

    fn segments(&self) -> impl Iterator<Item = &Segment> {
        std::iter::successors(self.last.as_deref(), |s| s.parent.as_deref())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for step in self.steps() {
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_info::{scalar, TypeInfo};
    use proptest::prelude::*;

    #[test]
    fn renders_dotted_and_bracketed_steps() {
        let parent = TypeInfo::object("Parent").member("children", "Children").build();
        let child = TypeInfo::object("Child").member("name", scalar::STRING).build();

        let path = Path::root("Parent")
            .with_member(parent.member("children").unwrap())
            .with_item(2)
            .with_member(child.member("name").unwrap());
        assert_eq!(path.to_string(), "Parent.children[2].name");
        assert_eq!(path.len(), 3);

        let grid = Path::root("Grid").with_index(&Index::Cell(vec![1, 0]));
        assert_eq!(grid.to_string(), "Grid[1,0]");
    }

    #[test]
    fn appending_leaves_the_original_untouched() {
        let ty = TypeInfo::object("A").member("b", "B").build();
        let root = Path::root("A");
        let deeper = root.with_member(ty.member("b").unwrap());
        assert!(root.is_empty());
        assert_eq!(deeper.len(), 1);
        assert!(matches!(deeper.last(), Some(PathStep::Member(m)) if m.name() == "b"));
    }

    #[test]
    fn contains_member_scans_current_route_only() {
        let parent = TypeInfo::object("Parent").member("child", "Child").build();
        let child = TypeInfo::object("Child").member("parent", "Parent").build();
        let to_child = parent.member("child").unwrap();
        let to_parent = child.member("parent").unwrap();

        let path = Path::root("Parent").with_member(to_child).with_member(to_parent);
        assert!(path.contains_member(to_child));
        assert!(path.contains_member(to_parent));

        let sibling = Path::root("Parent").with_item(0);
        assert!(!sibling.contains_member(to_child));
    }

    #[test]
    fn deep_paths_drop_without_recursing() {
        let mut path = Path::root("Root");
        for i in 0..200_000 {
            path = path.with_item(i % 7);
        }
        let prefix = path.clone();
        let branch = path.with_item(9);
        drop(path);
        drop(branch);
        assert_eq!(prefix.len(), 200_000);
        assert!(matches!(prefix.last(), Some(PathStep::Item(_))));
        drop(prefix);
    }

    proptest! {
        #[test]
        fn path_grows_by_one_per_step(items in proptest::collection::vec(0usize..100, 0..20)) {
            let mut path = Path::root("Root");
            for (n, i) in items.iter().enumerate() {
                let next = path.with_item(*i);
                prop_assert_eq!(next.len(), n + 1);
                prop_assert_eq!(path.len(), n);
                path = next;
            }
            let rendered: String = items.iter().map(|i| format!("[{i}]")).collect();
            prop_assert_eq!(path.to_string(), format!("Root{rendered}"));
        }
    }
}
