//! Immutable diff result trees.
//!
//! A snapshot is an arena: every [`ValueDiff`] is a handle to one node of a
//! shared [`DiffTree`]. Builders that are reachable from several parents, or
//! from themselves, map to a single node, so a tree read out of a cyclic
//! graph is finite.
//!
//! # Invariants
//!
//! - A node with zero sub-differences is itself a differing leaf.
//! - A node is non-empty iff it, or a node reachable from it, has zero
//!   sub-differences or a rank difference.
//! - Sub-differences are sorted by [`DiffKey`] order.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use graphdelta_cache::{ADDRESS_LISTS, ADDRESS_SETS};
use graphdelta_types::{Index, MemberInfo, Value};

use crate::key::DiffKey;

/// Array shapes differ; cells are not compared.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankDiff {
    pub x: Value,
    pub y: Value,
    pub x_lengths: Vec<usize>,
    pub y_lengths: Vec<usize>,
}

/// A member whose values differ.
#[derive(Clone, Debug)]
pub struct MemberDiff {
    pub member: Arc<MemberInfo>,
    pub value: ValueDiff,
}

/// A collection item or array cell whose values differ.
#[derive(Clone, Debug)]
pub struct IndexDiff {
    pub index: Index,
    pub value: ValueDiff,
}

/// One sub-difference of a [`ValueDiff`].
#[derive(Clone, Debug)]
pub enum SubDiff {
    Member(MemberDiff),
    Index(IndexDiff),
    Rank(RankDiff),
}

/// A differing leaf with its route from the snapshot root.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LeafDiff {
    /// Dotted/bracketed route, e.g. `child.items[2].value`.
    pub path: String,
    pub x: Value,
    pub y: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_lengths: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_lengths: Option<Vec<usize>>,
}

impl LeafDiff {
    /// Returns `true` for an array shape mismatch.
    pub fn is_rank(&self) -> bool {
        self.x_lengths.is_some()
    }
}

#[derive(Debug)]
pub(crate) enum Edge {
    Member { member: Arc<MemberInfo>, node: usize },
    Index { index: Index, node: usize },
    Rank(RankDiff),
}

#[derive(Debug)]
pub(crate) struct DiffNode {
    pub(crate) x: Value,
    pub(crate) y: Value,
    pub(crate) diffs: Vec<Edge>,
}

/// Arena backing a snapshot.
#[derive(Debug)]
pub struct DiffTree {
    nodes: Vec<DiffNode>,
    empty: Vec<OnceLock<bool>>,
}

/// Builder state read out for assembly.
pub(crate) struct RawNode {
    pub(crate) x: Value,
    pub(crate) y: Value,
    pub(crate) entries: Vec<(DiffKey, RawEntry)>,
}

pub(crate) enum RawEntry {
    Leaf(Value, Value),
    Rank(RankDiff),
    /// Index into the raw node list.
    Child(usize),
}

impl DiffTree {
    /// Assemble a snapshot rooted at `raw[0]`, dropping sub-differences that
    /// only lead to builders with nothing to report.
    ///
    /// Returns `None` when the root has nothing to report.
    pub(crate) fn assemble(raw: Vec<RawNode>) -> Option<ValueDiff> {
        let count = raw.len();
        let mut differs = vec![false; count];
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut work = Vec::new();
        for (i, node) in raw.iter().enumerate() {
            for (_, entry) in &node.entries {
                match entry {
                    RawEntry::Leaf(..) | RawEntry::Rank(_) => {
                        if !differs[i] {
                            differs[i] = true;
                            work.push(i);
                        }
                    }
                    RawEntry::Child(child) => parents[*child].push(i),
                }
            }
        }
        while let Some(i) = work.pop() {
            for &parent in &parents[i] {
                if !differs[parent] {
                    differs[parent] = true;
                    work.push(parent);
                }
            }
        }
        if !differs.first().copied().unwrap_or(false) {
            return None;
        }

        let mut ids = vec![None; count];
        let mut kept = 0;
        for (i, differ) in differs.iter().enumerate() {
            if *differ {
                ids[i] = Some(kept);
                kept += 1;
            }
        }

        let mut nodes = Vec::with_capacity(kept);
        let mut leaves = Vec::new();
        for (i, node) in raw.into_iter().enumerate() {
            if !differs[i] {
                continue;
            }
            let mut entries = node.entries;
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut diffs = Vec::with_capacity(entries.len());
            for (key, entry) in entries {
                let target = match entry {
                    RawEntry::Rank(rank) => {
                        diffs.push(Edge::Rank(rank));
                        continue;
                    }
                    RawEntry::Leaf(x, y) => {
                        leaves.push(DiffNode {
                            x,
                            y,
                            diffs: Vec::new(),
                        });
                        kept + leaves.len() - 1
                    }
                    RawEntry::Child(child) => match ids[child] {
                        Some(id) => id,
                        None => continue,
                    },
                };
                match key {
                    DiffKey::Member(member) => diffs.push(Edge::Member {
                        member,
                        node: target,
                    }),
                    DiffKey::Index(index) => diffs.push(Edge::Index {
                        index,
                        node: target,
                    }),
                    DiffKey::Rank => {}
                }
            }
            nodes.push(DiffNode {
                x: node.x,
                y: node.y,
                diffs,
            });
        }
        nodes.extend(leaves);

        let empty = (0..nodes.len()).map(|_| OnceLock::new()).collect();
        Some(ValueDiff {
            tree: Arc::new(DiffTree { nodes, empty }),
            node: 0,
        })
    }

    /// Number of distinct nodes in the snapshot.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn node(&self, id: usize) -> &DiffNode {
        &self.nodes[id]
    }

    fn is_node_empty(&self, id: usize) -> bool {
        *self.empty[id].get_or_init(|| !self.reaches_difference(id))
    }

    fn reaches_difference(&self, start: usize) -> bool {
        let mut visited = ADDRESS_SETS.borrow();
        let mut stack = ADDRESS_LISTS.borrow();
        stack.push(start);
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let node = &self.nodes[id];
            if node.diffs.is_empty() {
                return true;
            }
            for edge in &node.diffs {
                match edge {
                    Edge::Rank(_) => return true,
                    Edge::Member { node, .. } | Edge::Index { node, .. } => stack.push(*node),
                }
            }
        }
        false
    }

    /// Depth-first listing of the leaves under `start`, in edge order.
    fn collect_leaves(&self, start: usize, visited: &mut HashSet<usize>) -> Vec<LeafDiff> {
        enum Step<'t> {
            Node(usize, String),
            Rank(&'t RankDiff, String),
        }

        let mut out = Vec::new();
        let mut stack = vec![Step::Node(start, String::new())];
        while let Some(step) = stack.pop() {
            let (id, route) = match step {
                Step::Rank(rank, route) => {
                    out.push(LeafDiff {
                        path: format!("{route}[rank]"),
                        x: rank.x.clone(),
                        y: rank.y.clone(),
                        x_lengths: Some(rank.x_lengths.clone()),
                        y_lengths: Some(rank.y_lengths.clone()),
                    });
                    continue;
                }
                Step::Node(id, route) => (id, route),
            };
            if !visited.insert(id) {
                continue;
            }
            let node = &self.nodes[id];
            if node.diffs.is_empty() {
                out.push(LeafDiff {
                    path: route,
                    x: node.x.clone(),
                    y: node.y.clone(),
                    x_lengths: None,
                    y_lengths: None,
                });
                continue;
            }
            for edge in node.diffs.iter().rev() {
                stack.push(match edge {
                    Edge::Member { member, node } if route.is_empty() => {
                        Step::Node(*node, member.name().to_string())
                    }
                    Edge::Member { member, node } => Step::Node(*node, format!("{route}.{}", member.name())),
                    Edge::Index { index, node } => Step::Node(*node, format!("{route}{index}")),
                    Edge::Rank(rank) => Step::Rank(rank, route.clone()),
                });
            }
        }
        out
    }
}

/// Difference between two values, as a node of a snapshot.
#[derive(Clone)]
pub struct ValueDiff {
    pub(crate) tree: Arc<DiffTree>,
    pub(crate) node: usize,
}

impl ValueDiff {
    pub fn x(&self) -> &Value {
        &self.tree.node(self.node).x
    }

    pub fn y(&self) -> &Value {
        &self.tree.node(self.node).y
    }

    /// The arena this node belongs to.
    pub fn tree(&self) -> &Arc<DiffTree> {
        &self.tree
    }

    /// Sub-differences in deterministic key order.
    pub fn diffs(&self) -> Vec<SubDiff> {
        self.tree
            .node(self.node)
            .diffs
            .iter()
            .map(|edge| match edge {
                Edge::Member { member, node } => SubDiff::Member(MemberDiff {
                    member: Arc::clone(member),
                    value: self.at(*node),
                }),
                Edge::Index { index, node } => SubDiff::Index(IndexDiff {
                    index: index.clone(),
                    value: self.at(*node),
                }),
                Edge::Rank(rank) => SubDiff::Rank(rank.clone()),
            })
            .collect()
    }

    /// Number of sub-differences.
    pub fn len(&self) -> usize {
        self.tree.node(self.node).diffs.len()
    }

    /// Returns `true` if this node is itself a differing leaf.
    pub fn is_leaf(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if nothing differs at or below this node.
    ///
    /// Computed on first call and memoized in the snapshot.
    pub fn is_empty(&self) -> bool {
        self.tree.is_node_empty(self.node)
    }

    /// Sub-difference for the member called `name`.
    pub fn member(&self, name: &str) -> Option<ValueDiff> {
        self.tree.node(self.node).diffs.iter().find_map(|edge| match edge {
            Edge::Member { member, node } if member.name() == name => Some(self.at(*node)),
            _ => None,
        })
    }

    /// Sub-difference for a collection item or array cell.
    pub fn index(&self, index: &Index) -> Option<ValueDiff> {
        self.tree.node(self.node).diffs.iter().find_map(|edge| match edge {
            Edge::Index { index: i, node } if i == index => Some(self.at(*node)),
            _ => None,
        })
    }

    /// The array shape mismatch recorded at this node, if any.
    pub fn rank(&self) -> Option<&RankDiff> {
        self.tree.node(self.node).diffs.iter().find_map(|edge| match edge {
            Edge::Rank(rank) => Some(rank),
            _ => None,
        })
    }

    /// All differing leaves reachable from this node, each shared node
    /// visited once.
    pub fn leaves(&self) -> Vec<LeafDiff> {
        let mut visited = ADDRESS_SETS.borrow();
        self.tree.collect_leaves(self.node, &mut visited)
    }

    /// Returns `true` if both handles point at the same node of the same snapshot.
    pub fn same_node(&self, other: &ValueDiff) -> bool {
        Arc::ptr_eq(&self.tree, &other.tree) && self.node == other.node
    }

    fn at(&self, node: usize) -> ValueDiff {
        ValueDiff {
            tree: Arc::clone(&self.tree),
            node,
        }
    }
}

impl fmt::Debug for ValueDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueDiff")
            .field("node", &self.node)
            .field("x", self.x())
            .field("y", self.y())
            .field("diffs", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphdelta_types::{scalar, TypeInfo};

    fn members() -> (Arc<MemberInfo>, Arc<MemberInfo>) {
        let ty = TypeInfo::object("Node")
            .member("value", scalar::INT)
            .member("next", "Node")
            .build();
        (Arc::clone(&ty.members()[0]), Arc::clone(&ty.members()[1]))
    }

    fn raw(entries: Vec<(DiffKey, RawEntry)>) -> RawNode {
        RawNode {
            x: Value::Null,
            y: Value::Null,
            entries,
        }
    }

    #[test]
    fn nothing_to_report_assembles_to_none() {
        let (_, next) = members();
        let nodes = vec![
            raw(vec![(DiffKey::Member(Arc::clone(&next)), RawEntry::Child(1))]),
            raw(vec![(DiffKey::Member(next), RawEntry::Child(0))]),
        ];
        assert!(DiffTree::assemble(nodes).is_none());
    }

    #[test]
    fn empty_children_are_dropped() {
        let (value, next) = members();
        let nodes = vec![
            raw(vec![
                (DiffKey::Member(Arc::clone(&value)), RawEntry::Leaf(Value::Int(1), Value::Int(2))),
                (DiffKey::Member(next), RawEntry::Child(1)),
            ]),
            raw(Vec::new()),
        ];
        let diff = DiffTree::assemble(nodes).unwrap();
        assert_eq!(diff.len(), 1);
        assert!(diff.member("next").is_none());
        let leaf = diff.member("value").unwrap();
        assert!(leaf.is_leaf());
        assert_eq!(leaf.x(), &Value::Int(1));
        assert_eq!(leaf.y(), &Value::Int(2));
    }

    #[test]
    fn cycles_share_nodes_and_stay_finite() {
        let (value, next) = members();
        let nodes = vec![
            raw(vec![(DiffKey::Member(Arc::clone(&next)), RawEntry::Child(1))]),
            raw(vec![
                (DiffKey::Member(Arc::clone(&next)), RawEntry::Child(0)),
                (DiffKey::Member(value), RawEntry::Leaf("a".into(), "b".into())),
            ]),
        ];
        let root = DiffTree::assemble(nodes).unwrap();
        let child = root.member("next").unwrap();
        let back = child.member("next").unwrap();
        assert!(back.same_node(&root));
        assert!(!root.is_empty());
        assert!(!back.is_empty());

        let leaves = root.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].path, "next.value");
    }

    #[test]
    fn deep_trees_list_leaves_iteratively() {
        let (value, next) = members();
        let depth = 10_000;
        let mut nodes: Vec<RawNode> = (1..depth)
            .map(|i| raw(vec![(DiffKey::Member(Arc::clone(&next)), RawEntry::Child(i))]))
            .collect();
        nodes.push(raw(vec![(
            DiffKey::Member(value),
            RawEntry::Leaf(Value::Int(1), Value::Int(2)),
        )]));
        let diff = DiffTree::assemble(nodes).unwrap();
        assert!(!diff.is_empty());

        let leaves = diff.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].path, format!("{}value", "next.".repeat(depth - 1)));
    }

    #[test]
    fn sub_differences_are_sorted() {
        let (value, next) = members();
        let nodes = vec![
            raw(vec![
                (DiffKey::item(3), RawEntry::Leaf(Value::Int(3), Value::Missing)),
                (DiffKey::Member(next), RawEntry::Leaf(Value::Null, Value::Int(1))),
                (DiffKey::item(1), RawEntry::Leaf(Value::Int(1), Value::Int(2))),
                (DiffKey::Member(value), RawEntry::Leaf(Value::Int(0), Value::Int(1))),
            ]),
        ];
        let root = DiffTree::assemble(nodes).unwrap();
        let paths: Vec<String> = root.leaves().into_iter().map(|l| l.path).collect();
        assert_eq!(paths, ["value", "next", "[1]", "[3]"]);
        assert!(root.index(&Index::Item(3)).unwrap().y().is_missing());
    }

    #[test]
    fn rank_differences_are_leaves() {
        let rank = RankDiff {
            x: Value::Null,
            y: Value::Null,
            x_lengths: vec![2, 2],
            y_lengths: vec![3, 3],
        };
        let root = DiffTree::assemble(vec![raw(vec![(DiffKey::Rank, RawEntry::Rank(rank.clone()))])])
            .unwrap();
        assert_eq!(root.rank(), Some(&rank));
        assert!(!root.is_empty());
        let leaves = root.leaves();
        assert!(leaves[0].is_rank());
        assert_eq!(leaves[0].path, "[rank]");
        assert_eq!(leaves[0].y_lengths.as_deref(), Some(&[3, 3][..]));
    }

    #[test]
    fn leaves_serialize_without_shape_fields() {
        let leaf = LeafDiff {
            path: "child.value".into(),
            x: Value::Int(3),
            y: Value::Int(2),
            x_lengths: None,
            y_lengths: None,
        };
        let json = serde_json::to_value(&leaf).unwrap();
        assert_eq!(json, serde_json::json!({ "path": "child.value", "x": 3, "y": 2 }));
    }
}
