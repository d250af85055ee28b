//! Indented text rendering of a snapshot.
//!
//! ```text
//! Parent
//!   child
//!     value x: 3 y: 2
//!     parent ...
//! ```
//!
//! A node already printed on the current rendering is shown as `name ...`
//! on later appearances, so cyclic snapshots render finitely.

use std::collections::HashSet;
use std::fmt;

use graphdelta_cache::ADDRESS_SETS;

use crate::tree::{DiffTree, Edge, ValueDiff};

impl fmt::Display for ValueDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = self.tree.node(self.node);
        if root.diffs.is_empty() {
            return writeln!(f, "x: {} y: {}", root.x, root.y);
        }
        writeln!(f, "{}", root.x)?;
        let mut seen = ADDRESS_SETS.borrow();
        seen.insert(self.node);
        render_below(&self.tree, f, self.node, &mut seen)
    }
}

/// Print the edges below `root` depth first, one line per edge.
fn render_below(
    tree: &DiffTree,
    f: &mut fmt::Formatter<'_>,
    root: usize,
    seen: &mut HashSet<usize>,
) -> fmt::Result {
    let mut stack = Vec::new();
    push_edges(tree, root, 1, &mut stack);
    while let Some((edge, depth)) = stack.pop() {
        let pad = depth * 2;
        let (label, id) = match edge {
            Edge::Rank(rank) => {
                writeln!(
                    f,
                    "{:pad$}[rank] x: {:?} y: {:?}",
                    "", rank.x_lengths, rank.y_lengths
                )?;
                continue;
            }
            Edge::Member { member, node } => (member.name().to_string(), *node),
            Edge::Index { index, node } => (index.to_string(), *node),
        };
        let node = tree.node(id);
        if node.diffs.is_empty() {
            writeln!(f, "{:pad$}{label} x: {} y: {}", "", node.x, node.y)?;
        } else if !seen.insert(id) {
            writeln!(f, "{:pad$}{label} ...", "")?;
        } else {
            writeln!(f, "{:pad$}{label}", "")?;
            push_edges(tree, id, depth + 1, &mut stack);
        }
    }
    Ok(())
}

fn push_edges<'t>(tree: &'t DiffTree, id: usize, depth: usize, stack: &mut Vec<(&'t Edge, usize)>) {
    stack.extend(tree.node(id).diffs.iter().rev().map(|edge| (edge, depth)));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use graphdelta_types::{scalar, MemberInfo, TypeInfo, Value};

    use crate::key::DiffKey;
    use crate::tree::{DiffTree, RankDiff, RawEntry, RawNode};

    fn member(ty: &Arc<TypeInfo>, name: &str) -> Arc<MemberInfo> {
        Arc::clone(ty.member(name).unwrap())
    }

    #[test]
    fn renders_nested_leaves_with_indentation() {
        let parent = TypeInfo::object("Parent").member("child", "Child").build();
        let child = TypeInfo::object("Child").member("value", scalar::INT).build();
        let nodes = vec![
            RawNode {
                x: Value::Str("Parent".into()),
                y: Value::Null,
                entries: vec![(DiffKey::Member(member(&parent, "child")), RawEntry::Child(1))],
            },
            RawNode {
                x: Value::Null,
                y: Value::Null,
                entries: vec![(
                    DiffKey::Member(member(&child, "value")),
                    RawEntry::Leaf(Value::Int(3), Value::Int(2)),
                )],
            },
        ];
        let diff = DiffTree::assemble(nodes).unwrap();
        assert_eq!(diff.to_string(), "Parent\n  child\n    value x: 3 y: 2\n");
    }

    #[test]
    fn second_appearance_is_elided() {
        let ty = TypeInfo::object("Node")
            .member("name", scalar::STRING)
            .member("next", "Node")
            .build();
        let nodes = vec![
            RawNode {
                x: Value::Str("Node".into()),
                y: Value::Null,
                entries: vec![
                    (
                        DiffKey::Member(member(&ty, "name")),
                        RawEntry::Leaf("a".into(), "b".into()),
                    ),
                    (DiffKey::Member(member(&ty, "next")), RawEntry::Child(0)),
                ],
            },
        ];
        let diff = DiffTree::assemble(nodes).unwrap();
        assert_eq!(diff.to_string(), "Node\n  name x: a y: b\n  next ...\n");
    }

    #[test]
    fn deep_trees_render_one_line_per_level() {
        let ty = TypeInfo::object("Node")
            .member("value", scalar::INT)
            .member("next", "Node")
            .build();
        let depth = 2_000;
        let mut nodes: Vec<RawNode> = (1..depth)
            .map(|i| RawNode {
                x: Value::Str("Node".into()),
                y: Value::Null,
                entries: vec![(DiffKey::Member(member(&ty, "next")), RawEntry::Child(i))],
            })
            .collect();
        nodes.push(RawNode {
            x: Value::Null,
            y: Value::Null,
            entries: vec![(
                DiffKey::Member(member(&ty, "value")),
                RawEntry::Leaf(Value::Int(1), Value::Int(2)),
            )],
        });
        let rendered = DiffTree::assemble(nodes).unwrap().to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), depth + 1);
        assert_eq!(lines[1], "  next");
        let last = format!("{:pad$}value x: 1 y: 2", "", pad = depth * 2);
        assert_eq!(lines[depth], last);
    }

    #[test]
    fn renders_rank_mismatch() {
        let rank = RankDiff {
            x: Value::Null,
            y: Value::Null,
            x_lengths: vec![2, 2],
            y_lengths: vec![3, 3],
        };
        let nodes = vec![RawNode {
            x: Value::Str("Grid".into()),
            y: Value::Null,
            entries: vec![(DiffKey::Rank, RawEntry::Rank(rank))],
        }];
        let diff = DiffTree::assemble(nodes).unwrap();
        assert_eq!(diff.to_string(), "Grid\n  [rank] x: [2, 2] y: [3, 3]\n");
    }
}
