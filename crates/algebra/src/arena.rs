use crate::node::derive_row_type;
use crate::{AlgNode, AlgNodeKind, AlgebraError, TraitSet};
use polystore_types::Type;
use rustc_hash::FxHashMap;
use core::fmt;
use core::fmt::Write as _;
use core::hash::{Hash, Hasher};
use smallvec::SmallVec;

/// Index of a node in an [`AlgArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns all algebra nodes of one request.
///
/// Nodes are immutable once interned and de-duplicated by full structural
/// equality (kind, inputs and traits), so a repeated sub-plan is stored once
/// and plan fragments can be compared by id.
#[derive(Default, Clone, Debug)]
pub struct AlgArena {
    nodes: Vec<AlgNode>,
    interned: FxHashMap<AlgNode, NodeId>,
}

impl AlgArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> &AlgNode {
        &self.nodes[id.idx()]
    }

    pub fn row_type(&self, id: NodeId) -> &Type {
        &self.get(id).row_type
    }

    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        &self.get(id).inputs
    }

    /// Derives the row type, validates arity and expression bounds, and
    /// interns the node. Structurally identical nodes return the same id.
    pub fn add(
        &mut self,
        kind: AlgNodeKind,
        inputs: impl IntoIterator<Item = NodeId>,
        traits: TraitSet,
    ) -> Result<NodeId, AlgebraError> {
        let inputs: SmallVec<[NodeId; 2]> = inputs.into_iter().collect();
        let input_rows: Vec<&Type> = inputs.iter().map(|id| self.row_type(*id)).collect();
        let row_type = derive_row_type(&kind, &input_rows)?;
        let node = AlgNode {
            kind,
            inputs,
            row_type,
            traits,
        };
        if let Some(&id) = self.interned.get(&node) {
            return Ok(id);
        }
        let id = NodeId(self.nodes.len() as u32);
        self.interned.insert(node.clone(), id);
        self.nodes.push(node);
        Ok(id)
    }

    /// Re-interns `id` with different traits, keeping kind and inputs.
    pub fn with_traits(&mut self, id: NodeId, traits: TraitSet) -> Result<NodeId, AlgebraError> {
        let node = self.get(id).clone();
        self.add(node.kind, node.inputs, traits)
    }

    /// Re-interns `id` with different inputs, keeping kind and traits.
    pub fn with_inputs(
        &mut self,
        id: NodeId,
        inputs: impl IntoIterator<Item = NodeId>,
    ) -> Result<NodeId, AlgebraError> {
        let node = self.get(id).clone();
        self.add(node.kind, inputs, node.traits)
    }

    /// Hash of kind and inputs only, matching [`AlgNode::structural_eq`].
    pub fn structural_hash(&self, id: NodeId) -> u64 {
        let node = self.get(id);
        let mut hasher = rustc_hash::FxHasher::default();
        node.kind.hash(&mut hasher);
        node.inputs.hash(&mut hasher);
        hasher.finish()
    }

    /// Post-order walk from `root`, each node once.
    pub fn post_order(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                out.push(id);
                continue;
            }
            if seen[id.idx()] {
                continue;
            }
            seen[id.idx()] = true;
            stack.push((id, true));
            for &input in self.inputs(id).iter().rev() {
                stack.push((input, false));
            }
        }
        out
    }

    /// Indented plan rendering, for logs and plan-shape assertions.
    pub fn explain(&self, root: NodeId) -> String {
        let mut out = String::new();
        self.explain_into(root, 0, &mut out);
        out
    }

    fn explain_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.get(id);
        for _ in 0..depth {
            out.push_str("  ");
        }
        let _ = write!(out, "{}", node.kind.name());
        match &node.kind {
            AlgNodeKind::Scan { table, .. } => {
                let _ = write!(out, "(table={table})");
            }
            AlgNodeKind::PhysicalScan {
                table,
                adapter,
                columns,
                ..
            } => {
                let _ = write!(out, "(table={table}, adapter={adapter}, cols={columns})");
            }
            AlgNodeKind::Filter { condition } => {
                let _ = write!(out, "({condition})");
            }
            AlgNodeKind::Join { condition, join_type } => {
                let _ = write!(out, "({join_type:?}, {condition})");
            }
            AlgNodeKind::SetOp { kind, all } => {
                let _ = write!(out, "({kind:?}, all={all})");
            }
            AlgNodeKind::TableModify { table, op, .. } => {
                let _ = write!(out, "({op:?}, table={table})");
            }
            AlgNodeKind::Exchange { distribution } => {
                let _ = write!(out, "({distribution:?})");
            }
            _ => {}
        }
        let _ = writeln!(out, " [{}]", node.traits);
        for &input in &node.inputs {
            self.explain_into(input, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RexNode, ScalarOp};
    use polystore_primitives::TableId;
    use polystore_types::{Field, PolyValue, Type};
    use pretty_assertions::assert_eq;

    fn scan_row() -> Type {
        Type::row(vec![
            Field::new("a", Type::integer()),
            Field::new("b", Type::varchar(16).with_nullable(true)),
        ])
    }

    #[test]
    fn interning_dedups_identical_nodes() {
        let mut arena = AlgArena::new();
        let t = TraitSet::logical();
        let s1 = arena
            .add(AlgNodeKind::Scan { table: TableId(7), row: scan_row() }, [], t.clone())
            .unwrap();
        let s2 = arena
            .add(AlgNodeKind::Scan { table: TableId(7), row: scan_row() }, [], t)
            .unwrap();
        assert_eq!(s1, s2);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn row_type_is_deterministic_for_structural_equals() {
        let mut arena = AlgArena::new();
        let scan = arena
            .add(
                AlgNodeKind::Scan { table: TableId(7), row: scan_row() },
                [],
                TraitSet::logical(),
            )
            .unwrap();
        let cond = RexNode::call(
            ScalarOp::Gt,
            vec![RexNode::input(0, Type::integer()), RexNode::literal(PolyValue::Int(0))],
        );
        let f1 = arena
            .add(AlgNodeKind::Filter { condition: cond.clone() }, [scan], TraitSet::logical())
            .unwrap();
        let f2 = arena
            .add(AlgNodeKind::Filter { condition: cond }, [scan], TraitSet::enumerable())
            .unwrap();
        assert!(arena.get(f1).structural_eq(arena.get(f2)));
        assert_eq!(arena.row_type(f1), arena.row_type(f2));
        assert_ne!(f1, f2, "trait change still interns a distinct node");
    }

    #[test]
    fn post_order_visits_inputs_first() {
        let mut arena = AlgArena::new();
        let scan = arena
            .add(
                AlgNodeKind::Scan { table: TableId(1), row: scan_row() },
                [],
                TraitSet::logical(),
            )
            .unwrap();
        let filter = arena
            .add(
                AlgNodeKind::Filter {
                    condition: RexNode::literal(PolyValue::Bool(true)),
                },
                [scan],
                TraitSet::logical(),
            )
            .unwrap();
        assert_eq!(arena.post_order(filter), vec![scan, filter]);
    }
}
