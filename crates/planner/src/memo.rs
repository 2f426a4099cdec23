//! The memo: equivalence sets of plan expressions.
//!
//! A [`RelSet`] groups expressions producing the same rows; a [`RelSubset`]
//! tracks the best expression found so far for one required trait set.
//! Expressions refer to child *sets*, never to concrete expressions, so one
//! rewrite improves every plan that uses the rewritten fragment. Sets are
//! merged through a union-find when a rewrite proves two of them equivalent.

use crate::cost::Cost;
use polystore_algebra::{derive_row_type, AlgArena, AlgNodeKind, Convention, NodeId, TraitSet};
use polystore_types::Type;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoExprId(pub u32);

#[derive(Debug, Clone)]
pub struct MemoExpr {
    pub id: MemoExprId,
    pub set: SetId,
    pub kind: AlgNodeKind,
    pub children: Vec<SetId>,
    pub convention: Convention,
}

#[derive(Debug, Clone)]
pub struct RelSubset {
    pub traits: TraitSet,
    pub best: Option<(MemoExprId, Cost)>,
}

#[derive(Debug)]
pub struct RelSet {
    pub id: SetId,
    pub exprs: Vec<MemoExprId>,
    pub subsets: Vec<RelSubset>,
    pub row_type: Type,
}

#[derive(Default)]
pub struct Memo {
    sets: Vec<RelSet>,
    exprs: Vec<MemoExpr>,
    interned: FxHashMap<(AlgNodeKind, Vec<SetId>, Convention), MemoExprId>,
    /// Union-find parent per set; a merged set points at its survivor.
    alias: Vec<u32>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a possibly merged set to its survivor.
    pub fn find(&self, set: SetId) -> SetId {
        let mut cur = set.0;
        while self.alias[cur as usize] != cur {
            cur = self.alias[cur as usize];
        }
        SetId(cur)
    }

    pub fn set(&self, set: SetId) -> &RelSet {
        &self.sets[self.find(set).0 as usize]
    }

    pub fn expr(&self, id: MemoExprId) -> &MemoExpr {
        &self.exprs[id.0 as usize]
    }

    pub fn exprs_in(&self, set: SetId) -> impl Iterator<Item = &MemoExpr> + '_ {
        self.set(set).exprs.iter().map(|id| self.expr(*id))
    }

    pub fn all_exprs(&self) -> impl Iterator<Item = &MemoExpr> + '_ {
        self.exprs.iter()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    pub fn row_type(&self, set: SetId) -> &Type {
        &self.set(set).row_type
    }

    /// Copies a plan tree out of the arena into the memo, returning the root
    /// set.
    pub fn register_plan(&mut self, arena: &AlgArena, root: NodeId) -> SetId {
        let node = arena.get(root);
        let children: Vec<SetId> = node
            .inputs
            .iter()
            .map(|input| self.register_plan(arena, *input))
            .collect();
        let (_, set) = self.intern(node.kind.clone(), children, node.traits.convention, None);
        set
    }

    /// Interns an expression. With `target` set, an expression new to the
    /// memo joins that set; an expression already known elsewhere causes a
    /// set merge. Returns the expr id and its (resolved) set.
    pub fn intern(
        &mut self,
        kind: AlgNodeKind,
        children: Vec<SetId>,
        convention: Convention,
        target: Option<SetId>,
    ) -> (MemoExprId, SetId) {
        let children: Vec<SetId> = children.iter().map(|c| self.find(*c)).collect();
        let key = (kind.clone(), children.clone(), convention);
        if let Some(&id) = self.interned.get(&key) {
            let home = self.find(self.expr(id).set);
            if let Some(target) = target {
                let target = self.find(target);
                if target != home {
                    self.merge(home, target);
                }
            }
            return (id, self.find(home));
        }

        let set = match target {
            Some(set) => self.find(set),
            None => {
                let row_type = self.derive_set_row_type(&kind, &children);
                let id = SetId(self.sets.len() as u32);
                self.alias.push(id.0);
                self.sets.push(RelSet {
                    id,
                    exprs: Vec::new(),
                    subsets: Vec::new(),
                    row_type,
                });
                id
            }
        };
        let id = MemoExprId(self.exprs.len() as u32);
        self.exprs.push(MemoExpr { id, set, kind, children, convention });
        self.interned.insert(key, id);
        self.sets[set.0 as usize].exprs.push(id);
        (id, set)
    }

    fn derive_set_row_type(&self, kind: &AlgNodeKind, children: &[SetId]) -> Type {
        let rows: Vec<&Type> = children.iter().map(|c| self.row_type(*c)).collect();
        derive_row_type(kind, &rows).unwrap_or_else(|e| {
            // Registration only sees trees the frontend already type-checked.
            unreachable!("row type of a registered plan must derive: {e}")
        })
    }

    /// Union: the smaller set id survives.
    pub(crate) fn merge(&mut self, a: SetId, b: SetId) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        let (survivor, absorbed) = if a < b { (a, b) } else { (b, a) };
        log::trace!("memo merge: set {} into {}", absorbed.0, survivor.0);
        let exprs = std::mem::take(&mut self.sets[absorbed.0 as usize].exprs);
        for id in &exprs {
            self.exprs[id.0 as usize].set = survivor;
        }
        self.sets[survivor.0 as usize].exprs.extend(exprs);
        self.alias[absorbed.0 as usize] = survivor.0;
    }

    /// The subset of `set` for `traits`, creating it on demand.
    pub fn subset_mut(&mut self, set: SetId, traits: &TraitSet) -> &mut RelSubset {
        let set = self.find(set);
        let subsets = &mut self.sets[set.0 as usize].subsets;
        let idx = match subsets.iter().position(|s| s.traits == *traits) {
            Some(i) => i,
            None => {
                subsets.push(RelSubset { traits: traits.clone(), best: None });
                subsets.len() - 1
            }
        };
        &mut subsets[idx]
    }

    pub fn best_in(&self, set: SetId, traits: &TraitSet) -> Option<(MemoExprId, Cost)> {
        self.set(set)
            .subsets
            .iter()
            .find(|s| s.traits.satisfies(traits))
            .and_then(|s| s.best)
    }
}
