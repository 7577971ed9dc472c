//! Dominator tree and dominance-frontier computation over a
//! `Function`'s CFG, shared by `ssa.rs`'s Phi-insertion pass and by
//! `konpeito-opt`'s natural-loop detection for LICM (§4.10: "a natural
//! loop is identified by a back edge B -> H where H dominates B").
//!
//! Grounded in the teacher's `tsz-checker::control_flow::FlowGraph`,
//! which walks an antecedent list over an arena-indexed node set; the
//! iterative dataflow algorithm here (Cooper, Harvey & Kennedy's
//! "engineered" dominator algorithm) is the standard generalization of
//! that antecedent-walk idea to a fixed-point over reverse postorder,
//! since `FlowGraph` itself never needed a dominator tree.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{BlockId, Function};

/// Immediate dominators and dominance frontiers for one function's
/// blocks, keyed by `BlockId::index()`.
pub struct Dominators {
    idom: Vec<Option<BlockId>>,
    frontier: Vec<FxHashSet<BlockId>>,
    postorder: Vec<BlockId>,
}

impl Dominators {
    /// Computes the dominator tree for `function`, rooted at
    /// `BlockId::ENTRY`. Unreachable blocks (no path from entry) are
    /// left with `idom = None` and an empty frontier.
    #[must_use]
    pub fn compute(function: &Function) -> Self {
        let n = function.blocks.len();
        let preds = function.predecessors();
        let postorder = postorder_from_entry(function);

        let mut rpo_index = vec![usize::MAX; n];
        for (order, &block) in postorder.iter().rev().enumerate() {
            rpo_index[block.index()] = order;
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        idom[BlockId::ENTRY.index()] = Some(BlockId::ENTRY);

        let reverse_postorder: Vec<BlockId> = postorder.iter().rev().copied().collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in &reverse_postorder {
                if block == BlockId::ENTRY {
                    continue;
                }
                let mut new_idom: Option<BlockId> = None;
                for &pred in &preds[block.index()] {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(current, pred, &idom, &rpo_index),
                    });
                }
                if idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }
        // The entry's self-dominance placeholder is not a real edge.
        idom[BlockId::ENTRY.index()] = None;

        let mut frontier = vec![FxHashSet::default(); n];
        for (i, block_preds) in preds.iter().enumerate() {
            if block_preds.len() < 2 {
                continue;
            }
            let block = BlockId::from(i);
            for &pred in block_preds {
                let mut runner = pred;
                while Some(runner) != idom[block.index()] {
                    frontier[runner.index()].insert(block);
                    match idom[runner.index()] {
                        Some(next) => runner = next,
                        None => break,
                    }
                }
            }
        }

        Self { idom, frontier, postorder }
    }

    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.idom[block.index()]
    }

    #[must_use]
    pub fn frontier_of(&self, block: BlockId) -> &FxHashSet<BlockId> {
        &self.frontier[block.index()]
    }

    /// True if `a` dominates `b` (every path from entry to `b` passes
    /// through `a`), reflexively — a block dominates itself.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut runner = b;
        while let Some(next) = self.idom[runner.index()] {
            if next == a {
                return true;
            }
            runner = next;
        }
        false
    }

    /// Blocks reachable from entry, in the reverse-postorder this pass
    /// computed them in — `ssa.rs` visits blocks in this order so a
    /// dominator is always processed before the blocks it dominates.
    #[must_use]
    pub fn reverse_postorder(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.postorder.iter().rev().copied()
    }

    /// The dominator tree's children of every block, derived from
    /// `idom` — used by `ssa.rs`'s rename pass to walk the tree in
    /// preorder without a separate stored tree structure.
    #[must_use]
    pub fn children(&self) -> FxHashMap<BlockId, Vec<BlockId>> {
        let mut children: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        for (index, parent) in self.idom.iter().enumerate() {
            if let Some(parent) = parent {
                children.entry(*parent).or_default().push(BlockId::from(index));
            }
        }
        children
    }
}

fn intersect(mut a: BlockId, mut b: BlockId, idom: &[Option<BlockId>], rpo_index: &[usize]) -> BlockId {
    while a != b {
        while rpo_index[a.index()] > rpo_index[b.index()] {
            a = idom[a.index()].expect("walked past entry while intersecting dominators");
        }
        while rpo_index[b.index()] > rpo_index[a.index()] {
            b = idom[b.index()].expect("walked past entry while intersecting dominators");
        }
    }
    a
}

fn postorder_from_entry(function: &Function) -> Vec<BlockId> {
    let mut visited = FxHashSet::default();
    let mut order = Vec::with_capacity(function.blocks.len());
    let mut stack: Vec<(BlockId, usize)> = vec![(BlockId::ENTRY, 0)];
    let successors: FxHashMap<BlockId, Vec<BlockId>> = (0..function.blocks.len())
        .map(BlockId::from)
        .map(|id| (id, function.successors(id)))
        .collect();
    visited.insert(BlockId::ENTRY);

    while let Some((block, next_child)) = stack.pop() {
        let children = &successors[&block];
        if next_child < children.len() {
            stack.push((block, next_child + 1));
            let child = children[next_child];
            if visited.insert(child) {
                stack.push((child, 0));
            }
        } else {
            order.push(block);
        }
    }
    order
}

impl From<usize> for BlockId {
    fn from(index: usize) -> Self {
        BlockId::from_usize(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Terminator, ValueId};

    fn diamond() -> Function {
        let mut strings = konpeito_common::Interner::new();
        let name = strings.intern("f");
        let mut function = Function::new(name);
        let then_block = function.alloc_block("then");
        let else_block = function.alloc_block("else");
        let merge = function.alloc_block("merge");
        function.block_mut(BlockId::ENTRY).terminator =
            Some(Terminator::Branch { predicate: ValueId::from_usize(0), then_block, else_block });
        function.block_mut(then_block).terminator = Some(Terminator::Jump(merge));
        function.block_mut(else_block).terminator = Some(Terminator::Jump(merge));
        function.block_mut(merge).terminator = Some(Terminator::Return(None));
        function
    }

    #[test]
    fn merge_block_dominated_only_by_entry() {
        let function = diamond();
        let doms = Dominators::compute(&function);
        let merge = BlockId::from(3);
        assert_eq!(doms.immediate_dominator(merge), Some(BlockId::ENTRY));
        assert!(doms.dominates(BlockId::ENTRY, merge));
    }

    #[test]
    fn merge_block_is_its_own_and_branches_frontier() {
        let function = diamond();
        let doms = Dominators::compute(&function);
        let then_block = BlockId::from(1);
        let else_block = BlockId::from(2);
        let merge = BlockId::from(3);
        assert!(doms.frontier_of(then_block).contains(&merge));
        assert!(doms.frontier_of(else_block).contains(&merge));
    }
}
