//! Dominance analysis over the block graph.
//!
//! SSA construction needs three things from the flow graph: a reverse
//! postorder over reachable blocks, immediate dominators, and dominance
//! frontiers for phi placement. Immediate dominators use the iterative
//! Cooper-Harvey-Kennedy scheme: walk blocks in reverse postorder,
//! intersecting predecessor dominators by postorder number until the
//! assignment stops changing. Frontiers then fall out of one walk from
//! each join point's predecessors up to its idom.
//!
//! The tree is computed once per conversion, after the block skeleton is
//! final; nothing here mutates the graph.

use crate::ir::arena::{BitSet, SecondaryMap};
use crate::ir::graph::{BlockData, BlockId, Graph};

pub struct DomTree {
    /// Reverse postorder over reachable blocks; entry first.
    pub rpo: Vec<BlockId>,
    /// Postorder number per block, for idom intersection.
    postorder: SecondaryMap<BlockData, u32>,
    /// Immediate dominator per block; the entry points at itself.
    idom: SecondaryMap<BlockData, BlockId>,
    /// Dominator-tree children, for the renaming walk.
    children: SecondaryMap<BlockData, Vec<BlockId>>,
    /// Dominance frontier per block.
    frontier: SecondaryMap<BlockData, Vec<BlockId>>,
}

impl DomTree {
    pub fn build(graph: &Graph, entry: BlockId) -> DomTree {
        let nblocks = graph.num_blocks();
        let mut tree = DomTree {
            rpo: Vec::with_capacity(nblocks),
            postorder: SecondaryMap::with_capacity(nblocks),
            idom: SecondaryMap::with_capacity(nblocks),
            children: SecondaryMap::with_capacity(nblocks),
            frontier: SecondaryMap::with_capacity(nblocks),
        };
        for b in graph.block_ids() {
            tree.idom.set(b, BlockId::INVALID);
        }
        tree.compute_order(graph, entry);
        tree.compute_idoms(graph, entry);
        tree.compute_children(entry);
        tree.compute_frontiers(graph);
        tree
    }

    /// Iterative post-order DFS; reverse gives the RPO.
    fn compute_order(&mut self, graph: &Graph, entry: BlockId) {
        let mut visited = BitSet::with_capacity(graph.num_blocks());
        let mut post: Vec<BlockId> = Vec::new();
        // (block, next successor index) stack
        let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
        visited.insert(entry.as_usize());
        loop {
            let Some(&(block, next)) = stack.last() else { break };
            let succs = graph.succs(block);
            if next < succs.len() {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let succ = succs[next];
                if visited.insert(succ.as_usize()) {
                    stack.push((succ, 0));
                }
            } else {
                stack.pop();
                post.push(block);
            }
        }
        for (i, &b) in post.iter().enumerate() {
            self.postorder.set(b, i as u32);
        }
        self.rpo = post;
        self.rpo.reverse();
    }

    fn compute_idoms(&mut self, graph: &Graph, entry: BlockId) {
        self.idom.set(entry, entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.rpo.iter().skip(1) {
                let mut new_idom = BlockId::INVALID;
                for pred in graph.preds(block) {
                    if !self.idom[pred].is_valid() {
                        continue; // unprocessed this round
                    }
                    new_idom = if new_idom.is_valid() {
                        self.intersect(pred, new_idom)
                    } else {
                        pred
                    };
                }
                if new_idom.is_valid() && self.idom[block] != new_idom {
                    self.idom.set(block, new_idom);
                    changed = true;
                }
            }
        }
    }

    /// Common dominator of two blocks, walking up by postorder number.
    fn intersect(&self, a: BlockId, b: BlockId) -> BlockId {
        let (mut a, mut b) = (a, b);
        while a != b {
            while self.postorder[a] < self.postorder[b] {
                a = self.idom[a];
            }
            while self.postorder[b] < self.postorder[a] {
                b = self.idom[b];
            }
        }
        a
    }

    fn compute_children(&mut self, entry: BlockId) {
        for &b in &self.rpo {
            if b != entry {
                let parent = self.idom[b];
                self.children[parent].push(b);
            }
        }
    }

    /// A block with several predecessors is in the frontier of every block
    /// on a predecessor's dominator chain strictly below the join's idom.
    fn compute_frontiers(&mut self, graph: &Graph) {
        for &block in &self.rpo {
            let preds = graph.preds(block);
            if preds.len() < 2 {
                continue;
            }
            for pred in preds {
                if !self.idom[pred].is_valid() {
                    continue; // unreachable predecessor
                }
                let mut runner = pred;
                while runner != self.idom[block] {
                    if !self.frontier[runner].contains(&block) {
                        self.frontier[runner].push(block);
                    }
                    runner = self.idom[runner];
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    #[inline]
    pub fn idom(&self, b: BlockId) -> BlockId {
        self.idom[b]
    }

    #[inline]
    pub fn children(&self, b: BlockId) -> &[BlockId] {
        &self.children[b]
    }

    #[inline]
    pub fn frontier(&self, b: BlockId) -> &[BlockId] {
        &self.frontier[b]
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.idom.get(b).is_some_and(|d| d.is_valid())
    }

    /// Does `a` dominate `b`? Reflexive.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            let up = self.idom[cur];
            if up == cur {
                return false; // reached the entry
            }
            cur = up;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::{Constant, Graph};
    use crate::typeinfo::TypeInfo;

    // entry -> (left | right) -> tail, the canonical diamond.
    fn diamond() -> (Graph, BlockId, BlockId, BlockId, BlockId) {
        let ti = TypeInfo::new();
        let mut g = Graph::new();
        let entry = g.add_block("entry");
        let left = g.add_block("left");
        let right = g.add_block("right");
        let tail = g.add_block("tail");
        let cond = g.constant(Constant::Bool(true), &ti);
        g.append(entry, cond);
        let br = g.branch(cond, left, right);
        g.append(entry, br);
        let j = g.jump(tail);
        g.append(left, j);
        let j = g.jump(tail);
        g.append(right, j);
        (g, entry, left, right, tail)
    }

    #[test]
    fn diamond_idoms() {
        let (g, entry, left, right, tail) = diamond();
        let dom = DomTree::build(&g, entry);
        assert_eq!(dom.rpo[0], entry);
        assert_eq!(dom.idom(left), entry);
        assert_eq!(dom.idom(right), entry);
        assert_eq!(dom.idom(tail), entry);
        assert!(dom.dominates(entry, tail));
        assert!(!dom.dominates(left, tail));
        assert!(dom.dominates(tail, tail));
    }

    #[test]
    fn diamond_frontiers() {
        let (g, entry, left, right, tail) = diamond();
        let dom = DomTree::build(&g, entry);
        assert_eq!(dom.frontier(left), &[tail]);
        assert_eq!(dom.frontier(right), &[tail]);
        assert!(dom.frontier(entry).is_empty());

        let mut kids = dom.children(entry).to_vec();
        kids.sort();
        assert_eq!(kids, vec![left, right, tail]);
    }

    #[test]
    fn loop_frontier_includes_header() {
        let ti = TypeInfo::new();
        let mut g = Graph::new();
        let entry = g.add_block("entry");
        let header = g.add_block("header");
        let body = g.add_block("body");
        let exit = g.add_block("exit");

        let j = g.jump(header);
        g.append(entry, j);
        let cond = g.constant(Constant::Bool(true), &ti);
        g.append(header, cond);
        let br = g.branch(cond, body, exit);
        g.append(header, br);
        let back = g.jump(header);
        g.append(body, back);

        let dom = DomTree::build(&g, entry);
        assert_eq!(dom.idom(body), header);
        assert_eq!(dom.idom(exit), header);
        // the back edge makes the header its own frontier member
        assert_eq!(dom.frontier(body), &[header]);
        assert!(dom.dominates(header, body));
    }
}
