//! Dominator tree computation from a [`Graph`].
//!
//! Uses the Cooper-Harvey-Kennedy iterative algorithm, which is simple and efficient
//! for the moderate-size CFGs typical of single methods.

use super::graph::{BlockId, Graph};
use rustc_hash::FxHashMap;

/// Dominator tree computed from a graph.
///
/// Block A **dominates** block B if every path from the entry block to B must
/// pass through A. The **immediate dominator** (idom) of B is the closest
/// strict dominator. Blocks unreachable from the entry have no idom and are
/// dominated by nothing but themselves.
#[derive(Debug)]
pub struct DominatorTree {
    /// Immediate dominator for each reachable block. Entry block maps to itself.
    pub idom: FxHashMap<BlockId, BlockId>,
}

impl DominatorTree {
    /// Compute the dominator tree using the Cooper-Harvey-Kennedy algorithm.
    pub fn build(graph: &Graph) -> Self {
        let rpo = graph.reverse_postorder();

        let mut rpo_index: FxHashMap<BlockId, usize> = FxHashMap::default();
        for (i, &block) in rpo.iter().enumerate() {
            rpo_index.insert(block, i);
        }

        let mut idom: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        idom.insert(BlockId::ENTRY, BlockId::ENTRY);

        let mut changed = true;
        while changed {
            changed = false;
            // Skip ENTRY (first in RPO)
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in graph.preds(block) {
                    if idom.contains_key(&pred) {
                        new_idom = Some(match new_idom {
                            None => pred,
                            Some(current) => Self::intersect(current, pred, &idom, &rpo_index),
                        });
                    }
                }

                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        DominatorTree { idom }
    }

    /// Returns true if block `a` dominates block `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut current = b;
        loop {
            match self.idom.get(&current) {
                Some(&dom) if dom == current => return false,
                Some(&dom) if dom == a => return true,
                Some(&dom) => current = dom,
                None => return false,
            }
        }
    }

    /// Returns the immediate dominator of a block, if it has one.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.idom
            .get(&block)
            .copied()
            .filter(|&dom| dom != block)
    }

    fn intersect(
        mut b1: BlockId,
        mut b2: BlockId,
        idom: &FxHashMap<BlockId, BlockId>,
        rpo_index: &FxHashMap<BlockId, usize>,
    ) -> BlockId {
        while b1 != b2 {
            let idx1 = rpo_index.get(&b1).copied().unwrap_or(usize::MAX);
            let idx2 = rpo_index.get(&b2).copied().unwrap_or(usize::MAX);
            if idx1 > idx2 {
                b1 = match idom.get(&b1) {
                    Some(&dom) => dom,
                    None => return b2,
                };
            } else {
                b2 = match idom.get(&b2) {
                    Some(&dom) => dom,
                    None => return b1,
                };
            }
        }
        b1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diamond_dominance() {
        // entry -> {left, right} -> join
        let mut graph = Graph::new();
        let left = graph.add_block();
        let right = graph.add_block();
        let join = graph.add_block();
        graph.add_edge(BlockId::ENTRY, left).unwrap();
        graph.add_edge(BlockId::ENTRY, right).unwrap();
        graph.add_edge(left, join).unwrap();
        graph.add_edge(right, join).unwrap();

        let dom_tree = DominatorTree::build(&graph);
        assert!(dom_tree.dominates(BlockId::ENTRY, join));
        assert!(
            !dom_tree.dominates(left, join),
            "one arm of a diamond should not dominate the join"
        );
        assert_eq!(dom_tree.immediate_dominator(join), Some(BlockId::ENTRY));
        assert_eq!(dom_tree.immediate_dominator(BlockId::ENTRY), None);
    }

    #[test]
    fn test_loop_header_dominance() {
        let mut graph = Graph::new();
        let header = graph.add_block();
        let body = graph.add_block();
        let exit = graph.add_block();
        graph.add_edge(BlockId::ENTRY, header).unwrap();
        graph.add_edge(header, body).unwrap();
        graph.add_edge(body, header).unwrap();
        graph.add_edge(header, exit).unwrap();

        let dom_tree = DominatorTree::build(&graph);
        assert!(
            dom_tree.dominates(header, body),
            "Loop header should dominate its body"
        );
        assert!(!dom_tree.dominates(body, header));
        assert!(dom_tree.dominates(header, exit));
    }

    #[test]
    fn test_unreachable_block_is_not_dominated() {
        let mut graph = Graph::new();
        let island = graph.add_block();
        let dom_tree = DominatorTree::build(&graph);
        assert!(!dom_tree.dominates(BlockId::ENTRY, island));
        assert!(dom_tree.dominates(island, island));
    }
}
