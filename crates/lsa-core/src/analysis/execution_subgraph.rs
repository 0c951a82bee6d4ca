//! Execution subgraphs.
//!
//! An [`ExecutionSubgraph`] is the set of blocks an execution can pass
//! through while avoiding a chosen set of removed blocks. For an allocation
//! the removed blocks are the ones where it escapes; what is left is the
//! region where the object is provably still local.
//!
//! The subgraph is stored as a per-block mask of the successor edges that
//! may still be taken. Removing a block clears the edges into it; pruning
//! then keeps only edges that lie on some entry-to-exit path (or close a
//! loop), and every block left without such an edge is unreachable.
//!
//! Unreachable blocks are grouped into [`ExcludedCohort`]s: connected
//! regions with the blocks where control enters and leaves them.

use crate::ir::{BlockId, Graph};
use bitvec::vec::BitVec;
use std::collections::VecDeque;
use std::fmt;

/// Blocks with more successors than this cannot be tracked; the analysis
/// falls back to whole-graph escapes for such graphs.
pub const MAX_FILTERABLE_SUCCESSORS: usize = 8;

/// One bit per successor position.
type SuccessorMask = u8;

const ALL_SUCCESSORS: SuccessorMask = SuccessorMask::MAX;

/// DFS cursor for a block whose successors have not been looked at.
const UNVISITED_SUCC_IDX: isize = -1;
/// DFS cursor for a block whose successors are all explored.
const EXPLORED_SUCC_IDX: isize = MAX_FILTERABLE_SUCCESSORS as isize;

fn block_ids(bits: &BitVec) -> impl Iterator<Item = BlockId> + '_ {
    bits.iter_ones().map(|i| BlockId(i as u32))
}

/// A connected region of excluded blocks.
#[derive(Debug, Clone)]
pub struct ExcludedCohort {
    blocks: BitVec,
    entry_blocks: BitVec,
    exit_blocks: BitVec,
}

impl ExcludedCohort {
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        block_ids(&self.blocks)
    }

    /// Blocks of the cohort with a predecessor outside it.
    pub fn entry_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        block_ids(&self.entry_blocks)
    }

    /// Blocks of the cohort with a successor outside it.
    pub fn exit_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        block_ids(&self.exit_blocks)
    }

    pub fn contains_block(&self, block: BlockId) -> bool {
        self.blocks
            .get(block.index())
            .map(|bit| *bit)
            .unwrap_or(false)
    }

    /// `block` is outside the cohort and can reach one of its entries.
    pub fn succeeds_block(&self, graph: &Graph, block: BlockId) -> bool {
        !self.contains_block(block)
            && self
                .entry_blocks()
                .any(|entry| graph.path_between(block, entry))
    }

    /// `block` is outside the cohort and reachable from one of its exits.
    pub fn precedes_block(&self, graph: &Graph, block: BlockId) -> bool {
        !self.contains_block(block)
            && self
                .exit_blocks()
                .any(|exit| graph.path_between(exit, block))
    }
}

impl PartialEq for ExcludedCohort {
    fn eq(&self, other: &Self) -> bool {
        self.blocks == other.blocks
    }
}

impl Eq for ExcludedCohort {}

impl fmt::Display for ExcludedCohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(
            f: &mut fmt::Formatter<'_>,
            ids: impl Iterator<Item = usize>,
        ) -> fmt::Result {
            write!(f, "[")?;
            for (n, id) in ids.enumerate() {
                if n > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{id}")?;
            }
            write!(f, "]")
        }

        write!(f, "{{ entry: ")?;
        list(f, self.entry_blocks.iter_ones())?;
        write!(f, ", interior: ")?;
        list(
            f,
            self.blocks
                .iter_ones()
                .filter(|&i| !self.entry_blocks[i] && !self.exit_blocks[i]),
        )?;
        write!(f, ", exit: ")?;
        list(f, self.exit_blocks.iter_ones())?;
        write!(f, "}}")
    }
}

/// The blocks reachable from the entry without passing a removed block.
#[derive(Debug, Clone)]
pub struct ExecutionSubgraph {
    allowed_successors: Vec<SuccessorMask>,
    unreachable_blocks: BitVec,
    excluded_cohorts: Vec<ExcludedCohort>,
    valid: bool,
    needs_prune: bool,
    finalized: bool,
}

impl ExecutionSubgraph {
    /// A subgraph containing every block of `graph`.
    ///
    /// When `analysis_possible` is false the subgraph starts out invalid and
    /// never becomes valid.
    pub fn new(graph: &Graph, analysis_possible: bool) -> Self {
        let size = if analysis_possible {
            graph.block_count()
        } else {
            0
        };
        if analysis_possible {
            debug_assert!(
                Self::can_analyse(graph),
                "graph has a block with more than {MAX_FILTERABLE_SUCCESSORS} successors"
            );
        }
        ExecutionSubgraph {
            allowed_successors: vec![ALL_SUCCESSORS; size],
            unreachable_blocks: BitVec::repeat(false, size),
            excluded_cohorts: Vec::new(),
            valid: analysis_possible,
            needs_prune: false,
            finalized: false,
        }
    }

    /// Every block of `graph` has at most [`MAX_FILTERABLE_SUCCESSORS`] successors.
    pub fn can_analyse(graph: &Graph) -> bool {
        graph.max_successor_count() <= MAX_FILTERABLE_SUCCESSORS
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// An invalid subgraph contains nothing.
    pub fn contains_block(&self, block: BlockId) -> bool {
        debug_assert!(!self.finalized || !self.needs_prune);
        self.valid
            && self
                .unreachable_blocks
                .get(block.index())
                .map(|bit| !*bit)
                .unwrap_or(false)
    }

    pub fn unreachable_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        block_ids(&self.unreachable_blocks)
    }

    pub fn reachable_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        let count = if self.valid {
            self.unreachable_blocks.len()
        } else {
            0
        };
        (0..count)
            .filter(move |&i| !self.unreachable_blocks[i])
            .map(|i| BlockId(i as u32))
    }

    /// The excluded regions; empty when the subgraph is invalid or nothing
    /// was removed.
    pub fn excluded_cohorts(&self) -> &[ExcludedCohort] {
        debug_assert!(!self.valid || !self.needs_prune);
        if !self.valid || self.unreachable_blocks.not_any() {
            &[]
        } else {
            &self.excluded_cohorts
        }
    }

    /// Exclude `block` and forbid every edge into it.
    ///
    /// The entry block cannot be avoided, so removing it invalidates the
    /// subgraph.
    pub fn remove_block(&mut self, graph: &Graph, block: BlockId) {
        if !self.valid {
            return;
        }
        if block == graph.entry_block() {
            tracing::trace!(%block, "entry block removed, subgraph invalidated");
            self.valid = false;
            return;
        }
        let id = block.index();
        if self.unreachable_blocks[id] {
            return;
        }
        self.unreachable_blocks.set(id, true);
        for &pred in graph.preds(block) {
            let allowed = graph
                .succs(pred)
                .iter()
                .take(MAX_FILTERABLE_SUCCESSORS)
                .enumerate()
                .filter(|&(_, &succ)| succ != block)
                .fold(0, |mask: SuccessorMask, (i, _)| mask | (1 << i));
            self.limit_block_successors(pred, allowed);
        }
        self.needs_prune = true;
    }

    fn limit_block_successors(&mut self, block: BlockId, allowed: SuccessorMask) {
        self.needs_prune = true;
        self.allowed_successors[block.index()] &= allowed;
    }

    /// Settle the subgraph after removals: drop dead ends, then remove
    /// concavities.
    pub fn finalize(&mut self, graph: &Graph) {
        self.prune(graph);
        self.remove_concavity(graph);
        self.finalized = true;
    }

    /// Keep only edges on a path from the entry to the exit (or around a
    /// loop) that avoids removed blocks.
    fn prune(&mut self, graph: &Graph) {
        if !self.valid {
            return;
        }
        self.needs_prune = false;
        self.unreachable_blocks.fill(false);
        let Some(exit) = graph.exit_block() else {
            tracing::trace!("graph has no exit block, subgraph invalidated");
            self.valid = false;
            return;
        };

        let num_blocks = self.allowed_successors.len();
        let entry = graph.entry_block();
        // Successor edges that were explored and led to the exit or a loop.
        let mut results: Vec<SuccessorMask> = vec![0; num_blocks];
        let mut visiting: BitVec = BitVec::repeat(false, num_blocks);
        let mut last_succ_seen: Vec<isize> = vec![UNVISITED_SUCC_IDX; num_blocks];
        // Blocks above the current one in the DFS.
        let mut current_path: Vec<BlockId> = Vec::with_capacity(num_blocks);
        let mut current = Some(entry);
        let mut start_reaches_end = false;

        let num_entry_succ = graph.succs(entry).len() as isize;
        while num_entry_succ > last_succ_seen[entry.index()] {
            let Some(cur) = current else {
                break;
            };
            let id = cur.index();

            let reached_good_end = if cur == exit {
                start_reaches_end = true;
                true
            } else if last_succ_seen[id] == EXPLORED_SUCC_IDX {
                results[id] != 0
            } else {
                let allowed = self.allowed_successors[id];
                loop {
                    last_succ_seen[id] += 1;
                    let next = last_succ_seen[id];
                    if next >= EXPLORED_SUCC_IDX || allowed & (1 << next) != 0 {
                        break;
                    }
                }
                let succs = graph.succs(cur);
                let cur_succ = last_succ_seen[id];
                if cur_succ >= succs.len().min(MAX_FILTERABLE_SUCCESSORS) as isize {
                    last_succ_seen[id] = EXPLORED_SUCC_IDX;
                    false
                } else {
                    let next = succs[cur_succ as usize];
                    if next == cur || visiting[next.index()] {
                        // A loop; the back edge counts as a way out.
                        results[id] |= 1 << cur_succ;
                        for &on_path in &current_path {
                            let seen = last_succ_seen[on_path.index()];
                            results[on_path.index()] |= 1 << seen;
                        }
                    } else {
                        current_path.push(cur);
                        visiting.set(id, true);
                        current = Some(next);
                    }
                    continue;
                }
            };

            if reached_good_end {
                for &on_path in &current_path {
                    let seen = last_succ_seen[on_path.index()];
                    results[on_path.index()] |= 1 << seen;
                }
            }
            current = current_path.pop();
            if let Some(parent) = current {
                visiting.set(parent.index(), false);
            }
        }

        if !start_reaches_end {
            tracing::trace!("no path from entry to exit, subgraph invalidated");
            self.valid = false;
            return;
        }

        for (id, &mask) in results.iter().enumerate() {
            let block = BlockId(id as u32);
            if mask == 0 && block != exit && block != entry {
                self.unreachable_blocks.set(id, true);
            }
        }
        self.allowed_successors = results;
        self.recalculate_excluded_cohorts(graph);
    }

    /// Exclude every block that lies on a path from one excluded block to
    /// another, so no excluded region can be re-entered.
    fn remove_concavity(&mut self, graph: &Graph) {
        if !self.valid {
            return;
        }
        debug_assert!(!self.needs_prune);
        for id in 0..self.unreachable_blocks.len() {
            if self.unreachable_blocks[id] {
                continue;
            }
            let block = BlockId(id as u32);
            let reached_from_excluded = self
                .unreachable_blocks()
                .any(|skipped| graph.path_between(skipped, block));
            let reaches_excluded = reached_from_excluded
                && self
                    .unreachable_blocks()
                    .any(|skipped| graph.path_between(block, skipped));
            if reaches_excluded {
                self.remove_block(graph, block);
            }
        }
        self.prune(graph);
    }

    /// Split the unreachable blocks into connected components.
    fn recalculate_excluded_cohorts(&mut self, graph: &Graph) {
        debug_assert!(!self.needs_prune);
        let num_blocks = self.unreachable_blocks.len();
        let mut remaining = self.unreachable_blocks.clone();
        let mut cohorts = Vec::new();

        while let Some(first) = remaining.last_one() {
            let mut blocks: BitVec = BitVec::repeat(false, num_blocks);
            let mut worklist = VecDeque::from([BlockId(first as u32)]);
            // Flood-fill both forwards and backwards.
            while let Some(cur) = worklist.pop_front() {
                if !remaining[cur.index()] {
                    continue;
                }
                remaining.set(cur.index(), false);
                blocks.set(cur.index(), true);
                worklist.extend(graph.preds(cur).iter().copied());
                worklist.extend(graph.succs(cur).iter().copied());
            }

            let mut entry_blocks: BitVec = BitVec::repeat(false, num_blocks);
            let mut exit_blocks: BitVec = BitVec::repeat(false, num_blocks);
            for id in blocks.iter_ones() {
                let block = BlockId(id as u32);
                let is_external = |other: &BlockId| !blocks[other.index()];
                if graph.preds(block).iter().any(is_external) {
                    entry_blocks.set(id, true);
                }
                if graph.succs(block).iter().any(is_external) {
                    exit_blocks.set(id, true);
                }
            }
            cohorts.push(ExcludedCohort {
                blocks,
                entry_blocks,
                exit_blocks,
            });
        }
        self.excluded_cohorts = cohorts;
    }
}
