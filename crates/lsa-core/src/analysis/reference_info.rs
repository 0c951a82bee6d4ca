//! Per-reference escape information.
//!
//! One [`ReferenceInfo`] exists for every reference the heap location
//! collector sees. Besides the whole-method escape flags it records, for
//! `new-instance` allocations, the region of the graph in which the object
//! has not escaped yet.

use super::escape::{calculate_escape, visit_escapes, EscapeFlags};
use super::execution_subgraph::ExecutionSubgraph;
use crate::config::LoadStoreAnalysisType;
use crate::ir::{BlockId, Graph, InstId, InstKind};
use bitvec::vec::BitVec;
use rustc_hash::FxHashSet;

/// Index of a [`ReferenceInfo`] in its collector.
pub type ReferenceInfoId = id_arena::Id<ReferenceInfo>;

/// How far a reference escapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscapeState {
    /// A singleton that is neither returned nor visible to deoptimization.
    NoEscape,
    /// Escapes on some paths only; see [`ReferenceInfo::no_escape_subgraph`].
    PartiallyEscapes,
    FullyEscapes,
}

#[derive(Debug, Clone)]
pub struct ReferenceInfo {
    reference: InstId,
    /// Creation order, which follows reverse postorder.
    position: usize,
    flags: EscapeFlags,
    subgraph: ExecutionSubgraph,
}

impl ReferenceInfo {
    pub fn new(
        graph: &Graph,
        reference: InstId,
        position: usize,
        analysis_type: LoadStoreAnalysisType,
    ) -> Self {
        // Dynamic loads make partial escapes of arrays hard to exploit, so
        // only new-instance allocations are tracked.
        let can_be_partial = analysis_type.tracks_partial_escapes()
            && matches!(graph[reference].kind(), InstKind::NewInstance { .. });

        let mut subgraph = ExecutionSubgraph::new(graph, can_be_partial);
        if can_be_partial {
            collect_partial_escapes(graph, reference, &mut subgraph);
        }
        let flags = calculate_escape(graph, reference, |_, _| false);

        let mut info = ReferenceInfo {
            reference,
            position,
            flags,
            subgraph,
        };
        if can_be_partial {
            if analysis_type == LoadStoreAnalysisType::NoPredicatedInstructions {
                info.prune_partial_escape_writes(graph);
            }
            info.subgraph.finalize(graph);
        } else {
            info.subgraph.invalidate();
        }
        info
    }

    pub fn reference(&self) -> InstId {
        self.reference
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn escape_flags(&self) -> EscapeFlags {
        self.flags
    }

    /// No other name can refer to this object during the method.
    pub fn is_singleton(&self) -> bool {
        self.flags.is_singleton
    }

    /// A singleton whose stores can be removed along with the allocation.
    ///
    /// Returned objects are observed by the caller, and deopt-visible ones by
    /// the interpreter, so their stores must stay.
    pub fn is_singleton_and_removable(&self) -> bool {
        self.flags.is_singleton_and_not_returned && self.flags.is_singleton_and_not_deopt_visible
    }

    pub fn is_singleton_and_non_removable(&self) -> bool {
        self.flags.is_singleton && !self.is_singleton_and_removable()
    }

    /// A new-instance that has a region in which it has not escaped.
    pub fn is_partial_singleton(&self) -> bool {
        self.subgraph.is_valid()
    }

    pub fn escape_state(&self) -> EscapeState {
        if self.is_singleton() && self.is_singleton_and_removable() {
            EscapeState::NoEscape
        } else if self.is_partial_singleton() {
            EscapeState::PartiallyEscapes
        } else {
            EscapeState::FullyEscapes
        }
    }

    /// The region in which the object has not escaped. Invalid for anything
    /// that is not a partial singleton.
    pub fn no_escape_subgraph(&self) -> &ExecutionSubgraph {
        &self.subgraph
    }

    /// The no-escape region, only when the reference partially escapes.
    pub fn partial_escape_subgraph(&self) -> Option<&ExecutionSubgraph> {
        (self.escape_state() == EscapeState::PartiallyEscapes).then_some(&self.subgraph)
    }

    /// Exclude blocks that write into the object after it may already have
    /// escaped on another path.
    ///
    /// Without predicated stores such a write cannot be dropped on the
    /// non-escaping path only, so it counts as an escape. Blocks are
    /// collected first and removed afterwards, so every candidate is judged
    /// against the same excluded set.
    pub fn prune_partial_escape_writes(&mut self, graph: &Graph) {
        if !self.subgraph.is_valid() {
            return;
        }
        let mut additional_exclusions: BitVec = BitVec::repeat(false, graph.block_count());
        for use_ in graph[self.reference].uses() {
            let user = &graph[use_.user];
            let block = user.block();
            if additional_exclusions[block.index()]
                || !user.is_heap_write()
                || user.written_object() != Some(self.reference)
                || !self.subgraph.contains_block(block)
            {
                continue;
            }
            let escaped_before = self
                .subgraph
                .unreachable_blocks()
                .any(|excluded| graph.path_between(excluded, block));
            if escaped_before {
                additional_exclusions.set(block.index(), true);
            }
        }

        if additional_exclusions.any() {
            tracing::trace!(
                reference = ?self.reference,
                blocks = additional_exclusions.count_ones(),
                "excluding writes that follow an escape"
            );
            for id in additional_exclusions.iter_ones() {
                self.subgraph.remove_block(graph, BlockId(id as u32));
            }
        }
    }
}

/// Remove from `subgraph` every block in which `reference` escapes.
///
/// Heap locations cannot be followed through phis and selects, so their
/// escapes count as escapes of `reference`. Irreducible loop headers are
/// treated as escapes too.
fn collect_partial_escapes(graph: &Graph, reference: InstId, subgraph: &mut ExecutionSubgraph) {
    let mut seen: FxHashSet<InstId> = FxHashSet::default();
    let mut worklist = vec![reference];
    while let Some(current) = worklist.pop() {
        visit_escapes(graph, current, |escape| {
            subgraph.remove_block(graph, graph[escape].block());
            if matches!(graph[escape].kind(), InstKind::Phi | InstKind::Select) && seen.insert(escape)
            {
                worklist.push(escape);
            }
            true
        });
    }

    for block in graph.blocks() {
        if graph.is_irreducible_loop_header(block.id) {
            subgraph.remove_block(graph, block.id);
        }
    }
}
