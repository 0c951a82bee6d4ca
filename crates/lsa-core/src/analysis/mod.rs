//! Heap analyses feeding load/store elimination.
//!
//! The analyses form a dependency chain:
//!
//! ```text
//! Escape analysis (needs only the graph)
//!  └─> Execution subgraph (needs the CFG)
//!       └─> Reference info (escape flags + no-escape subgraph)
//!            └─> Heap location collector (+ array index alias oracle)
//!                 └─> Load/store analysis driver
//! ```
//!
//! Heap locations and reference infos are identified by dense indices into
//! their collector; nothing here holds references into the graph other than
//! the graph itself.

pub mod alias;
pub mod escape;
pub mod execution_subgraph;
pub mod heap_location;
pub mod load_store_analysis;
pub mod reference_info;

pub use alias::{can_array_elements_alias, can_integer_ranges_overlap, AliasResult};
pub use escape::{calculate_escape, does_not_escape, visit_escapes, EscapeFlags};
pub use execution_subgraph::{ExcludedCohort, ExecutionSubgraph, MAX_FILTERABLE_SUCCESSORS};
pub use heap_location::{
    hunt_for_original_reference, instruction_eligible_for_lse_removal, AliasingMatrix,
    HeapEffects, HeapLocation, HeapLocationCollector, HeapLocationKind,
};
pub use load_store_analysis::{AnalysisOutcome, BailOutReason, LoadStoreAnalysis};
pub use reference_info::{EscapeState, ReferenceInfo, ReferenceInfoId};
