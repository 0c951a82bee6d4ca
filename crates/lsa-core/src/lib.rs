//! Load/store analysis.
//!
//! Computes the facts a load/store elimination pass needs about one
//! compiled method: the distinct heap locations its loads and stores touch,
//! which pairs of locations may alias, and how far each allocation escapes,
//! including the region of the graph in which an allocation that escapes on
//! some paths is still local.
//!
//! ```text
//! Graph ──> LoadStoreAnalysis::run ──> HeapLocationCollector
//!                                       ├─ heap locations + aliasing matrix
//!                                       └─ ReferenceInfo per reference
//!                                            └─ ExecutionSubgraph
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod ir;
pub mod stats;

pub use analysis::{
    AnalysisOutcome, BailOutReason, EscapeState, ExecutionSubgraph, HeapLocationCollector,
    LoadStoreAnalysis, ReferenceInfo,
};
pub use config::{AnalysisConfig, LoadStoreAnalysisType, MAX_NUMBER_OF_HEAP_LOCATIONS};
pub use error::{ConfigError, GraphError};
pub use ir::{BlockId, Graph, InstId};
pub use stats::{CompilationStats, MethodCompilationStat};
