//! Graph IR consumed by the heap analyses.

pub mod dominance;
pub mod graph;
pub mod instruction;

pub use dominance::DominatorTree;
pub use graph::{BasicBlock, BlockId, Graph};
pub use instruction::{BinaryOp, DataType, FieldInfo, InstId, InstKind, Instruction, MonitorKind, Use};
