//! Instructions of the graph IR.
//!
//! Only the instruction shapes the heap analyses care about are modelled:
//! constants, integer arithmetic used in array indices, allocations, field
//! and array accesses, the reference-forwarding instructions that hide an
//! allocation behind another name, and the control/escape points (calls,
//! returns, monitors, deoptimization).

use super::graph::BlockId;
use id_arena::Id;

/// Identifier of an instruction inside its graph's arena.
pub type InstId = Id<Instruction>;

/// The result type of an instruction, or the type of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Uint8,
    Int8,
    Uint16,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Reference,
    Void,
}

impl DataType {
    /// Maps unsigned narrow types onto their signed counterpart.
    ///
    /// Heap locations are keyed on the signed type so that a `byte[]` read
    /// through an unsigned view still hits the same location.
    pub fn to_signed(self) -> DataType {
        match self {
            DataType::Bool | DataType::Uint8 => DataType::Int8,
            DataType::Uint16 => DataType::Int16,
            other => other,
        }
    }

    pub fn is_reference(self) -> bool {
        self == DataType::Reference
    }
}

/// Static description of a resolved field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldInfo {
    /// Byte offset of the field inside its holder.
    pub offset: usize,
    pub field_type: DataType,
    /// Class definition that declares the field. Two fields with the same
    /// offset in unrelated classes never alias.
    pub declaring_class_def_index: u16,
    pub is_volatile: bool,
}

impl FieldInfo {
    pub fn new(offset: usize, field_type: DataType) -> Self {
        FieldInfo {
            offset,
            field_type,
            declaring_class_def_index: 0,
            is_volatile: false,
        }
    }

    pub fn with_declaring_class(mut self, declaring_class_def_index: u16) -> Self {
        self.declaring_class_def_index = declaring_class_def_index;
        self
    }

    pub fn volatile(mut self) -> Self {
        self.is_volatile = true;
        self
    }
}

/// Integer/floating binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }

    pub fn is_add_or_sub(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorKind {
    Enter,
    Exit,
}

/// The closed set of instruction shapes, with their per-kind payload.
///
/// Operand layout (the `inputs` of the owning [`Instruction`]):
///
/// | kind | inputs |
/// |------|--------|
/// | `Binary` | `[left, right]` |
/// | `NewInstance` | `[class]` or `[]` |
/// | `NewArray` | `[length]` |
/// | `InstanceFieldGet` / `StaticFieldGet` | `[holder]` |
/// | `InstanceFieldSet` / `StaticFieldSet` | `[holder, value]` |
/// | `UnresolvedInstanceFieldGet` | `[object]` |
/// | `UnresolvedInstanceFieldSet` | `[object, value]` |
/// | `UnresolvedStaticFieldGet` | `[]` |
/// | `UnresolvedStaticFieldSet` | `[value]` |
/// | `ArrayGet` / `VecLoad` | `[array, index]` |
/// | `ArraySet` / `VecStore` | `[array, index, value]` |
/// | `NullCheck` / `BoundType` / `IntermediateAddress` | `[reference]` |
/// | `Select` | `[false_value, true_value, condition]` |
/// | `MonitorOperation` | `[object]` |
/// | `If` | `[condition]` |
/// | `Return` | `[value]` |
/// | `Phi` / `Invoke` / `Deoptimize` | any |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Parameter {
        index: u32,
    },
    IntConstant(i32),
    LongConstant(i64),
    NullConstant,
    Binary(BinaryOp),
    LoadClass,
    NewInstance {
        /// The allocation site still has to run class initialization or
        /// access checks.
        needs_checks: bool,
        finalizable: bool,
    },
    NewArray,
    InstanceFieldGet(FieldInfo),
    InstanceFieldSet(FieldInfo),
    StaticFieldGet(FieldInfo),
    StaticFieldSet(FieldInfo),
    UnresolvedInstanceFieldGet,
    UnresolvedInstanceFieldSet,
    UnresolvedStaticFieldGet,
    UnresolvedStaticFieldSet,
    ArrayGet,
    ArraySet {
        component_type: DataType,
    },
    VecLoad {
        packed_type: DataType,
        vector_length: usize,
    },
    VecStore {
        packed_type: DataType,
        vector_length: usize,
    },
    NullCheck,
    BoundType,
    IntermediateAddress,
    Phi,
    Select,
    Invoke,
    MonitorOperation(MonitorKind),
    /// Deoptimization point. Its inputs are the environment values that
    /// become visible to the interpreter.
    Deoptimize,
    If,
    Goto,
    Return,
    ReturnVoid,
}

impl InstKind {
    /// Number of inputs this kind requires, or `None` when variadic.
    pub(crate) fn arity(&self) -> Option<std::ops::RangeInclusive<usize>> {
        let exact = |n: usize| Some(n..=n);
        match self {
            InstKind::Parameter { .. }
            | InstKind::IntConstant(_)
            | InstKind::LongConstant(_)
            | InstKind::NullConstant
            | InstKind::LoadClass
            | InstKind::UnresolvedStaticFieldGet
            | InstKind::Goto
            | InstKind::ReturnVoid => exact(0),
            InstKind::NewInstance { .. } => Some(0..=1),
            InstKind::NewArray
            | InstKind::InstanceFieldGet(_)
            | InstKind::StaticFieldGet(_)
            | InstKind::UnresolvedInstanceFieldGet
            | InstKind::UnresolvedStaticFieldSet
            | InstKind::NullCheck
            | InstKind::BoundType
            | InstKind::IntermediateAddress
            | InstKind::MonitorOperation(_)
            | InstKind::If
            | InstKind::Return => exact(1),
            InstKind::Binary(_)
            | InstKind::InstanceFieldSet(_)
            | InstKind::StaticFieldSet(_)
            | InstKind::UnresolvedInstanceFieldSet
            | InstKind::ArrayGet
            | InstKind::VecLoad { .. } => exact(2),
            InstKind::ArraySet { .. } | InstKind::VecStore { .. } | InstKind::Select => exact(3),
            InstKind::Phi | InstKind::Invoke | InstKind::Deoptimize => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstKind::Parameter { .. } => "ParameterValue",
            InstKind::IntConstant(_) => "IntConstant",
            InstKind::LongConstant(_) => "LongConstant",
            InstKind::NullConstant => "NullConstant",
            InstKind::Binary(BinaryOp::Add) => "Add",
            InstKind::Binary(BinaryOp::Sub) => "Sub",
            InstKind::Binary(_) => "BinaryOperation",
            InstKind::LoadClass => "LoadClass",
            InstKind::NewInstance { .. } => "NewInstance",
            InstKind::NewArray => "NewArray",
            InstKind::InstanceFieldGet(_) => "InstanceFieldGet",
            InstKind::InstanceFieldSet(_) => "InstanceFieldSet",
            InstKind::StaticFieldGet(_) => "StaticFieldGet",
            InstKind::StaticFieldSet(_) => "StaticFieldSet",
            InstKind::UnresolvedInstanceFieldGet => "UnresolvedInstanceFieldGet",
            InstKind::UnresolvedInstanceFieldSet => "UnresolvedInstanceFieldSet",
            InstKind::UnresolvedStaticFieldGet => "UnresolvedStaticFieldGet",
            InstKind::UnresolvedStaticFieldSet => "UnresolvedStaticFieldSet",
            InstKind::ArrayGet => "ArrayGet",
            InstKind::ArraySet { .. } => "ArraySet",
            InstKind::VecLoad { .. } => "VecLoad",
            InstKind::VecStore { .. } => "VecStore",
            InstKind::NullCheck => "NullCheck",
            InstKind::BoundType => "BoundType",
            InstKind::IntermediateAddress => "IntermediateAddress",
            InstKind::Phi => "Phi",
            InstKind::Select => "Select",
            InstKind::Invoke => "Invoke",
            InstKind::MonitorOperation(_) => "MonitorOperation",
            InstKind::Deoptimize => "Deoptimize",
            InstKind::If => "If",
            InstKind::Goto => "Goto",
            InstKind::Return => "Return",
            InstKind::ReturnVoid => "ReturnVoid",
        }
    }
}

/// One use of an instruction's value: `user.inputs[input_index] == used`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: InstId,
    pub input_index: usize,
}

/// An SSA instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) id: InstId,
    pub(crate) kind: InstKind,
    pub(crate) ty: DataType,
    pub(crate) block: BlockId,
    pub(crate) inputs: Vec<InstId>,
    pub(crate) uses: Vec<Use>,
}

impl Instruction {
    pub fn id(&self) -> InstId {
        self.id
    }

    pub fn kind(&self) -> &InstKind {
        &self.kind
    }

    pub fn ty(&self) -> DataType {
        self.ty
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn inputs(&self) -> &[InstId] {
        &self.inputs
    }

    pub fn input(&self, index: usize) -> Option<InstId> {
        self.inputs.get(index).copied()
    }

    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    /// Value of an `IntConstant`.
    pub fn as_int_constant(&self) -> Option<i32> {
        match self.kind {
            InstKind::IntConstant(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_int_constant(&self) -> bool {
        matches!(self.kind, InstKind::IntConstant(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self.kind,
            InstKind::IntConstant(_) | InstKind::LongConstant(_) | InstKind::NullConstant
        )
    }

    pub fn as_binary_op(&self) -> Option<BinaryOp> {
        match self.kind {
            InstKind::Binary(op) => Some(op),
            _ => None,
        }
    }

    pub fn is_allocation(&self) -> bool {
        matches!(self.kind, InstKind::NewInstance { .. } | InstKind::NewArray)
    }

    /// Resolved or unresolved field store, array store or vector store.
    pub fn is_heap_write(&self) -> bool {
        matches!(
            self.kind,
            InstKind::InstanceFieldSet(_)
                | InstKind::StaticFieldSet(_)
                | InstKind::UnresolvedInstanceFieldSet
                | InstKind::UnresolvedStaticFieldSet
                | InstKind::ArraySet { .. }
                | InstKind::VecStore { .. }
        )
    }

    /// The object a heap write stores into, if the write has one.
    ///
    /// Unresolved static stores have no holder operand.
    pub fn written_object(&self) -> Option<InstId> {
        match self.kind {
            InstKind::InstanceFieldSet(_)
            | InstKind::StaticFieldSet(_)
            | InstKind::UnresolvedInstanceFieldSet
            | InstKind::ArraySet { .. }
            | InstKind::VecStore { .. } => self.input(0),
            _ => None,
        }
    }

    /// The value a heap write stores.
    pub fn stored_value(&self) -> Option<InstId> {
        match self.kind {
            InstKind::InstanceFieldSet(_)
            | InstKind::StaticFieldSet(_)
            | InstKind::UnresolvedInstanceFieldSet => self.input(1),
            InstKind::UnresolvedStaticFieldSet => self.input(0),
            InstKind::ArraySet { .. } | InstKind::VecStore { .. } => self.input(2),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_signed_folds_unsigned_types() {
        assert_eq!(DataType::Uint8.to_signed(), DataType::Int8);
        assert_eq!(DataType::Bool.to_signed(), DataType::Int8);
        assert_eq!(DataType::Uint16.to_signed(), DataType::Int16);
        assert_eq!(DataType::Int32.to_signed(), DataType::Int32);
        assert_eq!(DataType::Reference.to_signed(), DataType::Reference);
    }

    #[test]
    fn test_commutativity() {
        assert!(BinaryOp::Add.is_commutative());
        assert!(!BinaryOp::Sub.is_commutative());
        assert!(!BinaryOp::Shl.is_commutative());
        assert!(BinaryOp::Sub.is_add_or_sub());
        assert!(!BinaryOp::Mul.is_add_or_sub());
    }

    #[test]
    fn test_arity_table() {
        assert_eq!(InstKind::ArrayGet.arity(), Some(2..=2));
        assert_eq!(
            InstKind::ArraySet {
                component_type: DataType::Int32
            }
            .arity(),
            Some(3..=3)
        );
        assert_eq!(InstKind::Phi.arity(), None);
        assert_eq!(
            InstKind::NewInstance {
                needs_checks: false,
                finalizable: false
            }
            .arity(),
            Some(0..=1)
        );
    }
}
