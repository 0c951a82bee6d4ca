//! Control flow graph of typed SSA instructions.
//!
//! Design: blocks live in a `Vec` indexed by [`BlockId`] and instructions in
//! an `id_arena::Arena` indexed by [`InstId`]. Everything that refers to
//! another node stores an index, never a reference, so the graph has a single
//! owner and analyses can borrow it immutably for their whole lifetime.
//!
//! Dominance, reachability and loop information are derived lazily and
//! cached; any change to the block structure drops the caches.

use super::dominance::DominatorTree;
use super::instruction::{DataType, InstId, InstKind, Instruction, Use};
use crate::error::{GraphError, Result};
use bitvec::vec::BitVec;
use id_arena::Arena;
use once_cell::unsync::OnceCell;
use rustc_hash::{FxHashMap, FxHashSet};

/// Unique identifier for a basic block within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// The entry block, created together with the graph.
    pub const ENTRY: BlockId = BlockId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A basic block.
///
/// The order of `successors` is significant: the execution subgraph tracks
/// allowed edges by successor position.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    /// Instructions in program order.
    pub instructions: Vec<InstId>,
}

impl BasicBlock {
    fn new(id: BlockId) -> Self {
        BasicBlock {
            id,
            predecessors: Vec::new(),
            successors: Vec::new(),
            instructions: Vec::new(),
        }
    }
}

/// Loop headers discovered by a depth-first walk from the entry block.
#[derive(Debug, Default)]
struct LoopInfo {
    headers: FxHashSet<BlockId>,
    /// Headers of loops that can be entered other than through the header.
    irreducible_headers: FxHashSet<BlockId>,
}

/// The control flow graph of one compilation unit.
#[derive(Debug)]
pub struct Graph {
    blocks: Vec<BasicBlock>,
    instructions: Arena<Instruction>,
    exit: Option<BlockId>,
    int_constants: FxHashMap<i32, InstId>,
    null_constant: Option<InstId>,
    dominators: OnceCell<DominatorTree>,
    /// `reachability[a][b]` is set iff there is a non-empty path from `a` to `b`.
    reachability: OnceCell<Vec<BitVec>>,
    loops: OnceCell<LoopInfo>,
}

impl Graph {
    /// Create a graph containing only the entry block.
    pub fn new() -> Self {
        Graph {
            blocks: vec![BasicBlock::new(BlockId::ENTRY)],
            instructions: Arena::new(),
            exit: None,
            int_constants: FxHashMap::default(),
            null_constant: None,
            dominators: OnceCell::new(),
            reachability: OnceCell::new(),
            loops: OnceCell::new(),
        }
    }

    pub fn entry_block(&self) -> BlockId {
        BlockId::ENTRY
    }

    /// The exit block, absent for graphs that never terminate.
    pub fn exit_block(&self) -> Option<BlockId> {
        self.exit
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index())
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn preds(&self, id: BlockId) -> &[BlockId] {
        self.block(id)
            .map(|b| b.predecessors.as_slice())
            .unwrap_or(&[])
    }

    pub fn succs(&self, id: BlockId) -> &[BlockId] {
        self.block(id)
            .map(|b| b.successors.as_slice())
            .unwrap_or(&[])
    }

    pub fn instruction(&self, id: InstId) -> Option<&Instruction> {
        self.instructions.get(id)
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id));
        self.invalidate_cfg_caches();
        id
    }

    /// Add the edge `from -> to`, appending `to` to `from`'s successors.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        self.check_block(from)?;
        self.check_block(to)?;
        if self.blocks[from.index()].successors.contains(&to) {
            return Err(GraphError::DuplicateEdge { from, to });
        }
        self.blocks[from.index()].successors.push(to);
        self.blocks[to.index()].predecessors.push(from);
        self.invalidate_cfg_caches();
        Ok(())
    }

    pub fn set_exit_block(&mut self, exit: BlockId) -> Result<()> {
        self.check_block(exit)?;
        if let Some(current) = self.exit {
            return Err(GraphError::ExitAlreadySet(current));
        }
        self.exit = Some(exit);
        self.invalidate_cfg_caches();
        Ok(())
    }

    /// Append an instruction to `block` and register it as a user of each input.
    pub fn add_instruction(
        &mut self,
        block: BlockId,
        kind: InstKind,
        ty: DataType,
        inputs: &[InstId],
    ) -> Result<InstId> {
        self.check_block(block)?;
        if let Some(arity) = kind.arity() {
            if !arity.contains(&inputs.len()) {
                let expected = if arity.start() == arity.end() {
                    arity.start().to_string()
                } else {
                    format!("{}..={}", arity.start(), arity.end())
                };
                return Err(GraphError::WrongInputCount {
                    kind: kind.name(),
                    expected,
                    found: inputs.len(),
                });
            }
        }
        if let InstKind::VecLoad { vector_length, .. } | InstKind::VecStore { vector_length, .. } = &kind {
            if *vector_length == 0 {
                return Err(GraphError::ZeroVectorLength { kind: kind.name() });
            }
        }
        for &input in inputs {
            if self.instructions.get(input).is_none() {
                return Err(GraphError::UnknownInstruction(input.index()));
            }
        }
        Ok(self.push_instruction(block, kind, ty, inputs))
    }

    /// The `IntConstant` for `value`, created in the entry block on first use.
    pub fn int_constant(&mut self, value: i32) -> InstId {
        if let Some(&id) = self.int_constants.get(&value) {
            return id;
        }
        let id = self.push_instruction(
            BlockId::ENTRY,
            InstKind::IntConstant(value),
            DataType::Int32,
            &[],
        );
        self.int_constants.insert(value, id);
        id
    }

    pub fn null_constant(&mut self) -> InstId {
        if let Some(id) = self.null_constant {
            return id;
        }
        let id = self.push_instruction(
            BlockId::ENTRY,
            InstKind::NullConstant,
            DataType::Reference,
            &[],
        );
        self.null_constant = Some(id);
        id
    }

    fn push_instruction(
        &mut self,
        block: BlockId,
        kind: InstKind,
        ty: DataType,
        inputs: &[InstId],
    ) -> InstId {
        let id = self.instructions.alloc_with_id(|id| Instruction {
            id,
            kind,
            ty,
            block,
            inputs: inputs.to_vec(),
            uses: Vec::new(),
        });
        for (input_index, &input) in inputs.iter().enumerate() {
            self.instructions[input].uses.push(Use {
                user: id,
                input_index,
            });
        }
        self.blocks[block.index()].instructions.push(id);
        id
    }

    fn check_block(&self, id: BlockId) -> Result<()> {
        if id.index() < self.blocks.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownBlock(id))
        }
    }

    fn invalidate_cfg_caches(&mut self) {
        self.dominators = OnceCell::new();
        self.reachability = OnceCell::new();
        self.loops = OnceCell::new();
    }

    /// Returns blocks reachable from the entry in reverse postorder.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::with_capacity(self.blocks.len());
        // (block, next successor position)
        let mut stack: Vec<(BlockId, usize)> = vec![(BlockId::ENTRY, 0)];
        visited[BlockId::ENTRY.index()] = true;
        while let Some(top) = stack.last_mut() {
            let (block, next) = *top;
            let succs = self.succs(block);
            if next >= succs.len() {
                postorder.push(block);
                stack.pop();
                continue;
            }
            top.1 += 1;
            let succ = succs[next];
            if !visited[succ.index()] {
                visited[succ.index()] = true;
                stack.push((succ, 0));
            }
        }
        postorder.reverse();
        postorder
    }

    pub fn dominator_tree(&self) -> &DominatorTree {
        self.dominators.get_or_init(|| DominatorTree::build(self))
    }

    /// Returns true if block `a` dominates block `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dominator_tree().dominates(a, b)
    }

    /// Returns true if there is a path of at least one edge from `from` to `to`.
    ///
    /// A block only reaches itself when it sits on a cycle.
    pub fn path_between(&self, from: BlockId, to: BlockId) -> bool {
        let reachability = self
            .reachability
            .get_or_init(|| self.compute_reachability());
        reachability
            .get(from.index())
            .and_then(|row| row.get(to.index()).map(|bit| *bit))
            .unwrap_or(false)
    }

    fn compute_reachability(&self) -> Vec<BitVec> {
        let n = self.blocks.len();
        let mut rows = Vec::with_capacity(n);
        for block in &self.blocks {
            let mut row: BitVec = BitVec::repeat(false, n);
            let mut worklist: Vec<BlockId> = block.successors.clone();
            while let Some(cur) = worklist.pop() {
                if row[cur.index()] {
                    continue;
                }
                row.set(cur.index(), true);
                worklist.extend(self.succs(cur).iter().copied());
            }
            rows.push(row);
        }
        rows
    }

    pub fn is_loop_header(&self, block: BlockId) -> bool {
        self.loop_info().headers.contains(&block)
    }

    pub fn is_irreducible_loop_header(&self, block: BlockId) -> bool {
        self.loop_info().irreducible_headers.contains(&block)
    }

    fn loop_info(&self) -> &LoopInfo {
        self.loops.get_or_init(|| self.compute_loop_info())
    }

    /// A back edge `latch -> header` closes a natural loop when the header
    /// dominates the latch; otherwise the loop is irreducible.
    fn compute_loop_info(&self) -> LoopInfo {
        let mut info = LoopInfo::default();
        let n = self.blocks.len();
        let mut visited = vec![false; n];
        let mut on_stack = vec![false; n];
        // (block, next successor position)
        let mut stack: Vec<(BlockId, usize)> = vec![(BlockId::ENTRY, 0)];
        visited[BlockId::ENTRY.index()] = true;
        on_stack[BlockId::ENTRY.index()] = true;
        while let Some(top) = stack.last_mut() {
            let (block, next) = *top;
            let succs = self.succs(block);
            if next >= succs.len() {
                on_stack[block.index()] = false;
                stack.pop();
                continue;
            }
            top.1 += 1;
            let succ = succs[next];
            if on_stack[succ.index()] {
                info.headers.insert(succ);
                if !self.dominates(succ, block) {
                    info.irreducible_headers.insert(succ);
                }
            } else if !visited[succ.index()] {
                visited[succ.index()] = true;
                on_stack[succ.index()] = true;
                stack.push((succ, 0));
            }
        }
        info
    }

    /// Largest number of successors of any block.
    pub fn max_successor_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.successors.len())
            .max()
            .unwrap_or(0)
    }

    /// For a binary operation, the constant operand: the right input if it is
    /// constant, else the left input when the operation is commutative.
    pub fn constant_right(&self, binary: InstId) -> Option<InstId> {
        let inst = &self[binary];
        let op = inst.as_binary_op()?;
        let (left, right) = (inst.input(0)?, inst.input(1)?);
        if self[right].is_constant() {
            Some(right)
        } else if op.is_commutative() && self[left].is_constant() {
            Some(left)
        } else {
            None
        }
    }

    /// For a binary operation with a constant operand, the other operand.
    pub fn least_constant_left(&self, binary: InstId) -> Option<InstId> {
        let constant = self.constant_right(binary)?;
        let inst = &self[binary];
        let (left, right) = (inst.input(0)?, inst.input(1)?);
        if constant == left {
            Some(right)
        } else {
            Some(left)
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Index<InstId> for Graph {
    type Output = Instruction;

    fn index(&self, id: InstId) -> &Instruction {
        &self.instructions[id]
    }
}
