//! Graph fixtures.

use lsa_core::analysis::ExecutionSubgraph;
use lsa_core::ir::{BinaryOp, BlockId, DataType, FieldInfo, Graph, InstId, InstKind};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// A graph whose blocks are created and looked up by name.
///
/// The entry block keeps [`BlockId::ENTRY`]; every other block is created in
/// the order its name first appears in the edge list.
///
/// # Example
///
/// ```
/// use lsa_test_helpers::AdjacencyListGraph;
///
/// let alg = AdjacencyListGraph::new(
///     "entry",
///     "exit",
///     &[("entry", "left"), ("entry", "right"), ("left", "exit"), ("right", "exit")],
/// );
/// assert_eq!(alg.graph().block_count(), 4);
/// assert_eq!(alg.name_of(alg.get("left")), "left");
/// ```
pub struct AdjacencyListGraph {
    graph: Graph,
    blocks: FxHashMap<String, BlockId>,
    names: Vec<String>,
}

impl AdjacencyListGraph {
    pub fn new(entry: &str, exit: &str, edges: &[(&str, &str)]) -> Self {
        let mut alg = AdjacencyListGraph {
            graph: Graph::new(),
            blocks: FxHashMap::default(),
            names: Vec::new(),
        };
        alg.blocks.insert(entry.to_string(), BlockId::ENTRY);
        alg.names.push(entry.to_string());

        for &(from, to) in edges {
            let from = alg.block_or_create(from);
            let to = alg.block_or_create(to);
            alg.graph
                .add_edge(from, to)
                .expect("adjacency list contains a duplicate edge");
        }
        let exit = alg.block_or_create(exit);
        alg.graph
            .set_exit_block(exit)
            .expect("exit block is set once");
        alg
    }

    fn block_or_create(&mut self, name: &str) -> BlockId {
        if let Some(&block) = self.blocks.get(name) {
            return block;
        }
        let block = self.graph.add_block();
        self.blocks.insert(name.to_string(), block);
        self.names.push(name.to_string());
        block
    }

    /// The block called `name`. Panics on unknown names.
    pub fn get(&self, name: &str) -> BlockId {
        *self
            .blocks
            .get(name)
            .unwrap_or_else(|| panic!("no block named {name:?}"))
    }

    pub fn name_of(&self, block: BlockId) -> &str {
        &self.names[block.index()]
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    pub fn names<I>(&self, blocks: I) -> FxHashSet<String>
    where
        I: IntoIterator<Item = BlockId>,
    {
        blocks
            .into_iter()
            .map(|block| self.name_of(block).to_string())
            .collect()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// Append an instruction to the block called `block`.
    pub fn add(&mut self, block: &str, kind: InstKind, ty: DataType, inputs: &[InstId]) -> InstId {
        let block = self.get(block);
        self.graph
            .add_instruction(block, kind, ty, inputs)
            .unwrap_or_else(|err| panic!("invalid instruction: {err}"))
    }

    pub fn int_constant(&mut self, value: i32) -> InstId {
        self.graph.int_constant(value)
    }

    pub fn parameter(&mut self, index: u32, ty: DataType) -> InstId {
        let entry = self.name_of(BlockId::ENTRY).to_string();
        self.add(&entry, InstKind::Parameter { index }, ty, &[])
    }

    pub fn new_instance(&mut self, block: &str) -> InstId {
        self.add(
            block,
            InstKind::NewInstance {
                needs_checks: false,
                finalizable: false,
            },
            DataType::Reference,
            &[],
        )
    }

    pub fn new_array(&mut self, block: &str, length: InstId) -> InstId {
        self.add(block, InstKind::NewArray, DataType::Reference, &[length])
    }

    pub fn binary(&mut self, block: &str, op: BinaryOp, left: InstId, right: InstId) -> InstId {
        self.add(block, InstKind::Binary(op), DataType::Int32, &[left, right])
    }

    pub fn field_get(&mut self, block: &str, object: InstId, field: FieldInfo) -> InstId {
        self.add(block, InstKind::InstanceFieldGet(field), field.field_type, &[object])
    }

    pub fn field_set(
        &mut self,
        block: &str,
        object: InstId,
        field: FieldInfo,
        value: InstId,
    ) -> InstId {
        self.add(
            block,
            InstKind::InstanceFieldSet(field),
            DataType::Void,
            &[object, value],
        )
    }

    pub fn array_get(&mut self, block: &str, array: InstId, index: InstId, ty: DataType) -> InstId {
        self.add(block, InstKind::ArrayGet, ty, &[array, index])
    }

    pub fn array_set(
        &mut self,
        block: &str,
        array: InstId,
        index: InstId,
        value: InstId,
        component_type: DataType,
    ) -> InstId {
        self.add(
            block,
            InstKind::ArraySet { component_type },
            DataType::Void,
            &[array, index, value],
        )
    }

    pub fn vec_load(
        &mut self,
        block: &str,
        array: InstId,
        index: InstId,
        packed_type: DataType,
        vector_length: usize,
    ) -> InstId {
        self.add(
            block,
            InstKind::VecLoad {
                packed_type,
                vector_length,
            },
            packed_type,
            &[array, index],
        )
    }

    pub fn vec_store(
        &mut self,
        block: &str,
        array: InstId,
        index: InstId,
        value: InstId,
        packed_type: DataType,
        vector_length: usize,
    ) -> InstId {
        self.add(
            block,
            InstKind::VecStore {
                packed_type,
                vector_length,
            },
            DataType::Void,
            &[array, index, value],
        )
    }

    pub fn invoke(&mut self, block: &str, args: &[InstId]) -> InstId {
        self.add(block, InstKind::Invoke, DataType::Void, args)
    }

    pub fn return_value(&mut self, block: &str, value: InstId) -> InstId {
        self.add(block, InstKind::Return, DataType::Void, &[value])
    }
}

/// Every path through `esg` starting at the entry reaches the exit without
/// leaving the subgraph.
pub fn is_valid_subgraph(graph: &Graph, esg: &ExecutionSubgraph) -> bool {
    let mut reached_end = false;
    let mut visited: FxHashSet<BlockId> = FxHashSet::default();
    let mut worklist = VecDeque::from([graph.entry_block()]);
    while let Some(cur) = worklist.pop_front() {
        if !visited.insert(cur) {
            continue;
        }
        if Some(cur) == graph.exit_block() {
            reached_end = true;
            continue;
        }
        let mut has_succ = false;
        for &succ in graph.succs(cur) {
            if esg.contains_block(succ) {
                has_succ = true;
                worklist.push_back(succ);
            }
        }
        if !has_succ {
            return false;
        }
    }
    reached_end
}
