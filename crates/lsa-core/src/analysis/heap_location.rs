//! Heap location table.
//!
//! A heap location is a memory cell that loads and stores in the method can
//! name: a field of some reference, or an element (or vector of elements)
//! of some array. [`HeapLocationCollector`] walks a graph, assigns every
//! distinct location a dense index, and then records, for every pair of
//! locations, whether they may refer to the same memory.

use super::alias::can_array_elements_alias;
use super::execution_subgraph::ExecutionSubgraph;
use super::reference_info::{ReferenceInfo, ReferenceInfoId};
use crate::config::LoadStoreAnalysisType;
use crate::ir::{BlockId, DataType, FieldInfo, Graph, InstId, InstKind};
use crate::stats::{maybe_record_stat, CompilationStats, MethodCompilationStat};
use bitvec::vec::BitVec;
use id_arena::Arena;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

bitflags::bitflags! {
    /// Method-wide facts that decide whether the analysis is worth running.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeapEffects: u8 {
        const HEAP_STORES = 1 << 0;
        const VOLATILE = 1 << 1;
        const MONITOR_OPS = 1 << 2;
    }
}

/// What part of the referenced object a location names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapLocationKind {
    InstanceField {
        offset: usize,
        declaring_class_def_index: u16,
    },
    StaticField {
        offset: usize,
        declaring_class_def_index: u16,
    },
    /// `vector_length` consecutive elements starting at `index`.
    ArrayElement {
        index: InstId,
        vector_length: usize,
        is_vec_op: bool,
    },
    /// A field whose offset is not known at compile time.
    UnresolvedField,
}

impl HeapLocationKind {
    pub fn is_array(&self) -> bool {
        matches!(self, HeapLocationKind::ArrayElement { .. })
    }

    fn is_field(&self) -> bool {
        !self.is_array()
    }
}

impl fmt::Display for HeapLocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapLocationKind::InstanceField {
                offset,
                declaring_class_def_index,
            } => write!(f, "field +{offset} (class {declaring_class_def_index})"),
            HeapLocationKind::StaticField {
                offset,
                declaring_class_def_index,
            } => write!(f, "static +{offset} (class {declaring_class_def_index})"),
            HeapLocationKind::ArrayElement {
                index,
                vector_length,
                is_vec_op,
            } => {
                write!(f, "[#{}; {vector_length}]", index.index())?;
                if *is_vec_op {
                    write!(f, " vec")?;
                }
                Ok(())
            }
            HeapLocationKind::UnresolvedField => write!(f, "unresolved"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HeapLocationKey {
    reference_info: ReferenceInfoId,
    ty: DataType,
    kind: HeapLocationKind,
}

#[derive(Debug, Clone)]
pub struct HeapLocation {
    reference_info: ReferenceInfoId,
    ty: DataType,
    kind: HeapLocationKind,
    has_aliased_locations: bool,
}

impl HeapLocation {
    pub fn reference_info(&self) -> ReferenceInfoId {
        self.reference_info
    }

    /// Signed variant of the accessed type.
    pub fn ty(&self) -> DataType {
        self.ty
    }

    pub fn kind(&self) -> &HeapLocationKind {
        &self.kind
    }

    pub fn is_array(&self) -> bool {
        self.kind.is_array()
    }

    pub fn is_vec_op(&self) -> bool {
        matches!(self.kind, HeapLocationKind::ArrayElement { is_vec_op: true, .. })
    }

    /// Some other location may alias this one. Meaningful once the
    /// aliasing matrix has been built.
    pub fn has_aliased_locations(&self) -> bool {
        self.has_aliased_locations
    }
}

/// One line per location, e.g. `Int32 field +8 (class 0)`; aliased
/// locations are suffixed with `*`.
impl fmt::Display for HeapLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.ty, self.kind)?;
        if self.has_aliased_locations {
            write!(f, " *")?;
        }
        Ok(())
    }
}

/// Strict upper triangle of a symmetric boolean matrix.
///
/// Pair `(i, j)` with `i < j` lives at bit `n*i - (1+i)*i/2 + (j-i-1)`.
#[derive(Debug, Clone, Default)]
pub struct AliasingMatrix {
    size: usize,
    bits: BitVec,
}

impl AliasingMatrix {
    pub fn new(size: usize) -> Self {
        let pairs = size * size.saturating_sub(1) / 2;
        AliasingMatrix {
            size,
            bits: BitVec::repeat(false, pairs),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn position(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < j && j < self.size, "({i}, {j}) is not above the diagonal");
        self.size * i - (1 + i) * i / 2 + (j - i - 1)
    }

    pub fn set(&mut self, i: usize, j: usize) {
        let pos = self.position(i, j);
        self.bits.set(pos, true);
    }

    pub fn get(&self, i: usize, j: usize) -> bool {
        self.bits[self.position(i, j)]
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }
}

/// Builds the heap location table for one graph.
pub struct HeapLocationCollector<'g> {
    graph: &'g Graph,
    analysis_type: LoadStoreAnalysisType,
    reference_infos: Arena<ReferenceInfo>,
    reference_info_of: FxHashMap<InstId, ReferenceInfoId>,
    heap_locations: Vec<HeapLocation>,
    location_index: FxHashMap<HeapLocationKey, usize>,
    instruction_locations: FxHashMap<InstId, usize>,
    aliasing_matrix: AliasingMatrix,
    effects: HeapEffects,
}

impl<'g> HeapLocationCollector<'g> {
    /// Partial escapes cannot be tracked in graphs with very wide branches,
    /// so `analysis_type` drops to `Basic` for them.
    pub fn new(graph: &'g Graph, analysis_type: LoadStoreAnalysisType) -> Self {
        let analysis_type = if ExecutionSubgraph::can_analyse(graph) {
            analysis_type
        } else {
            LoadStoreAnalysisType::Basic
        };
        HeapLocationCollector {
            graph,
            analysis_type,
            reference_infos: Arena::new(),
            reference_info_of: FxHashMap::default(),
            heap_locations: Vec::new(),
            location_index: FxHashMap::default(),
            instruction_locations: FxHashMap::default(),
            aliasing_matrix: AliasingMatrix::default(),
            effects: HeapEffects::empty(),
        }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    pub fn analysis_type(&self) -> LoadStoreAnalysisType {
        self.analysis_type
    }

    /// Visit every block of the graph in reverse postorder.
    pub fn visit_graph(&mut self) {
        for block in self.graph.reverse_postorder() {
            self.visit_basic_block(block);
        }
    }

    pub fn visit_basic_block(&mut self, block: BlockId) {
        let graph = self.graph;
        let Some(block) = graph.block(block) else {
            return;
        };
        for &inst in &block.instructions {
            self.visit_instruction(inst);
        }
    }

    pub fn visit_instruction(&mut self, inst: InstId) {
        let graph = self.graph;
        let instruction = &graph[inst];
        match instruction.kind() {
            InstKind::InstanceFieldGet(field) | InstKind::StaticFieldGet(field) => {
                self.visit_field_access(inst, field);
            }
            InstKind::InstanceFieldSet(field) | InstKind::StaticFieldSet(field) => {
                self.visit_field_access(inst, field);
                self.effects |= HeapEffects::HEAP_STORES;
            }
            InstKind::ArrayGet => {
                self.visit_array_access(inst, instruction.ty(), 1, false);
            }
            InstKind::ArraySet { component_type } => {
                self.visit_array_access(inst, *component_type, 1, false);
                self.effects |= HeapEffects::HEAP_STORES;
            }
            InstKind::VecLoad {
                packed_type,
                vector_length,
            } => {
                self.visit_array_access(inst, *packed_type, *vector_length, true);
            }
            InstKind::VecStore {
                packed_type,
                vector_length,
            } => {
                self.visit_array_access(inst, *packed_type, *vector_length, true);
                self.effects |= HeapEffects::HEAP_STORES;
            }
            InstKind::UnresolvedInstanceFieldGet => {
                self.visit_unresolved_access(inst, instruction.ty());
            }
            InstKind::UnresolvedInstanceFieldSet => {
                let ty = instruction
                    .stored_value()
                    .map_or(DataType::Void, |value| graph[value].ty());
                self.visit_unresolved_access(inst, ty);
                self.effects |= HeapEffects::HEAP_STORES;
            }
            // No holder to attach a location to.
            InstKind::UnresolvedStaticFieldSet => {
                self.effects |= HeapEffects::HEAP_STORES;
            }
            InstKind::MonitorOperation(_) => {
                self.effects |= HeapEffects::MONITOR_OPS;
            }
            _ => {}
        }
        self.create_reference_info_for_reference_type(inst);
    }

    fn visit_field_access(&mut self, inst: InstId, field: &FieldInfo) {
        if field.is_volatile {
            self.effects |= HeapEffects::VOLATILE;
        }
        let Some(object) = self.graph[inst].input(0) else {
            return;
        };
        let kind = field_kind(self.graph[inst].kind(), field);
        let index = self.get_or_create_heap_location(object, field.field_type, kind);
        self.instruction_locations.insert(inst, index);
    }

    fn visit_array_access(
        &mut self,
        inst: InstId,
        ty: DataType,
        vector_length: usize,
        is_vec_op: bool,
    ) {
        let instruction = &self.graph[inst];
        let (Some(array), Some(index)) = (instruction.input(0), instruction.input(1)) else {
            return;
        };
        let kind = HeapLocationKind::ArrayElement {
            index,
            vector_length,
            is_vec_op,
        };
        let location = self.get_or_create_heap_location(array, ty, kind);
        self.instruction_locations.insert(inst, location);
    }

    fn visit_unresolved_access(&mut self, inst: InstId, ty: DataType) {
        let Some(object) = self.graph[inst].input(0) else {
            return;
        };
        let location = self.get_or_create_heap_location(object, ty, HeapLocationKind::UnresolvedField);
        self.instruction_locations.insert(inst, location);
    }

    /// Forwarding instructions share their input's reference info.
    fn create_reference_info_for_reference_type(&mut self, inst: InstId) {
        let instruction = &self.graph[inst];
        if !instruction.ty().is_reference() || is_forwarding(instruction.kind()) {
            return;
        }
        self.get_or_create_reference_info(inst);
    }

    fn get_or_create_reference_info(&mut self, reference: InstId) -> ReferenceInfoId {
        if let Some(&id) = self.reference_info_of.get(&reference) {
            return id;
        }
        let position = self.reference_infos.len();
        let info = ReferenceInfo::new(self.graph, reference, position, self.analysis_type);
        let id = self.reference_infos.alloc(info);
        self.reference_info_of.insert(reference, id);
        id
    }

    fn get_or_create_heap_location(
        &mut self,
        reference: InstId,
        ty: DataType,
        kind: HeapLocationKind,
    ) -> usize {
        let original = hunt_for_original_reference(self.graph, reference);
        let reference_info = self.get_or_create_reference_info(original);
        let key = HeapLocationKey {
            reference_info,
            ty: ty.to_signed(),
            kind,
        };
        if let Some(&index) = self.location_index.get(&key) {
            return index;
        }
        let index = self.heap_locations.len();
        self.heap_locations.push(HeapLocation {
            reference_info: key.reference_info,
            ty: key.ty,
            kind: key.kind,
            has_aliased_locations: false,
        });
        self.location_index.insert(key, index);
        index
    }

    pub fn number_of_heap_locations(&self) -> usize {
        self.heap_locations.len()
    }

    pub fn heap_location(&self, index: usize) -> Option<&HeapLocation> {
        self.heap_locations.get(index)
    }

    pub fn heap_locations(&self) -> &[HeapLocation] {
        &self.heap_locations
    }

    pub fn effects(&self) -> HeapEffects {
        self.effects
    }

    pub fn has_heap_stores(&self) -> bool {
        self.effects.contains(HeapEffects::HEAP_STORES)
    }

    pub fn has_volatile(&self) -> bool {
        self.effects.contains(HeapEffects::VOLATILE)
    }

    pub fn has_monitor_ops(&self) -> bool {
        self.effects.contains(HeapEffects::MONITOR_OPS)
    }

    pub fn reference_info(&self, id: ReferenceInfoId) -> &ReferenceInfo {
        &self.reference_infos[id]
    }

    pub fn reference_infos(&self) -> impl Iterator<Item = (ReferenceInfoId, &ReferenceInfo)> + '_ {
        self.reference_infos.iter()
    }

    pub fn find_reference_info_of(&self, reference: InstId) -> Option<&ReferenceInfo> {
        self.reference_info_of
            .get(&reference)
            .map(|&id| &self.reference_infos[id])
    }

    pub fn reference_info_id_of(&self, reference: InstId) -> Option<ReferenceInfoId> {
        self.reference_info_of.get(&reference).copied()
    }

    pub fn find_heap_location_index(
        &self,
        reference_info: ReferenceInfoId,
        ty: DataType,
        kind: HeapLocationKind,
    ) -> Option<usize> {
        let key = HeapLocationKey {
            reference_info,
            ty: ty.to_signed(),
            kind,
        };
        self.location_index.get(&key).copied()
    }

    /// Location of `field` in `object`, whether `field` is an instance or a
    /// static field.
    pub fn field_heap_location(&self, object: InstId, field: &FieldInfo) -> Option<usize> {
        let original = hunt_for_original_reference(self.graph, object);
        let &reference_info = self.reference_info_of.get(&original)?;
        let instance = HeapLocationKind::InstanceField {
            offset: field.offset,
            declaring_class_def_index: field.declaring_class_def_index,
        };
        let stat = HeapLocationKind::StaticField {
            offset: field.offset,
            declaring_class_def_index: field.declaring_class_def_index,
        };
        self.find_heap_location_index(reference_info, field.field_type, instance)
            .or_else(|| self.find_heap_location_index(reference_info, field.field_type, stat))
    }

    /// Location accessed by an array or vector load/store.
    pub fn array_heap_location(&self, access: InstId) -> Option<usize> {
        let instruction = &self.graph[access];
        let (ty, vector_length, is_vec_op) = match instruction.kind() {
            InstKind::ArrayGet => (instruction.ty(), 1, false),
            InstKind::ArraySet { component_type } => (*component_type, 1, false),
            InstKind::VecLoad {
                packed_type,
                vector_length,
            }
            | InstKind::VecStore {
                packed_type,
                vector_length,
            } => (*packed_type, *vector_length, true),
            _ => return None,
        };
        let array = hunt_for_original_reference(self.graph, instruction.input(0)?);
        let &reference_info = self.reference_info_of.get(&array)?;
        let kind = HeapLocationKind::ArrayElement {
            index: instruction.input(1)?,
            vector_length,
            is_vec_op,
        };
        self.find_heap_location_index(reference_info, ty, kind)
    }

    /// Location read or written by `inst`, if it is a heap access.
    pub fn heap_location_of(&self, inst: InstId) -> Option<usize> {
        self.instruction_locations.get(&inst).copied()
    }

    /// Number of references that escape only on some paths.
    pub fn count_partial_singletons(&self) -> usize {
        self.reference_infos
            .iter()
            .filter(|(_, info)| info.is_partial_singleton())
            .count()
    }

    fn can_references_alias(&self, id1: ReferenceInfoId, id2: ReferenceInfoId) -> bool {
        if id1 == id2 {
            return true;
        }
        let (info1, info2) = (&self.reference_infos[id1], &self.reference_infos[id2]);
        if info1.is_singleton() || info2.is_singleton() {
            return false;
        }
        self.may_alias_with_preexistence_checking(info1, info2)
            && self.may_alias_with_preexistence_checking(info2, info1)
    }

    /// Anything that aliases an allocation is defined after it, so it comes
    /// later in reverse postorder.
    fn may_alias_with_preexistence_checking(
        &self,
        info1: &ReferenceInfo,
        info2: &ReferenceInfo,
    ) -> bool {
        if self.graph[info1.reference()].is_allocation() {
            return info2.position() >= info1.position();
        }
        true
    }

    fn compute_may_alias(&self, i: usize, j: usize) -> bool {
        let (loc1, loc2) = (&self.heap_locations[i], &self.heap_locations[j]);
        let same_slot = match (&loc1.kind, &loc2.kind) {
            (HeapLocationKind::UnresolvedField, other) | (other, HeapLocationKind::UnresolvedField) => {
                other.is_field()
            }
            (a, b) if a.is_field() && b.is_field() => a == b,
            (a, b) => a.is_array() && b.is_array(),
        };
        if !same_slot || !self.can_references_alias(loc1.reference_info, loc2.reference_info) {
            return false;
        }
        if let (
            HeapLocationKind::ArrayElement {
                index: index1,
                vector_length: vector_length1,
                ..
            },
            HeapLocationKind::ArrayElement {
                index: index2,
                vector_length: vector_length2,
                ..
            },
        ) = (loc1.kind, loc2.kind)
        {
            return can_array_elements_alias(
                self.graph,
                index1,
                vector_length1,
                index2,
                vector_length2,
            );
        }
        true
    }

    /// Fill the aliasing matrix and mark every location that aliases some
    /// other one.
    pub fn build_aliasing_matrix(&mut self) {
        let n = self.heap_locations.len();
        self.aliasing_matrix = AliasingMatrix::new(n);
        for i in 0..n {
            for j in (i + 1)..n {
                if self.compute_may_alias(i, j) {
                    self.aliasing_matrix.set(i, j);
                    self.heap_locations[i].has_aliased_locations = true;
                    self.heap_locations[j].has_aliased_locations = true;
                }
            }
        }
        tracing::trace!(
            locations = n,
            aliased_pairs = self.aliasing_matrix.count_ones(),
            "built aliasing matrix"
        );
    }

    pub fn aliasing_matrix(&self) -> &AliasingMatrix {
        &self.aliasing_matrix
    }

    /// Locations `i` and `j` may refer to the same memory.
    pub fn may_alias(&self, i: usize, j: usize) -> bool {
        match i.cmp(&j) {
            std::cmp::Ordering::Less => self.aliasing_matrix.get(i, j),
            std::cmp::Ordering::Greater => self.aliasing_matrix.get(j, i),
            std::cmp::Ordering::Equal => {
                debug_assert!(false, "may_alias expects two different locations");
                true
            }
        }
    }

    /// Count the allocations that load/store elimination could remove
    /// entirely or partially. Each reference is counted at most once.
    pub fn dump_reference_stats(&self, stats: Option<&CompilationStats>) {
        let Some(stats) = stats else {
            return;
        };
        let mut seen: FxHashSet<ReferenceInfoId> = FxHashSet::default();
        for location in &self.heap_locations {
            if !seen.insert(location.reference_info) {
                continue;
            }
            let info = &self.reference_infos[location.reference_info];
            let reference = info.reference();
            let eligible = instruction_eligible_for_lse_removal(self.graph, reference);
            if info.is_singleton_and_removable() && eligible {
                maybe_record_stat(Some(stats), MethodCompilationStat::FullLsePossible);
            }
            let subgraph = info.no_escape_subgraph();
            if info.is_partial_singleton()
                && matches!(self.graph[reference].kind(), InstKind::NewInstance { .. })
                && subgraph.contains_block(self.graph[reference].block())
                && !subgraph.excluded_cohorts().is_empty()
                && eligible
            {
                maybe_record_stat(Some(stats), MethodCompilationStat::PartialLsePossible);
            }
        }
    }

    /// Drop everything collected so far.
    pub fn clean_up(&mut self) {
        self.reference_infos = Arena::new();
        self.reference_info_of.clear();
        self.heap_locations.clear();
        self.location_index.clear();
        self.instruction_locations.clear();
        self.aliasing_matrix = AliasingMatrix::default();
        self.effects = HeapEffects::empty();
    }
}

fn field_kind(kind: &InstKind, field: &FieldInfo) -> HeapLocationKind {
    match kind {
        InstKind::StaticFieldGet(_) | InstKind::StaticFieldSet(_) => HeapLocationKind::StaticField {
            offset: field.offset,
            declaring_class_def_index: field.declaring_class_def_index,
        },
        _ => HeapLocationKind::InstanceField {
            offset: field.offset,
            declaring_class_def_index: field.declaring_class_def_index,
        },
    }
}

fn is_forwarding(kind: &InstKind) -> bool {
    matches!(
        kind,
        InstKind::NullCheck | InstKind::BoundType | InstKind::IntermediateAddress
    )
}

/// Skip null checks, type bounds and address computations to find the
/// instruction that produced `reference`.
pub fn hunt_for_original_reference(graph: &Graph, mut reference: InstId) -> InstId {
    while is_forwarding(graph[reference].kind()) {
        match graph[reference].input(0) {
            Some(input) => reference = input,
            None => break,
        }
    }
    reference
}

/// Could load/store elimination remove `inst` altogether?
///
/// New instances qualify unless the allocation still runs checks. New
/// arrays qualify when their length is a known non-negative constant and
/// every element access uses a constant index.
pub fn instruction_eligible_for_lse_removal(graph: &Graph, inst: InstId) -> bool {
    let instruction = &graph[inst];
    match instruction.kind() {
        InstKind::NewInstance { needs_checks, .. } => !needs_checks,
        InstKind::NewArray => {
            let known_length = instruction
                .input(0)
                .and_then(|length| graph[length].as_int_constant())
                .is_some_and(|length| length >= 0);
            known_length
                && instruction.uses().iter().all(|use_| {
                    let user = &graph[use_.user];
                    match user.kind() {
                        InstKind::ArrayGet | InstKind::ArraySet { .. } => user
                            .input(1)
                            .is_some_and(|index| graph[index].is_int_constant()),
                        _ => true,
                    }
                })
        }
        _ => false,
    }
}
