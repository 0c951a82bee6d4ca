//! Array index alias oracle.
//!
//! Decides whether two array accesses, each starting at an index instruction
//! and covering `vector_length` consecutive elements, can touch the same
//! element. Only shapes that can be proven disjoint answer `NoAlias`; every
//! other shape, including ones this module does not understand, answers
//! `MayAlias`.
//!
//! Handled shapes:
//! - identical index instructions;
//! - two integer constants;
//! - `i + C` against `i`, and `i + C1` against `i + C2`, where the constant is
//!   an `IntConstant` operand of an `Add` or `Sub`.

use crate::ir::{BinaryOp, Graph, InstId};

/// Result of querying whether two memory accesses may alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    /// Definitely do not alias (disjoint element ranges).
    NoAlias,
    /// May possibly alias (conservative approximation).
    MayAlias,
    /// Definitely cover the same elements.
    MustAlias,
}

impl AliasResult {
    /// Collapse to the boolean the heap location table stores.
    pub fn may_alias(self) -> bool {
        self != AliasResult::NoAlias
    }

    fn from_overlap(overlaps: bool) -> Self {
        if overlaps {
            AliasResult::MayAlias
        } else {
            AliasResult::NoAlias
        }
    }
}

/// Closed integer ranges `[l1, h1]` and `[l2, h2]` share at least one value.
pub fn can_integer_ranges_overlap(l1: i64, h1: i64, l2: i64, h2: i64) -> bool {
    l1.max(l2) <= h1.min(h2)
}

/// Last element covered by an access of `vector_length` elements at `start`.
fn range_end(start: i64, vector_length: usize) -> i64 {
    start + (vector_length as i64 - 1)
}

/// Two accesses start `distance` elements apart; may their ranges overlap?
///
/// Both start indices are computed in 32 bits, so only `distance` modulo
/// 2^32 is known. In-bounds indices are non-negative `i32` values, so the
/// real distance is the wrapped one.
fn can_distant_ranges_overlap(distance: i64, vector_length1: usize, vector_length2: usize) -> bool {
    let distance = i64::from(distance as i32);
    can_integer_ranges_overlap(
        distance,
        range_end(distance, vector_length1),
        0,
        range_end(0, vector_length2),
    )
}

/// Signed offset an `Add`/`Sub` with an `IntConstant` operand applies to its
/// other operand.
///
/// `i - C` is `i + (-C)` in 32-bit arithmetic, so `i - i32::MIN` and
/// `i + i32::MIN` compute the same index.
fn index_offset(graph: &Graph, binary: InstId) -> Option<i64> {
    let op = graph[binary].as_binary_op()?;
    if !op.is_add_or_sub() {
        return None;
    }
    let constant = graph[graph.constant_right(binary)?].as_int_constant()?;
    Some(match op {
        BinaryOp::Sub => i64::from(constant.wrapping_neg()),
        _ => i64::from(constant),
    })
}

/// `binary` is `base + C` (or `base - C`); may it alias `index`?
///
/// Disjointness is only provable when `index` is `base` itself.
pub fn can_binary_op_and_index_alias(
    graph: &Graph,
    binary: InstId,
    vector_length1: usize,
    index: InstId,
    vector_length2: usize,
) -> bool {
    let Some(offset) = index_offset(graph, binary) else {
        return true;
    };
    if graph.least_constant_left(binary) != Some(index) {
        return true;
    }
    can_distant_ranges_overlap(offset, vector_length1, vector_length2)
}

/// Both indices are `base + C`; may they alias?
///
/// Disjointness is only provable when both share the same `base`.
pub fn can_binary_ops_alias(
    graph: &Graph,
    binary1: InstId,
    vector_length1: usize,
    binary2: InstId,
    vector_length2: usize,
) -> bool {
    let (Some(offset1), Some(offset2)) = (index_offset(graph, binary1), index_offset(graph, binary2))
    else {
        return true;
    };
    if graph.least_constant_left(binary1) != graph.least_constant_left(binary2) {
        return true;
    }
    can_distant_ranges_overlap(offset1 - offset2, vector_length1, vector_length2)
}

/// Classify two array accesses by their index instructions.
pub fn array_index_alias(
    graph: &Graph,
    index1: InstId,
    vector_length1: usize,
    index2: InstId,
    vector_length2: usize,
) -> AliasResult {
    debug_assert!(vector_length1 >= 1 && vector_length2 >= 1);

    if index1 == index2 {
        return if vector_length1 == vector_length2 {
            AliasResult::MustAlias
        } else {
            AliasResult::MayAlias
        };
    }

    let (inst1, inst2) = (&graph[index1], &graph[index2]);

    if let (Some(c1), Some(c2)) = (inst1.as_int_constant(), inst2.as_int_constant()) {
        let (l1, l2) = (i64::from(c1), i64::from(c2));
        return AliasResult::from_overlap(can_integer_ranges_overlap(
            l1,
            range_end(l1, vector_length1),
            l2,
            range_end(l2, vector_length2),
        ));
    }

    let binary1 = inst1.as_binary_op().is_some();
    let binary2 = inst2.as_binary_op().is_some();

    if binary1
        && !can_binary_op_and_index_alias(graph, index1, vector_length1, index2, vector_length2)
    {
        return AliasResult::NoAlias;
    }
    if binary2
        && !can_binary_op_and_index_alias(graph, index2, vector_length2, index1, vector_length1)
    {
        return AliasResult::NoAlias;
    }
    if binary1
        && binary2
        && !can_binary_ops_alias(graph, index1, vector_length1, index2, vector_length2)
    {
        return AliasResult::NoAlias;
    }

    AliasResult::MayAlias
}

/// May-alias answer for two array accesses. Never a false negative.
pub fn can_array_elements_alias(
    graph: &Graph,
    index1: InstId,
    vector_length1: usize,
    index2: InstId,
    vector_length2: usize,
) -> bool {
    array_index_alias(graph, index1, vector_length1, index2, vector_length2).may_alias()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, DataType, InstKind};

    struct Fixture {
        graph: Graph,
        i: InstId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut graph = Graph::new();
            let i = graph
                .add_instruction(
                    BlockId::ENTRY,
                    InstKind::Parameter { index: 0 },
                    DataType::Int32,
                    &[],
                )
                .unwrap();
            Fixture { graph, i }
        }

        fn c(&mut self, value: i32) -> InstId {
            self.graph.int_constant(value)
        }

        fn binary(&mut self, op: BinaryOp, left: InstId, right: InstId) -> InstId {
            self.graph
                .add_instruction(
                    BlockId::ENTRY,
                    InstKind::Binary(op),
                    DataType::Int32,
                    &[left, right],
                )
                .unwrap()
        }

        fn add(&mut self, constant: i32) -> InstId {
            let (i, c) = (self.i, self.c(constant));
            self.binary(BinaryOp::Add, i, c)
        }

        fn sub(&mut self, constant: i32) -> InstId {
            let (i, c) = (self.i, self.c(constant));
            self.binary(BinaryOp::Sub, i, c)
        }

        fn alias(&self, a: InstId, la: usize, b: InstId, lb: usize) -> bool {
            can_array_elements_alias(&self.graph, a, la, b, lb)
        }
    }

    #[test]
    fn test_integer_range_boundaries() {
        assert!(!can_integer_ranges_overlap(0, 3, 4, 7), "adjacent ranges are disjoint");
        assert!(can_integer_ranges_overlap(0, 4, 4, 7), "ranges sharing 4 overlap");
        assert!(can_integer_ranges_overlap(2, 2, 2, 2), "identical ranges overlap");
        assert!(can_integer_ranges_overlap(i64::MIN, i64::MAX, 0, 0));
    }

    #[test]
    fn test_identity_aliases_regardless_of_length() {
        let f = Fixture::new();
        assert!(f.alias(f.i, 1, f.i, 1));
        assert!(f.alias(f.i, 4, f.i, 1));
        assert_eq!(
            array_index_alias(&f.graph, f.i, 4, f.i, 4),
            AliasResult::MustAlias
        );
    }

    #[test]
    fn test_constant_vector_ranges() {
        let mut f = Fixture::new();
        let (c0, c3, c4) = (f.c(0), f.c(3), f.c(4));
        assert!(!f.alias(c0, 4, c4, 4), "[0,3] and [4,7] are disjoint");
        assert!(f.alias(c0, 4, c3, 4), "[0,3] and [3,6] overlap at 3");
        assert!(!f.alias(c0, 1, c3, 1));
    }

    #[test]
    fn test_constant_ranges_do_not_overflow() {
        let mut f = Fixture::new();
        let max = f.c(i32::MAX);
        let min = f.c(i32::MIN);
        assert!(!f.alias(max, 4, min, 4), "64-bit ends keep MAX+3 above MIN+3");
    }

    #[test]
    fn test_affine_against_base() {
        let mut f = Fixture::new();
        let i_plus_8 = f.add(8);
        let i_plus_3 = f.add(3);
        let i = f.i;
        assert!(!f.alias(i_plus_8, 1, i, 1), "[8,8] vs [0,0]");
        assert!(f.alias(i_plus_3, 4, i, 4), "[3,6] vs [0,3] overlap at 3");
        assert!(!f.alias(i, 1, i_plus_8, 1), "argument order does not matter");
    }

    #[test]
    fn test_affine_pairs() {
        let mut f = Fixture::new();
        let i_plus_1 = f.add(1);
        let i_minus_1 = f.sub(1);
        let i_minus_neg_1 = f.sub(-1);
        assert!(!f.alias(i_plus_1, 1, i_minus_1, 1));
        assert!(f.alias(i_plus_1, 1, i_minus_neg_1, 1), "i - (-1) is i + 1");
    }

    #[test]
    fn test_reversed_sub_is_not_affine() {
        let mut f = Fixture::new();
        let i_plus_1 = f.add(1);
        let (c1, i) = (f.c(1), f.i);
        let one_minus_i = f.binary(BinaryOp::Sub, c1, i);
        assert!(f.alias(i_plus_1, 1, one_minus_i, 1), "1 - i is not of the form i + C");
    }

    #[test]
    fn test_commuted_add_is_affine() {
        let mut f = Fixture::new();
        let (c5, i) = (f.c(5), f.i);
        let five_plus_i = f.binary(BinaryOp::Add, c5, i);
        assert!(!f.alias(five_plus_i, 1, i, 1));
    }

    #[test]
    fn test_other_operators_may_alias() {
        let mut f = Fixture::new();
        let (c2, i) = (f.c(2), f.i);
        let twice = f.binary(BinaryOp::Mul, i, c2);
        assert!(f.alias(twice, 1, i, 1), "multiplication is not understood");
        let shifted = f.binary(BinaryOp::Shl, i, c2);
        assert!(f.alias(shifted, 1, twice, 1));
    }

    #[test]
    fn test_different_bases_may_alias() {
        let mut f = Fixture::new();
        let j = f
            .graph
            .add_instruction(
                BlockId::ENTRY,
                InstKind::Parameter { index: 1 },
                DataType::Int32,
                &[],
            )
            .unwrap();
        let i_plus_1 = f.add(1);
        let c2 = f.c(2);
        let j_plus_2 = f.binary(BinaryOp::Add, j, c2);
        assert!(f.alias(i_plus_1, 1, j, 1));
        assert!(f.alias(i_plus_1, 1, j_plus_2, 1), "i + 1 and j + 2 share no base");
    }

    #[test]
    fn test_sub_wraps_in_32_bits() {
        let mut f = Fixture::new();
        let add_min = f.add(i32::MIN);
        let sub_min = f.sub(i32::MIN);
        assert!(
            f.alias(add_min, 1, sub_min, 1),
            "i + 0x80000000 and i - 0x80000000 are the same index"
        );

        let add_0x10 = f.add(0x10);
        let sub_0xfffffff0 = f.sub(0xFFFF_FFF0_u32 as i32);
        assert!(f.alias(add_0x10, 1, sub_0xfffffff0, 1));

        let add_max = f.add(i32::MAX);
        let sub_0x80000001 = f.sub(0x8000_0001_u32 as i32);
        assert!(f.alias(add_max, 1, sub_0x80000001, 1));

        let add_0 = f.add(0);
        let sub_0 = f.sub(0);
        assert!(f.alias(add_0, 1, sub_0, 1));
    }

    #[test]
    fn test_vector_range_wraps_in_32_bits() {
        let mut f = Fixture::new();
        let add_max = f.add(i32::MAX);
        let add_min = f.add(i32::MIN);
        // For i = MIN + 1 the indices are 0 and 1.
        assert!(
            f.alias(add_max, 4, add_min, 1),
            "i + MAX covers i + MIN from the lane after it"
        );
        assert!(f.alias(add_min, 1, add_max, 4), "argument order does not matter");
        assert!(
            !f.alias(add_max, 1, add_min, 4),
            "i + MAX sits one element before the vector at i + MIN"
        );

        let add_max_minus_1 = f.add(i32::MAX - 1);
        assert!(
            f.alias(add_max_minus_1, 3, add_min, 1),
            "lanes at MAX - 1, MAX and MAX + 1 reach i + MIN"
        );
    }
}
