//! Escape analysis.
//!
//! Determines whether an allocation is visible outside the method that
//! creates it. A reference is a *singleton* when it is the only name for its
//! object during the method: it is not aliased through a phi or select, not
//! stored into the heap, and not passed to a call.
//!
//! Being returned, or being visible to a deoptimization point, does not break
//! the singleton property but is tracked separately, since only
//! optimizations that reason about compiled code (such as load/store
//! elimination) care about it.

use crate::ir::{Graph, InstId, InstKind};

/// Result of [`calculate_escape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapeFlags {
    pub is_singleton: bool,
    pub is_singleton_and_not_returned: bool,
    pub is_singleton_and_not_deopt_visible: bool,
}

impl EscapeFlags {
    fn all(value: bool) -> Self {
        EscapeFlags {
            is_singleton: value,
            is_singleton_and_not_returned: value,
            is_singleton_and_not_deopt_visible: value,
        }
    }
}

/// Does `user` let `reference` escape?
fn is_escaping_user(graph: &Graph, reference: InstId, user: InstId) -> bool {
    let inst = &graph[user];
    match inst.kind() {
        // Aliases of the reference that are not followed here; be
        // conservative when one is still around.
        InstKind::BoundType | InstKind::NullCheck | InstKind::IntermediateAddress => true,
        InstKind::Phi | InstKind::Select | InstKind::Invoke => true,
        InstKind::Return | InstKind::Deoptimize => true,
        InstKind::UnresolvedInstanceFieldGet | InstKind::UnresolvedInstanceFieldSet
            if inst.input(0) == Some(reference) =>
        {
            true
        }
        _ if inst.is_heap_write() => inst.stored_value() == Some(reference),
        _ => false,
    }
}

/// Call `visitor` with every instruction through which `reference` escapes.
///
/// References that are not allocated in this method, and finalizable
/// objects, escape at their own definition, so `visitor` sees `reference`
/// itself first. Iteration stops when `visitor` returns `false`. A user with
/// several escaping inputs may be reported more than once.
pub fn visit_escapes<F>(graph: &Graph, reference: InstId, mut visitor: F)
where
    F: FnMut(InstId) -> bool,
{
    let inst = &graph[reference];
    let finalizable = matches!(
        inst.kind(),
        InstKind::NewInstance {
            finalizable: true,
            ..
        }
    );
    if (!inst.is_allocation() || finalizable) && !visitor(reference) {
        return;
    }

    for use_ in inst.uses() {
        if is_escaping_user(graph, reference, use_.user) && !visitor(use_.user) {
            return;
        }
    }
}

/// Classify `reference`.
///
/// `no_escape(reference, user)` lets the caller declare that a particular
/// user does not cause an escape; when it returns `false` the built-in rules
/// decide.
pub fn calculate_escape<F>(graph: &Graph, reference: InstId, mut no_escape: F) -> EscapeFlags
where
    F: FnMut(InstId, InstId) -> bool,
{
    let inst = &graph[reference];
    if !inst.is_allocation() {
        return EscapeFlags::all(false);
    }

    let mut flags = EscapeFlags::all(true);
    if let InstKind::NewInstance {
        finalizable: true, ..
    } = inst.kind()
    {
        // Finalizable objects end up on the finalizer queue.
        flags.is_singleton_and_not_returned = false;
    }

    visit_escapes(graph, reference, |escape| {
        if escape == reference || no_escape(reference, escape) {
            return true;
        }
        match graph[escape].kind() {
            InstKind::Return => {
                flags.is_singleton_and_not_returned = false;
                true
            }
            InstKind::Deoptimize => {
                flags.is_singleton_and_not_deopt_visible = false;
                true
            }
            _ => {
                flags = EscapeFlags::all(false);
                false
            }
        }
    });
    flags
}

/// `reference` is a singleton that is neither returned nor deopt-visible.
pub fn does_not_escape<F>(graph: &Graph, reference: InstId, no_escape: F) -> bool
where
    F: FnMut(InstId, InstId) -> bool,
{
    let flags = calculate_escape(graph, reference, no_escape);
    flags.is_singleton_and_not_returned && flags.is_singleton_and_not_deopt_visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, DataType, FieldInfo};

    fn new_instance(graph: &mut Graph, finalizable: bool) -> InstId {
        graph
            .add_instruction(
                BlockId::ENTRY,
                InstKind::NewInstance {
                    needs_checks: false,
                    finalizable,
                },
                DataType::Reference,
                &[],
            )
            .unwrap()
    }

    fn add(graph: &mut Graph, kind: InstKind, ty: DataType, inputs: &[InstId]) -> InstId {
        graph.add_instruction(BlockId::ENTRY, kind, ty, inputs).unwrap()
    }

    fn never(_: InstId, _: InstId) -> bool {
        false
    }

    #[test]
    fn test_local_writes_do_not_escape() {
        let mut graph = Graph::new();
        let obj = new_instance(&mut graph, false);
        let c1 = graph.int_constant(1);
        let field = FieldInfo::new(8, DataType::Int32);
        add(&mut graph, InstKind::InstanceFieldSet(field), DataType::Void, &[obj, c1]);
        add(&mut graph, InstKind::InstanceFieldGet(field), DataType::Int32, &[obj]);

        assert_eq!(calculate_escape(&graph, obj, never), EscapeFlags::all(true));
        assert!(does_not_escape(&graph, obj, never));
    }

    #[test]
    fn test_stored_as_value_escapes() {
        let mut graph = Graph::new();
        let obj = new_instance(&mut graph, false);
        let holder = add(
            &mut graph,
            InstKind::Parameter { index: 0 },
            DataType::Reference,
            &[],
        );
        let field = FieldInfo::new(8, DataType::Reference);
        let store = add(
            &mut graph,
            InstKind::InstanceFieldSet(field),
            DataType::Void,
            &[holder, obj],
        );

        assert!(!calculate_escape(&graph, obj, never).is_singleton);
        let mut seen = Vec::new();
        visit_escapes(&graph, obj, |e| {
            seen.push(e);
            true
        });
        assert_eq!(seen, vec![store]);
    }

    #[test]
    fn test_return_and_deopt_keep_singleton() {
        let mut graph = Graph::new();
        let obj = new_instance(&mut graph, false);
        add(&mut graph, InstKind::Deoptimize, DataType::Void, &[obj]);
        add(&mut graph, InstKind::Return, DataType::Void, &[obj]);

        let flags = calculate_escape(&graph, obj, never);
        assert!(flags.is_singleton, "returning does not create an alias");
        assert!(!flags.is_singleton_and_not_returned);
        assert!(!flags.is_singleton_and_not_deopt_visible);
        assert!(!does_not_escape(&graph, obj, never));
    }

    #[test]
    fn test_finalizable_counts_as_returned() {
        let mut graph = Graph::new();
        let obj = new_instance(&mut graph, true);
        let flags = calculate_escape(&graph, obj, never);
        assert!(flags.is_singleton);
        assert!(!flags.is_singleton_and_not_returned);

        let mut seen = Vec::new();
        visit_escapes(&graph, obj, |e| {
            seen.push(e);
            true
        });
        assert_eq!(seen, vec![obj], "a finalizable object escapes at its definition");
    }

    #[test]
    fn test_parameter_is_never_singleton() {
        let mut graph = Graph::new();
        let param = add(
            &mut graph,
            InstKind::Parameter { index: 0 },
            DataType::Reference,
            &[],
        );
        assert_eq!(calculate_escape(&graph, param, never), EscapeFlags::all(false));
    }

    #[test]
    fn test_no_escape_callback_vetoes_user() {
        let mut graph = Graph::new();
        let obj = new_instance(&mut graph, false);
        let call = add(&mut graph, InstKind::Invoke, DataType::Void, &[obj]);

        assert!(!calculate_escape(&graph, obj, never).is_singleton);
        let flags = calculate_escape(&graph, obj, |_, user| user == call);
        assert!(flags.is_singleton, "the callback declared the call harmless");
    }

    #[test]
    fn test_visitor_can_stop_early() {
        let mut graph = Graph::new();
        let obj = new_instance(&mut graph, false);
        add(&mut graph, InstKind::Invoke, DataType::Void, &[obj]);
        add(&mut graph, InstKind::Invoke, DataType::Void, &[obj]);

        let mut count = 0;
        visit_escapes(&graph, obj, |_| {
            count += 1;
            false
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_interior_address_escapes() {
        let mut graph = Graph::new();
        let length = graph.int_constant(4);
        let array = add(&mut graph, InstKind::NewArray, DataType::Reference, &[length]);
        let address = add(
            &mut graph,
            InstKind::IntermediateAddress,
            DataType::Int32,
            &[array],
        );
        add(&mut graph, InstKind::Invoke, DataType::Void, &[address]);

        assert!(
            !calculate_escape(&graph, array, never).is_singleton,
            "the call may write through the interior address"
        );
        let mut seen = Vec::new();
        visit_escapes(&graph, array, |e| {
            seen.push(e);
            true
        });
        assert_eq!(seen, vec![address]);
    }

    #[test]
    fn test_unresolved_access_escapes() {
        let mut graph = Graph::new();
        let obj = new_instance(&mut graph, false);
        add(
            &mut graph,
            InstKind::UnresolvedInstanceFieldGet,
            DataType::Int32,
            &[obj],
        );
        assert!(!calculate_escape(&graph, obj, never).is_singleton);
    }
}
