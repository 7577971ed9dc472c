//! Deferred call constraints (§4.5 "Deferred-constraint resolution").
//!
//! A method call whose receiver is still an unresolved `TypeVar` at the
//! time it's inferred can't be looked up against the signature
//! registry yet. Rather than fail, the inferrer records the call as a
//! constraint and revisits it in a bounded fixed-point loop once other
//! unification has (maybe) pinned the receiver down to something
//! concrete.

use konpeito_ast::NodeId;
use konpeito_common::Atom;
use konpeito_types::{TypeId, TypeVar};

/// `(receiver-tv, method-name, arg-types) -> result-tv`, exactly the
/// shape §4.5 names it. `site` is the original call node, kept so a
/// diagnostic raised while resolving the constraint later still points
/// at the right source location.
#[derive(Clone, Debug)]
pub struct DeferredConstraint {
    pub receiver_var: TypeVar,
    pub method: Atom,
    pub arg_types: Vec<TypeId>,
    pub result_var: TypeVar,
    pub is_singleton: bool,
    pub site: NodeId,
}

/// The set of constraints still awaiting resolution. Constraints are
/// resolved in place by `Inferrer::resolve_deferred_constraints`, which
/// owns the registry/unifier access this store doesn't need to hold
/// itself.
#[derive(Default)]
pub struct ConstraintStore {
    pending: Vec<DeferredConstraint>,
}

impl ConstraintStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, constraint: DeferredConstraint) {
        self.pending.push(constraint);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Take every still-pending constraint, leaving the store empty for
    /// callers to repopulate with whatever doesn't resolve this pass.
    pub fn drain(&mut self) -> Vec<DeferredConstraint> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_ast::{NodeArena, NodeKind};
    use konpeito_common::{Interner, Span};
    use konpeito_types::TypeVarTable;

    #[test]
    fn drain_empties_the_store() {
        let mut strings = Interner::new();
        let method = strings.intern("length");
        let mut vars = TypeVarTable::new();
        let mut arena = NodeArena::new();
        let site = arena.alloc(NodeKind::Literal(konpeito_ast::LiteralValue::Nil), Span::new(0, 0));
        let mut store = ConstraintStore::new();
        store.push(DeferredConstraint {
            receiver_var: vars.fresh(),
            method,
            arg_types: Vec::new(),
            result_var: vars.fresh(),
            is_singleton: false,
            site,
        });
        assert_eq!(store.len(), 1);
        let drained = store.drain();
        assert_eq!(drained.len(), 1);
        assert!(store.is_empty());
    }
}
