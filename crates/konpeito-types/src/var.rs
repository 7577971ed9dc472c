//! Type variables and their union-find binding table (§4.2).
//!
//! A [`TypeVar`] is an `ena` unification key; [`TypeVarTable`] wraps
//! `ena`'s in-place unification table to give type variables the
//! standard union-find operations (`find`, `union`) with path
//! compression for free. The unifier in [`crate::unify`] is the only
//! place that actually decides *whether* two variables should be
//! merged — this module only provides the data structure.

use crate::ty::TypeId;
use ena::unify::{EqUnifyValue, InPlaceUnificationTable, UnifyKey};

/// A type variable introduced during inference, e.g. for an
/// as-yet-unconstrained parameter or a generic method's type
/// parameter instantiation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeVar(u32);

impl UnifyKey for TypeVar {
    type Value = Option<TypeId>;

    fn index(&self) -> u32 {
        self.0
    }

    fn from_index(index: u32) -> Self {
        TypeVar(index)
    }

    fn tag() -> &'static str {
        "TypeVar"
    }
}

// `Option<TypeId>` has no inherent "merge two bindings" rule of its
// own; the unifier always resolves a conflict (or confirms agreement)
// structurally before writing a binding, so by the time two bound
// values reach `ena` they are required to already agree.
impl EqUnifyValue for TypeId {}

/// Owns the union-find table backing every `TypeVar` in one compile.
#[derive(Default)]
pub struct TypeVarTable {
    table: InPlaceUnificationTable<TypeVar>,
}

impl TypeVarTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Introduce a brand-new, unbound type variable.
    pub fn fresh(&mut self) -> TypeVar {
        self.table.new_key(None)
    }

    /// Resolve a variable to its union-find representative. Path
    /// compression happens inside `ena` as a side effect of this call.
    pub fn find(&mut self, var: TypeVar) -> TypeVar {
        self.table.find(var)
    }

    /// The `TypeId` this variable (or its representative) is currently
    /// bound to, if any.
    pub fn probe(&mut self, var: TypeVar) -> Option<TypeId> {
        self.table.probe_value(var)
    }

    /// Bind a variable's representative to a concrete type. Panics if
    /// ena detects the representative is already bound to a
    /// *different* value than `ty` — callers must resolve conflicts
    /// via the unifier before binding, not rely on this to arbitrate.
    pub fn bind(&mut self, var: TypeVar, ty: TypeId) {
        self.table
            .unify_var_value(var, Some(ty))
            .expect("rebinding a type variable to a conflicting type without unifying first");
    }

    /// Merge two variables into the same equivalence class without
    /// binding either to a concrete type yet.
    pub fn union_vars(&mut self, a: TypeVar, b: TypeVar) {
        self.table.union(a, b);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_vars_are_initially_unbound() {
        let mut vars = TypeVarTable::new();
        let v = vars.fresh();
        assert_eq!(vars.probe(v), None);
    }

    #[test]
    fn binding_a_variable_makes_it_resolvable() {
        let mut vars = TypeVarTable::new();
        let v = vars.fresh();
        vars.bind(v, TypeId::INTEGER);
        assert_eq!(vars.probe(v), Some(TypeId::INTEGER));
    }

    #[test]
    fn union_merges_bindings_through_the_representative() {
        let mut vars = TypeVarTable::new();
        let a = vars.fresh();
        let b = vars.fresh();
        vars.union_vars(a, b);
        vars.bind(a, TypeId::STRING);
        assert_eq!(vars.probe(b), Some(TypeId::STRING));
    }
}
