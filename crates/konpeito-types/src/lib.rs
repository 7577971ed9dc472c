//! The closed type lattice, its interning table, the class hierarchy,
//! and the unifier (§3.1, §4.1, §4.2).
//!
//! This crate has no notion of source syntax or inference order; it is
//! the shared algebra every later stage (signature registry, inferrer,
//! monomorphizer) builds on.

pub mod ty;
pub use ty::{CallableShape, NativeKind, PrimitiveKind, TypeId, TypeInterner, TypeKey};

pub mod var;
pub use var::{TypeVar, TypeVarTable};

pub mod hierarchy;
pub use hierarchy::ClassHierarchy;

pub mod unify;
pub use unify::{UnifyError, Unifier};

pub mod lattice;
pub use lattice::{apply, flatten_union, free_vars, is_subtype, lub, make_union, substitute};

#[cfg(test)]
mod tests {
    use super::*;

    /// End-to-end smoke test exercising interner, hierarchy, and unifier
    /// together the way a caller actually wires them up.
    #[test]
    fn unifying_a_fresh_variable_against_a_class_instance_binds_it() {
        let mut strings = konpeito_common::Interner::new();
        let string_class = strings.intern("String");

        let mut interner = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let hierarchy = ClassHierarchy::new();

        let string_ty = interner.intern(TypeKey::ClassInstance {
            class: string_class,
            type_args: Default::default(),
        });
        let var = vars.fresh();
        let var_ty = interner.fresh_var(var);

        let mut unifier = Unifier::new(&mut interner, &mut vars, &hierarchy);
        unifier.unify(var_ty, string_ty).expect("unification should succeed");

        assert_eq!(apply(&mut interner, &mut vars, var_ty), string_ty);
    }
}
