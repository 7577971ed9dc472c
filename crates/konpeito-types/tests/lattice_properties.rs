//! §8 property-based invariants 1, 3, 4 (apply idempotence, unification
//! symmetry, occurs-check soundness) plus union flattening (invariant 2).
//! Included into `lattice.rs`/`unify.rs` via `#[path]`, the same way the
//! example-based unit tests in this crate live next to the code they
//! exercise.

use super::*;
use crate::lattice::{apply, flatten_union, free_vars};
use konpeito_common::Interner;
use proptest::prelude::*;

const PRIMITIVES: [TypeId; 6] =
    [TypeId::NIL, TypeId::BOOL, TypeId::INTEGER, TypeId::FLOAT, TypeId::STRING, TypeId::SYMBOL];

fn primitive_id() -> impl Strategy<Value = TypeId> {
    prop::sample::select(&PRIMITIVES[..])
}

proptest! {
    /// Invariant 3: for concrete types (no TypeVars on either side),
    /// `unify(a, b)` and `unify(b, a)` agree on success/failure.
    #[test]
    fn unification_symmetry(a in primitive_id(), b in primitive_id()) {
        let mut interner = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let hierarchy = ClassHierarchy::new();

        let forward = Unifier::new(&mut interner, &mut vars, &hierarchy).unify(a, b).is_ok();
        let backward = Unifier::new(&mut interner, &mut vars, &hierarchy).unify(b, a).is_ok();
        prop_assert_eq!(forward, backward);
    }

    /// Invariant 1: applying a substitution twice gives the same
    /// `TypeId` as applying it once, whether or not the variable
    /// involved ever got bound.
    #[test]
    fn apply_idempotence(bind in proptest::option::of(primitive_id())) {
        let mut interner = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let var = vars.fresh();
        let var_ty = interner.fresh_var(var);
        if let Some(target) = bind {
            vars.bind(var, target);
        }

        let once = apply(&mut interner, &mut vars, var_ty);
        let twice = apply(&mut interner, &mut vars, once);
        prop_assert_eq!(once, twice);
    }

    /// Invariant 2: a union built from an arbitrary (possibly nested,
    /// possibly repeating) member list never contains another Union or
    /// a duplicate member once flattened.
    #[test]
    fn union_flattening_has_no_nested_unions_or_duplicates(
        members in prop::collection::vec(primitive_id(), 1..6),
        nest_front in any::<bool>(),
    ) {
        let mut interner = TypeInterner::new();
        let inner = interner.intern(TypeKey::Union(members.iter().copied().collect()));
        let top: Vec<TypeId> = if nest_front {
            std::iter::once(inner).chain(members.iter().copied()).collect()
        } else {
            members.iter().copied().chain(std::iter::once(inner)).collect()
        };

        let flat = flatten_union(&interner, &top);
        let mut seen = std::collections::HashSet::new();
        for id in &flat {
            prop_assert!(!matches!(interner.lookup(*id), TypeKey::Union(_)));
            prop_assert!(seen.insert(*id), "duplicate member survived flattening");
        }
    }

    /// Invariant 4: whenever `unify(tv, T)` succeeds, the bound
    /// variable does not appear among `T`'s free variables once
    /// resolved.
    #[test]
    fn occurs_check_soundness(element in primitive_id(), wrap_self in any::<bool>()) {
        let mut interner = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let hierarchy = ClassHierarchy::new();
        let mut strings = Interner::new();
        let array_class = strings.intern("Array");

        let var = vars.fresh();
        let var_ty = interner.fresh_var(var);
        let target = if wrap_self {
            interner.intern(TypeKey::ClassInstance { class: array_class, type_args: smallvec::smallvec![var_ty] })
        } else {
            interner.intern(TypeKey::ClassInstance { class: array_class, type_args: smallvec::smallvec![element] })
        };

        let result = Unifier::new(&mut interner, &mut vars, &hierarchy).unify(var_ty, target);
        if wrap_self {
            prop_assert!(matches!(result, Err(UnifyError::OccursCheck { .. })));
        } else if result.is_ok() {
            let resolved = apply(&mut interner, &mut vars, var_ty);
            let mut free = rustc_hash::FxHashSet::default();
            free_vars(&interner, &mut vars, resolved, &mut free);
            prop_assert!(!free.contains(&var));
        }
    }
}
