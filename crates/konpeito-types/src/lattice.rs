//! Lattice operations that sit above raw unification: subtyping, least
//! upper bound, union flattening, variable substitution, and free
//! variable collection (§4.1).

use crate::hierarchy::ClassHierarchy;
use crate::ty::{NativeKind, PrimitiveKind, TypeId, TypeInterner, TypeKey};
use crate::var::{TypeVar, TypeVarTable};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

/// Flatten a set of candidate union members into canonical form: nested
/// unions inlined, duplicates removed, members sorted by `TypeId` so
/// that set-equal unions always intern to the same `TypeId` (§4.1
/// "union flattening").
pub fn flatten_union(interner: &TypeInterner, members: &[TypeId]) -> SmallVec<[TypeId; 4]> {
    let mut flat = Vec::with_capacity(members.len());
    let mut stack: Vec<TypeId> = members.to_vec();
    while let Some(id) = stack.pop() {
        match interner.lookup(id) {
            TypeKey::Union(nested) => stack.extend(nested.iter().copied()),
            _ => flat.push(id),
        }
    }
    flat.sort_unstable();
    flat.dedup();
    flat.into()
}

/// Build a canonical union `TypeId` from a set of candidate members,
/// flattening and interning it. A single-member result collapses to
/// that member directly rather than a one-element `Union`.
pub fn make_union(interner: &mut TypeInterner, members: &[TypeId]) -> TypeId {
    let flat = flatten_union(interner, members);
    interner.intern_union(flat)
}

/// Structural subtyping (§4.1). `sub` is a subtype of `sup` when every
/// value described by `sub` is also described by `sup` — this is
/// directional, unlike `unify`.
pub fn is_subtype(interner: &TypeInterner, hierarchy: &ClassHierarchy, sub: TypeId, sup: TypeId) -> bool {
    if sub == sup || sup == TypeId::UNTYPED || sub == TypeId::BOTTOM {
        return true;
    }
    // `Untyped` only absorbs as a supertype (checked above); it is not
    // itself a subtype of anything concrete, or every comparison
    // against dynamically-typed code would vacuously succeed.
    if sub == TypeId::UNTYPED {
        return false;
    }

    match (interner.lookup(sub), interner.lookup(sup)) {
        (TypeKey::Primitive(PrimitiveKind::Integer), TypeKey::Primitive(PrimitiveKind::Float)) => true,
        (_, TypeKey::Union(sup_members)) => sup_members
            .iter()
            .any(|m| is_subtype(interner, hierarchy, sub, *m)),
        (TypeKey::Union(sub_members), _) => sub_members
            .iter()
            .all(|m| is_subtype(interner, hierarchy, *m, sup)),
        (
            TypeKey::ClassInstance { class: sub_class, type_args: sub_args },
            TypeKey::ClassInstance { class: sup_class, type_args: sup_args },
        ) => {
            hierarchy.is_ancestor(*sup_class, *sub_class)
                && sub_args.len() == sup_args.len()
                && sub_args
                    .iter()
                    .zip(sup_args.iter())
                    .all(|(a, b)| is_subtype(interner, hierarchy, *a, *b))
        }
        (TypeKey::Tuple(sub_elems), TypeKey::Tuple(sup_elems)) => {
            sub_elems.len() == sup_elems.len()
                && sub_elems
                    .iter()
                    .zip(sup_elems.iter())
                    .all(|(a, b)| is_subtype(interner, hierarchy, *a, *b))
        }
        (TypeKey::FunctionType(sub_shape), TypeKey::FunctionType(sup_shape))
        | (TypeKey::ProcType(sub_shape), TypeKey::ProcType(sup_shape)) => {
            // Parameters are contravariant, return type covariant.
            sub_shape.params.len() == sup_shape.params.len()
                && sub_shape
                    .params
                    .iter()
                    .zip(sup_shape.params.iter())
                    .all(|(sub_p, sup_p)| is_subtype(interner, hierarchy, *sup_p, *sub_p))
                && is_subtype(interner, hierarchy, sub_shape.return_type, sup_shape.return_type)
        }
        (TypeKey::Native(NativeKind::NativeArray(a)), TypeKey::Native(NativeKind::NativeArray(b)))
        | (TypeKey::Native(NativeKind::Slice(a)), TypeKey::Native(NativeKind::Slice(b))) => {
            is_subtype(interner, hierarchy, *a, *b)
        }
        _ => false,
    }
}

/// Least upper bound: the most specific type that both `a` and `b` are
/// subtypes of. Used when flow branches rejoin (`if`/`case` arms) with
/// differently narrowed types along each path.
pub fn lub(interner: &mut TypeInterner, hierarchy: &ClassHierarchy, a: TypeId, b: TypeId) -> TypeId {
    if a == b {
        return a;
    }
    if is_subtype(interner, hierarchy, a, b) {
        return b;
    }
    if is_subtype(interner, hierarchy, b, a) {
        return a;
    }
    make_union(interner, &[a, b])
}

/// Substitute every bound type variable reachable from `ty` with its
/// current binding, leaving still-unbound variables untouched. This is
/// how a generic method's fresh-instantiated signature becomes
/// concrete once its call-site arguments have been unified against it
/// (§4.3 "generic instantiation").
pub fn apply(interner: &mut TypeInterner, vars: &mut TypeVarTable, ty: TypeId) -> TypeId {
    match interner.lookup(ty).clone() {
        TypeKey::TypeVar(var) => {
            let representative = vars.find(var);
            match vars.probe(representative) {
                Some(bound) if bound != ty => apply(interner, vars, bound),
                _ => ty,
            }
        }
        TypeKey::ClassInstance { class, type_args } => {
            let args: SmallVec<[TypeId; 2]> = type_args
                .iter()
                .map(|t| apply(interner, vars, *t))
                .collect();
            interner.intern(TypeKey::ClassInstance { class, type_args: args })
        }
        TypeKey::Union(members) => {
            let applied: Vec<TypeId> = members.iter().map(|t| apply(interner, vars, *t)).collect();
            make_union(interner, &applied)
        }
        TypeKey::Tuple(members) => {
            let applied: SmallVec<[TypeId; 4]> = members.iter().map(|t| apply(interner, vars, *t)).collect();
            interner.intern(TypeKey::Tuple(applied))
        }
        TypeKey::ProcType(shape) => {
            let params = shape.params.iter().map(|t| apply(interner, vars, *t)).collect();
            let return_type = apply(interner, vars, shape.return_type);
            interner.intern(TypeKey::ProcType(crate::ty::CallableShape { params, return_type }))
        }
        TypeKey::FunctionType(shape) => {
            let params = shape.params.iter().map(|t| apply(interner, vars, *t)).collect();
            let return_type = apply(interner, vars, shape.return_type);
            interner.intern(TypeKey::FunctionType(crate::ty::CallableShape { params, return_type }))
        }
        _ => ty,
    }
}

/// Structurally replace every `TypeVar` in `mapping` with its mapped
/// `TypeId`, without touching the shared `TypeVarTable`. This is how a
/// generic method signature's declared type parameters become fresh
/// variables at each call site (§4.3 "generic instantiation") — unlike
/// [`apply`], which resolves *bindings* already recorded in the
/// unification table, this performs a one-shot textual substitution so
/// the same declared type parameter can be instantiated differently at
/// every call site without mutating global unifier state.
pub fn substitute(
    interner: &mut TypeInterner,
    ty: TypeId,
    mapping: &rustc_hash::FxHashMap<TypeVar, TypeId>,
) -> TypeId {
    match interner.lookup(ty).clone() {
        TypeKey::TypeVar(var) => mapping.get(&var).copied().unwrap_or(ty),
        TypeKey::ClassInstance { class, type_args } => {
            let args: SmallVec<[TypeId; 2]> = type_args
                .iter()
                .map(|t| substitute(interner, *t, mapping))
                .collect();
            interner.intern(TypeKey::ClassInstance { class, type_args: args })
        }
        TypeKey::Union(members) => {
            let applied: Vec<TypeId> = members.iter().map(|t| substitute(interner, *t, mapping)).collect();
            make_union(interner, &applied)
        }
        TypeKey::Tuple(members) => {
            let applied: SmallVec<[TypeId; 4]> = members.iter().map(|t| substitute(interner, *t, mapping)).collect();
            interner.intern(TypeKey::Tuple(applied))
        }
        TypeKey::ProcType(shape) => {
            let params = shape.params.iter().map(|t| substitute(interner, *t, mapping)).collect();
            let return_type = substitute(interner, shape.return_type, mapping);
            interner.intern(TypeKey::ProcType(crate::ty::CallableShape { params, return_type }))
        }
        TypeKey::FunctionType(shape) => {
            let params = shape.params.iter().map(|t| substitute(interner, *t, mapping)).collect();
            let return_type = substitute(interner, shape.return_type, mapping);
            interner.intern(TypeKey::FunctionType(crate::ty::CallableShape { params, return_type }))
        }
        _ => ty,
    }
}

/// Collect the set of still-unbound type variables reachable from
/// `ty`. Used by monomorphization to decide whether a call site's
/// argument types leave any parameter fully generic.
pub fn free_vars(interner: &TypeInterner, vars: &mut TypeVarTable, ty: TypeId, out: &mut FxHashSet<TypeVar>) {
    match interner.lookup(ty).clone() {
        TypeKey::TypeVar(var) => {
            let representative = vars.find(var);
            if vars.probe(representative).is_none() {
                out.insert(representative);
            }
        }
        TypeKey::ClassInstance { type_args, .. } => {
            for t in &type_args {
                free_vars(interner, vars, *t, out);
            }
        }
        TypeKey::Union(members) | TypeKey::Tuple(members) => {
            for t in &members {
                free_vars(interner, vars, *t, out);
            }
        }
        TypeKey::ProcType(shape) | TypeKey::FunctionType(shape) => {
            for t in &shape.params {
                free_vars(interner, vars, *t, out);
            }
            free_vars(interner, vars, shape.return_type, out);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::TypeKey;
    use konpeito_common::Interner;

    #[test]
    fn flatten_union_dedupes_and_sorts() {
        let interner = TypeInterner::new();
        let flat = flatten_union(&interner, &[TypeId::STRING, TypeId::INTEGER, TypeId::STRING]);
        assert_eq!(flat.as_slice(), &[TypeId::INTEGER, TypeId::STRING]);
    }

    #[test]
    fn make_union_of_single_member_collapses() {
        let mut interner = TypeInterner::new();
        let id = make_union(&mut interner, &[TypeId::STRING, TypeId::STRING]);
        assert_eq!(id, TypeId::STRING);
    }

    #[test]
    fn integer_is_subtype_of_float() {
        let interner = TypeInterner::new();
        let hierarchy = ClassHierarchy::new();
        assert!(is_subtype(&interner, &hierarchy, TypeId::INTEGER, TypeId::FLOAT));
        assert!(!is_subtype(&interner, &hierarchy, TypeId::FLOAT, TypeId::INTEGER));
    }

    #[test]
    fn class_instance_subtyping_follows_hierarchy() {
        let mut strings = Interner::new();
        let animal = strings.intern("Animal");
        let dog = strings.intern("Dog");
        let mut hierarchy = ClassHierarchy::new();
        hierarchy.declare_class(animal, None);
        hierarchy.declare_class(dog, Some(animal));

        let mut interner = TypeInterner::new();
        let animal_ty = interner.intern(TypeKey::ClassInstance {
            class: animal,
            type_args: Default::default(),
        });
        let dog_ty = interner.intern(TypeKey::ClassInstance {
            class: dog,
            type_args: Default::default(),
        });
        assert!(is_subtype(&interner, &hierarchy, dog_ty, animal_ty));
        assert!(!is_subtype(&interner, &hierarchy, animal_ty, dog_ty));
    }

    #[test]
    fn lub_of_unrelated_types_is_a_union() {
        let mut interner = TypeInterner::new();
        let hierarchy = ClassHierarchy::new();
        let joined = lub(&mut interner, &hierarchy, TypeId::STRING, TypeId::BOOL);
        assert!(matches!(interner.lookup(joined), TypeKey::Union(_)));
    }

    #[test]
    fn apply_substitutes_bound_variables() {
        let mut interner = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let var = vars.fresh();
        let var_ty = interner.fresh_var(var);
        vars.bind(var, TypeId::STRING);
        assert_eq!(apply(&mut interner, &mut vars, var_ty), TypeId::STRING);
    }

    #[test]
    fn free_vars_collects_only_unbound_variables() {
        let mut interner = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let bound = vars.fresh();
        let unbound = vars.fresh();
        vars.bind(bound, TypeId::STRING);
        let bound_ty = interner.fresh_var(bound);
        let unbound_ty = interner.fresh_var(unbound);
        let tuple = interner.intern(TypeKey::Tuple(smallvec::smallvec![bound_ty, unbound_ty]));

        let mut out = FxHashSet::default();
        free_vars(&interner, &mut vars, tuple, &mut out);
        assert_eq!(out.len(), 1);
        assert!(out.contains(&vars.find(unbound)));
    }
}
