//! The unifier (§4.2).
//!
//! Robinson-style structural unification over the closed type lattice,
//! extended with three Ruby-flavored compatibility rules the spec
//! calls out explicitly: numeric widening (`Integer`/`Float` unify to
//! `Float`), `Nil`-compatibility (assigning `nil` into a nilable union
//! is not an error), and `Bool`-compatibility (Ruby has no distinct
//! `true`/`false` types, so this mostly falls out of `Bool` being a
//! single primitive already). Every variable binding goes through the
//! occurs check before being written, and resolution always follows
//! `ena`'s union-find representative, giving path compression for
//! free.

use crate::hierarchy::ClassHierarchy;
use crate::ty::{CallableShape, NativeKind, PrimitiveKind, TypeId, TypeInterner, TypeKey};
use crate::var::{TypeVar, TypeVarTable};
use smallvec::SmallVec;
use std::fmt;

/// Why two types failed to unify.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnifyError {
    /// The two types have no shape in common (e.g. `String` vs. `Array`).
    Mismatch { left: TypeId, right: TypeId },
    /// Binding a type variable to a type would create an infinite type
    /// (e.g. `T = Array[T]`).
    OccursCheck { var: TypeVar, ty: TypeId },
    /// Two callable/tuple/class-instance shapes of different arity.
    ArityMismatch { expected: usize, found: usize },
}

impl fmt::Display for UnifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mismatch { left, right } => {
                write!(f, "cannot unify {left:?} with {right:?}")
            }
            Self::OccursCheck { var, ty } => {
                write!(f, "type variable {var:?} occurs in {ty:?}")
            }
            Self::ArityMismatch { expected, found } => {
                write!(f, "arity mismatch: expected {expected}, found {found}")
            }
        }
    }
}

pub struct Unifier<'a> {
    pub interner: &'a mut TypeInterner,
    pub vars: &'a mut TypeVarTable,
    pub hierarchy: &'a ClassHierarchy,
}

impl<'a> Unifier<'a> {
    pub fn new(
        interner: &'a mut TypeInterner,
        vars: &'a mut TypeVarTable,
        hierarchy: &'a ClassHierarchy,
    ) -> Self {
        Self {
            interner,
            vars,
            hierarchy,
        }
    }

    /// Follow variable bindings to either a concrete `TypeKey` or an
    /// unbound representative variable. This is the "path compression"
    /// step: every `vars.find`/`vars.probe` call inside `ena` collapses
    /// the chain it walks.
    fn resolve(&mut self, id: TypeId) -> TypeId {
        let mut current = id;
        loop {
            match self.interner.lookup(current).clone() {
                TypeKey::TypeVar(var) => {
                    let representative = self.vars.find(var);
                    match self.vars.probe(representative) {
                        Some(bound) => current = bound,
                        // Still unbound: stay at `current` rather than
                        // minting a new interned slot on every probe.
                        // `current`'s `TypeVar` payload may lag behind
                        // the representative after a union, but every
                        // read goes through `vars.find` again, so that
                        // never affects correctness.
                        None => return current,
                    }
                }
                _ => return current,
            }
        }
    }

    /// Unify two types, writing any resulting variable bindings into
    /// the shared `TypeVarTable`.
    pub fn unify(&mut self, a: TypeId, b: TypeId) -> Result<(), UnifyError> {
        let a = self.resolve(a);
        let b = self.resolve(b);
        if a == b {
            return Ok(());
        }
        if a == TypeId::UNTYPED || b == TypeId::UNTYPED {
            return Ok(());
        }

        let (a_var, a_key) = self.as_var_or_key(a);
        let (b_var, b_key) = self.as_var_or_key(b);

        match (a_var, b_var) {
            (Some(va), Some(vb)) => {
                self.vars.union_vars(va, vb);
                return Ok(());
            }
            (Some(va), None) => return self.bind_var(va, b),
            (None, Some(vb)) => return self.bind_var(vb, a),
            (None, None) => {}
        }

        self.unify_keys(a, &a_key.expect("resolved concrete type has a key"), b, &b_key.expect("resolved concrete type has a key"))
    }

    fn as_var_or_key(&mut self, id: TypeId) -> (Option<TypeVar>, Option<TypeKey>) {
        match self.interner.lookup(id).clone() {
            TypeKey::TypeVar(var) => (Some(var), None),
            key => (None, Some(key)),
        }
    }

    fn bind_var(&mut self, var: TypeVar, ty: TypeId) -> Result<(), UnifyError> {
        if self.occurs(var, ty) {
            return Err(UnifyError::OccursCheck { var, ty });
        }
        self.vars.bind(var, ty);
        Ok(())
    }

    /// §4.2: a bound variable must not reference itself, directly or
    /// through a structural type that contains it.
    fn occurs(&mut self, var: TypeVar, ty: TypeId) -> bool {
        let resolved = self.resolve(ty);
        match self.interner.lookup(resolved).clone() {
            TypeKey::TypeVar(other) => self.vars.find(other) == self.vars.find(var),
            TypeKey::ClassInstance { type_args, .. } => {
                type_args.iter().any(|t| self.occurs(var, *t))
            }
            TypeKey::Union(members) | TypeKey::Tuple(members) => {
                members.iter().any(|t| self.occurs(var, *t))
            }
            TypeKey::ProcType(shape) | TypeKey::FunctionType(shape) => {
                shape.params.iter().any(|t| self.occurs(var, *t))
                    || self.occurs(var, shape.return_type)
            }
            TypeKey::Native(native) => self.occurs_in_native(var, &native),
            _ => false,
        }
    }

    fn occurs_in_native(&mut self, var: TypeVar, native: &NativeKind) -> bool {
        match native {
            NativeKind::NativeArray(t) | NativeKind::Slice(t) | NativeKind::StaticArray { element: t, .. } => {
                self.occurs(var, *t)
            }
            NativeKind::NativeHash { key, value } => {
                self.occurs(var, *key) || self.occurs(var, *value)
            }
            _ => false,
        }
    }

    fn unify_keys(
        &mut self,
        a_id: TypeId,
        a: &TypeKey,
        b_id: TypeId,
        b: &TypeKey,
    ) -> Result<(), UnifyError> {
        match (a, b) {
            (TypeKey::Primitive(PrimitiveKind::Integer), TypeKey::Primitive(PrimitiveKind::Float))
            | (TypeKey::Primitive(PrimitiveKind::Float), TypeKey::Primitive(PrimitiveKind::Integer)) => {
                // §9 open question: Int/Float unify without error; the
                // numeric-value-equality convention lives in the
                // signature registry's built-in rule table, not here.
                Ok(())
            }
            (TypeKey::Primitive(PrimitiveKind::Nil), _) if self.is_nilable(b_id) => Ok(()),
            (_, TypeKey::Primitive(PrimitiveKind::Nil)) if self.is_nilable(a_id) => Ok(()),
            (TypeKey::Bottom, _) | (_, TypeKey::Bottom) => Ok(()),
            (
                TypeKey::ClassInstance { class: ca, type_args: ta },
                TypeKey::ClassInstance { class: cb, type_args: tb },
            ) => {
                if ca != cb {
                    return Err(UnifyError::Mismatch { left: a_id, right: b_id });
                }
                self.unify_pairwise(ta, tb)
            }
            (TypeKey::ClassSingleton { class: ca }, TypeKey::ClassSingleton { class: cb }) => {
                if ca == cb {
                    Ok(())
                } else {
                    Err(UnifyError::Mismatch { left: a_id, right: b_id })
                }
            }
            (TypeKey::Tuple(ta), TypeKey::Tuple(tb)) => self.unify_pairwise(ta, tb),
            (TypeKey::ProcType(sa), TypeKey::ProcType(sb)) => self.unify_callable(sa, sb),
            (TypeKey::FunctionType(sa), TypeKey::FunctionType(sb)) => self.unify_callable(sa, sb),
            (TypeKey::Native(na), TypeKey::Native(nb)) => self.unify_native(na.clone(), nb.clone(), a_id, b_id),
            (TypeKey::Union(members), _) => self.unify_union_with(members.clone(), b_id),
            (_, TypeKey::Union(members)) => self.unify_union_with(members.clone(), a_id),
            _ => Err(UnifyError::Mismatch { left: a_id, right: b_id }),
        }
    }

    fn is_nilable(&mut self, id: TypeId) -> bool {
        match self.interner.lookup(id).clone() {
            TypeKey::Primitive(PrimitiveKind::Nil) => true,
            TypeKey::Union(members) => members.iter().any(|m| self.is_nilable(*m)),
            _ => false,
        }
    }

    fn unify_pairwise(&mut self, a: SmallVec<[TypeId; 2]>, b: SmallVec<[TypeId; 2]>) -> Result<(), UnifyError> {
        self.unify_slices(&a, &b)
    }

    fn unify_slices(&mut self, a: &[TypeId], b: &[TypeId]) -> Result<(), UnifyError> {
        if a.len() != b.len() {
            return Err(UnifyError::ArityMismatch {
                expected: a.len(),
                found: b.len(),
            });
        }
        for (x, y) in a.iter().zip(b.iter()) {
            self.unify(*x, *y)?;
        }
        Ok(())
    }

    fn unify_callable(&mut self, a: CallableShape, b: CallableShape) -> Result<(), UnifyError> {
        self.unify_slices(&a.params, &b.params)?;
        self.unify(a.return_type, b.return_type)
    }

    fn unify_native(&mut self, a: NativeKind, b: NativeKind, a_id: TypeId, b_id: TypeId) -> Result<(), UnifyError> {
        match (a, b) {
            (NativeKind::NativeArray(x), NativeKind::NativeArray(y)) => self.unify(x, y),
            (NativeKind::Slice(x), NativeKind::Slice(y)) => self.unify(x, y),
            (
                NativeKind::StaticArray { element: x, size: sx },
                NativeKind::StaticArray { element: y, size: sy },
            ) => {
                if sx != sy {
                    return Err(UnifyError::ArityMismatch {
                        expected: sx as usize,
                        found: sy as usize,
                    });
                }
                self.unify(x, y)
            }
            (NativeKind::NativeHash { key: kx, value: vx }, NativeKind::NativeHash { key: ky, value: vy }) => {
                self.unify(kx, ky)?;
                self.unify(vx, vy)
            }
            (NativeKind::NativeClass(x), NativeKind::NativeClass(y)) if x == y => Ok(()),
            (NativeKind::ByteBuffer, NativeKind::ByteBuffer)
            | (NativeKind::ByteSlice, NativeKind::ByteSlice)
            | (NativeKind::StringBuffer, NativeKind::StringBuffer)
            | (NativeKind::NativeString, NativeKind::NativeString) => Ok(()),
            _ => Err(UnifyError::Mismatch { left: a_id, right: b_id }),
        }
    }

    /// Unifying a non-union type against a union succeeds if it unifies
    /// with at least one member (the member it actually flows into at
    /// runtime); this mirrors how flow narrowing later picks a single
    /// arm rather than requiring agreement with every arm.
    fn unify_union_with(&mut self, members: SmallVec<[TypeId; 4]>, other: TypeId) -> Result<(), UnifyError> {
        for member in &members {
            if self.unify(*member, other).is_ok() {
                return Ok(());
            }
        }
        Err(UnifyError::Mismatch {
            left: *members.first().unwrap_or(&other),
            right: other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::TypeInterner;
    use konpeito_common::Interner;

    fn setup() -> (TypeInterner, TypeVarTable, ClassHierarchy) {
        (TypeInterner::new(), TypeVarTable::new(), ClassHierarchy::new())
    }

    #[test]
    fn identical_primitives_unify() {
        let (mut interner, mut vars, hierarchy) = setup();
        let mut unifier = Unifier::new(&mut interner, &mut vars, &hierarchy);
        assert!(unifier.unify(TypeId::INTEGER, TypeId::INTEGER).is_ok());
    }

    #[test]
    fn integer_and_float_unify_without_error() {
        let (mut interner, mut vars, hierarchy) = setup();
        let mut unifier = Unifier::new(&mut interner, &mut vars, &hierarchy);
        assert!(unifier.unify(TypeId::INTEGER, TypeId::FLOAT).is_ok());
    }

    #[test]
    fn mismatched_primitives_fail() {
        let (mut interner, mut vars, hierarchy) = setup();
        let mut unifier = Unifier::new(&mut interner, &mut vars, &hierarchy);
        assert!(unifier.unify(TypeId::STRING, TypeId::BOOL).is_err());
    }

    #[test]
    fn unbound_variable_binds_to_concrete_type() {
        let (mut interner, mut vars, hierarchy) = setup();
        let var = vars.fresh();
        let var_ty = interner.fresh_var(var);
        let mut unifier = Unifier::new(&mut interner, &mut vars, &hierarchy);
        assert!(unifier.unify(var_ty, TypeId::STRING).is_ok());
        assert_eq!(vars.probe(var), Some(TypeId::STRING));
    }

    #[test]
    fn occurs_check_rejects_self_referential_binding() {
        let (mut interner, mut vars, hierarchy) = setup();
        let mut strings = Interner::new();
        let array_class = strings.intern("Array");
        let var = vars.fresh();
        let var_ty = interner.fresh_var(var);
        let array_of_var = interner.intern(TypeKey::ClassInstance {
            class: array_class,
            type_args: smallvec::smallvec![var_ty],
        });
        let mut unifier = Unifier::new(&mut interner, &mut vars, &hierarchy);
        assert!(matches!(
            unifier.unify(var_ty, array_of_var),
            Err(UnifyError::OccursCheck { .. })
        ));
    }

    #[test]
    fn nil_unifies_with_nilable_union() {
        let (mut interner, mut vars, hierarchy) = setup();
        let nilable = interner.intern(TypeKey::Union(smallvec::smallvec![TypeId::STRING, TypeId::NIL]));
        let mut unifier = Unifier::new(&mut interner, &mut vars, &hierarchy);
        assert!(unifier.unify(TypeId::NIL, nilable).is_ok());
    }

    #[test]
    fn untyped_unifies_with_anything() {
        let (mut interner, mut vars, hierarchy) = setup();
        let mut unifier = Unifier::new(&mut interner, &mut vars, &hierarchy);
        assert!(unifier.unify(TypeId::UNTYPED, TypeId::STRING).is_ok());
    }
}

#[cfg(test)]
#[path = "../tests/lattice_properties.rs"]
mod lattice_properties;
