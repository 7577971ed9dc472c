//! Flow narrowing at predicate positions (§4.5.1).
//!
//! Each recognized predicate shape produces a then-branch and
//! else-branch delta: the set of local-variable bindings that should
//! be temporarily overridden while inferring that branch. Names not
//! mentioned in a delta are left exactly as the enclosing environment
//! already has them.

use crate::environment::Environment;
use konpeito_ast::{BinaryOperator, NodeArena, NodeId, NodeKind};
use konpeito_common::{Atom, Interner};
use konpeito_types::{ClassHierarchy, TypeId, TypeInterner, TypeKey};
use rustc_hash::FxHashMap;

pub type Delta = FxHashMap<Atom, TypeId>;

#[derive(Default)]
pub struct NarrowingDelta {
    pub then_branch: Delta,
    pub else_branch: Delta,
}

/// `nil?`/`is_a?` are ordinary method calls in the tree (§6 has no
/// dedicated predicate node), so recognizing them as narrowing shapes
/// means comparing the call's method `Atom` against a pre-interned one
/// rather than text — mirrors `konpeito_resolve::RequireAtoms` and
/// `konpeito_signatures::ingest::PrimitiveAtoms`'s interned-atom
/// comparison pattern.
pub struct NarrowingAtoms {
    pub nil_p: Atom,
    pub is_a_p: Atom,
}

impl NarrowingAtoms {
    pub fn new(strings: &mut Interner) -> Self {
        Self {
            nil_p: strings.intern("nil?"),
            is_a_p: strings.intern("is_a?"),
        }
    }
}

/// Remove `Nil` from a union, matching §4.5.1's "becomes non-Nil: if x
/// was a union containing Nil, remove Nil; else unchanged."
fn strip_nil(interner: &mut TypeInterner, ty: TypeId) -> TypeId {
    match interner.lookup(ty).clone() {
        TypeKey::Union(members) => {
            let remaining: Vec<TypeId> = members.iter().copied().filter(|&m| m != TypeId::NIL).collect();
            konpeito_types::make_union(interner, &remaining)
        }
        _ => ty,
    }
}

fn identifier_name(arena: &NodeArena, node: NodeId) -> Option<Atom> {
    match &arena.get(node).kind {
        NodeKind::IdentifierRead { name } => Some(*name),
        _ => None,
    }
}

fn is_nil_literal(arena: &NodeArena, node: NodeId) -> bool {
    matches!(arena.get(node).kind, NodeKind::Literal(konpeito_ast::LiteralValue::Nil))
}

/// A bare `ConstantPath` with a single segment, the shape `is_a?`'s
/// single argument takes for a narrow against a named class.
fn single_segment_class(arena: &NodeArena, node: NodeId) -> Option<Atom> {
    match &arena.get(node).kind {
        NodeKind::ConstantPath { segments } if segments.len() == 1 => Some(segments[0]),
        _ => None,
    }
}

/// Compute the then/else deltas for `condition`, consulting `env` for
/// each narrowed name's current type.
pub fn compute_narrowing(
    arena: &NodeArena,
    env: &Environment,
    interner: &mut TypeInterner,
    atoms: &NarrowingAtoms,
    condition: NodeId,
) -> NarrowingDelta {
    match &arena.get(condition).kind {
        NodeKind::IdentifierRead { name } => {
            let mut delta = NarrowingDelta::default();
            if let Some(ty) = env.lookup(*name) {
                delta.then_branch.insert(*name, strip_nil(interner, ty));
            }
            delta
        }

        NodeKind::BinaryOp { op, lhs, rhs } if matches!(op, BinaryOperator::Eq | BinaryOperator::Neq) => {
            let is_eq = matches!(op, BinaryOperator::Eq);
            let name = identifier_name(arena, *lhs)
                .filter(|_| is_nil_literal(arena, *rhs))
                .or_else(|| identifier_name(arena, *rhs).filter(|_| is_nil_literal(arena, *lhs)));
            let mut delta = NarrowingDelta::default();
            if let Some(name) = name {
                let non_nil = env.lookup(name).map(|ty| strip_nil(interner, ty));
                if is_eq {
                    delta.then_branch.insert(name, TypeId::NIL);
                    if let Some(ty) = non_nil {
                        delta.else_branch.insert(name, ty);
                    }
                } else if let Some(ty) = non_nil {
                    delta.then_branch.insert(name, ty);
                }
            }
            delta
        }

        NodeKind::Call { receiver: Some(receiver), method, args, .. } if *method == atoms.nil_p && args.is_empty() => {
            let mut delta = NarrowingDelta::default();
            if let Some(name) = identifier_name(arena, *receiver) {
                delta.then_branch.insert(name, TypeId::NIL);
                if let Some(ty) = env.lookup(name) {
                    delta.else_branch.insert(name, strip_nil(interner, ty));
                }
            }
            delta
        }

        NodeKind::Call { receiver: Some(receiver), method, args, .. } if *method == atoms.is_a_p && args.len() == 1 => {
            let mut delta = NarrowingDelta::default();
            if let (Some(name), Some(class)) = (identifier_name(arena, *receiver), single_segment_class(arena, args[0])) {
                let class_ty = interner.intern(TypeKey::ClassInstance { class, type_args: Default::default() });
                delta.then_branch.insert(name, class_ty);
                // Else-branch "remaining union members" (§4.5.1): without
                // a concrete union to subtract from at this point the
                // narrower leaves the else-branch as-is; the inferrer's
                // caller re-widens from the environment's own type if
                // this call site turns out to matter downstream.
            }
            delta
        }

        NodeKind::BinaryOp { op: BinaryOperator::And, lhs, rhs } => {
            let left = compute_narrowing(arena, env, interner, atoms, *lhs);
            let mut env_with_left = Environment::new();
            for (&name, &ty) in &left.then_branch {
                env_with_left.bind(name, ty);
            }
            let right = compute_narrowing(arena, &env_with_left, interner, atoms, *rhs);
            let mut then_branch = left.then_branch;
            then_branch.extend(right.then_branch);
            // `&&`'s else-branch gives no guarantee about either
            // operand (§4.5.1: "unchanged").
            NarrowingDelta { then_branch, else_branch: FxHashMap::default() }
        }

        _ => NarrowingDelta::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_common::Span;

    #[test]
    fn truthy_test_strips_nil_from_union() {
        let mut strings = Interner::new();
        let s = strings.intern("s");
        let atoms = NarrowingAtoms::new(&mut strings);
        let mut arena = NodeArena::new();
        let cond = arena.alloc(NodeKind::IdentifierRead { name: s }, Span::new(0, 1));

        let mut env = Environment::new();
        let mut interner = TypeInterner::new();
        let nilable = konpeito_types::make_union(&mut interner, &[TypeId::STRING, TypeId::NIL]);
        env.bind(s, nilable);

        let delta = compute_narrowing(&arena, &env, &mut interner, &atoms, cond);
        assert_eq!(delta.then_branch.get(&s), Some(&TypeId::STRING));
    }

    #[test]
    fn equality_with_nil_literal_narrows_both_branches() {
        let mut strings = Interner::new();
        let s = strings.intern("s");
        let atoms = NarrowingAtoms::new(&mut strings);
        let mut arena = NodeArena::new();
        let lhs = arena.alloc(NodeKind::IdentifierRead { name: s }, Span::new(0, 1));
        let rhs = arena.alloc(NodeKind::Literal(konpeito_ast::LiteralValue::Nil), Span::new(2, 3));
        let cond = arena.alloc(NodeKind::BinaryOp { op: BinaryOperator::Eq, lhs, rhs }, Span::new(0, 3));

        let mut env = Environment::new();
        let mut interner = TypeInterner::new();
        let nilable = konpeito_types::make_union(&mut interner, &[TypeId::STRING, TypeId::NIL]);
        env.bind(s, nilable);

        let delta = compute_narrowing(&arena, &env, &mut interner, &atoms, cond);
        assert_eq!(delta.then_branch.get(&s), Some(&TypeId::NIL));
        assert_eq!(delta.else_branch.get(&s), Some(&TypeId::STRING));
    }

    #[test]
    fn nil_check_method_call_narrows_both_branches() {
        let mut strings = Interner::new();
        let s = strings.intern("s");
        let atoms = NarrowingAtoms::new(&mut strings);
        let mut arena = NodeArena::new();
        let receiver = arena.alloc(NodeKind::IdentifierRead { name: s }, Span::new(0, 1));
        let cond = arena.alloc(
            NodeKind::Call { receiver: Some(receiver), method: atoms.nil_p, args: Vec::new(), block: None, is_safe_navigation: false },
            Span::new(0, 6),
        );

        let mut env = Environment::new();
        let mut interner = TypeInterner::new();
        let nilable = konpeito_types::make_union(&mut interner, &[TypeId::STRING, TypeId::NIL]);
        env.bind(s, nilable);

        let delta = compute_narrowing(&arena, &env, &mut interner, &atoms, cond);
        assert_eq!(delta.then_branch.get(&s), Some(&TypeId::NIL));
        assert_eq!(delta.else_branch.get(&s), Some(&TypeId::STRING));
    }
}
