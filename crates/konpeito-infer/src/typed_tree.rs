//! Typed-tree construction (§4.6): the inferrer's raw node->type map,
//! finalized.
//!
//! Inference records a `TypeId` per node as it walks, but many of those
//! `TypeId`s are still `TypeVar`s pointing at bindings that only became
//! concrete later in the walk (a method's return type, say, bound only
//! once its last `return` statement was visited). Building the typed
//! tree means resolving every recorded type through the final
//! `TypeVarTable` state and surfacing whatever still isn't concrete as
//! a warning rather than a hard error — an unresolved type doesn't
//! prevent lowering, it just means the node gets treated as `Untyped`
//! downstream.

use konpeito_ast::{NodeArena, NodeId};
use konpeito_common::{Diagnostic, DiagnosticCode, Span};
use konpeito_types::{apply, TypeId, TypeInterner, TypeKey, TypeVarTable};
use rustc_hash::FxHashMap;

/// The finished node->type map plus the span each node came from, ready
/// for lowering to consult.
pub struct TypedTree {
    types: FxHashMap<NodeId, TypeId>,
    spans: FxHashMap<NodeId, Span>,
}

impl TypedTree {
    #[must_use]
    pub fn type_of(&self, node: NodeId) -> Option<TypeId> {
        self.types.get(&node).copied()
    }

    #[must_use]
    pub fn span_of(&self, node: NodeId) -> Option<Span> {
        self.spans.get(&node).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Resolve every `node_types` entry through the unifier's final state,
/// recording an `UnresolvedType` warning for any node that still
/// contains a bare `TypeVar` after substitution.
pub fn build_typed_tree(
    arena: &NodeArena,
    node_types: &FxHashMap<NodeId, TypeId>,
    interner: &mut TypeInterner,
    vars: &mut TypeVarTable,
    file: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> TypedTree {
    let mut types = FxHashMap::default();
    let mut spans = FxHashMap::default();
    for (&node, &ty) in node_types {
        let resolved = apply(interner, vars, ty);
        if still_has_type_var(interner, resolved) {
            let span = arena.get(node).span;
            diagnostics.push(Diagnostic::new(
                DiagnosticCode::UnresolvedType,
                file.to_string(),
                span,
                "this expression's type could not be fully resolved",
            ));
        }
        types.insert(node, resolved);
        spans.insert(node, arena.get(node).span);
    }
    TypedTree { types, spans }
}

fn still_has_type_var(interner: &TypeInterner, ty: TypeId) -> bool {
    match interner.lookup(ty) {
        TypeKey::TypeVar(_) => true,
        TypeKey::ClassInstance { type_args, .. } => {
            type_args.iter().any(|&t| still_has_type_var(interner, t))
        }
        TypeKey::Union(members) | TypeKey::Tuple(members) => {
            members.iter().any(|&t| still_has_type_var(interner, t))
        }
        TypeKey::ProcType(shape) | TypeKey::FunctionType(shape) => {
            shape.params.iter().any(|&t| still_has_type_var(interner, t))
                || still_has_type_var(interner, shape.return_type)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_ast::{LiteralValue, NodeKind};
    use konpeito_types::TypeVar;

    #[test]
    fn resolved_binding_surfaces_as_concrete_type() {
        let mut arena = NodeArena::new();
        let node = arena.alloc(NodeKind::Literal(LiteralValue::Nil), Span::new(0, 1));
        let mut interner = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let var = vars.fresh();
        let var_ty = interner.fresh_var(var);
        vars.bind(var, TypeId::STRING);

        let mut node_types = FxHashMap::default();
        node_types.insert(node, var_ty);
        let mut diagnostics = Vec::new();
        let tree = build_typed_tree(&arena, &node_types, &mut interner, &mut vars, "main.rb", &mut diagnostics);

        assert_eq!(tree.type_of(node), Some(TypeId::STRING));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn still_unbound_variable_emits_unresolved_type_warning() {
        let mut arena = NodeArena::new();
        let node = arena.alloc(NodeKind::Literal(LiteralValue::Nil), Span::new(0, 1));
        let mut interner = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let var = vars.fresh();
        let var_ty = interner.fresh_var(var);

        let mut node_types = FxHashMap::default();
        node_types.insert(node, var_ty);
        let mut diagnostics = Vec::new();
        let tree = build_typed_tree(&arena, &node_types, &mut interner, &mut vars, "main.rb", &mut diagnostics);

        assert_eq!(tree.type_of(node), Some(var_ty));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, DiagnosticCode::UnresolvedType);
        let _: TypeVar = var; // keep `var` named for readability at the call above
    }
}
