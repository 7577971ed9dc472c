//! The inferrer itself (§4.5): whole-program Algorithm W over a merged
//! executable tree, with deferred-constraint resolution and flow
//! narrowing woven into the same walk.

use crate::class_names::{class_name_of, ClassNameAtoms};
use crate::constraints::{ConstraintStore, DeferredConstraint};
use crate::environment::Environment;
use crate::narrowing::{compute_narrowing, NarrowingAtoms};
use crate::typed_tree::{build_typed_tree, TypedTree};
use konpeito_ast::{BinaryOperator, NodeArena, NodeId, NodeKind, Param, ParamKind, UnaryOperator};
use konpeito_common::{limits, Atom, Diagnostic, DiagnosticCode, DiagnosticCollector, Interner};
use konpeito_signatures::{ClassLayout, MethodSignature, ParamSig, ResolvedMethod, SignatureRegistry};
use konpeito_types::{lub, make_union, ClassHierarchy, TypeId, TypeInterner, TypeKey, TypeVarTable, Unifier};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Everything one inference run owns (§5: "a fresh inferrer, lattice,
/// and diagnostic collector per compile").
pub struct Inferrer<'a> {
    strings: &'a mut Interner,
    pub types: TypeInterner,
    pub vars: TypeVarTable,
    pub registry: &'a mut SignatureRegistry,
    pub diagnostics: DiagnosticCollector,
    node_types: FxHashMap<NodeId, TypeId>,
    constraints: ConstraintStore,
    class_names: ClassNameAtoms,
    narrowing_atoms: NarrowingAtoms,
    /// Snapshot of the registry's class hierarchy taken once the
    /// declaration pass finishes. Classes never get re-declared mid
    /// inference pass, so one snapshot is enough, and holding it as a
    /// field (rather than borrowing `self.registry.hierarchy()` live)
    /// keeps it disjoint from `self.types`/`self.vars` for the
    /// borrow-checker's sake — the unifier and lattice ops need all
    /// three at once.
    hierarchy: ClassHierarchy,
    /// Return-type `TypeId` for the method body currently being
    /// inferred, consulted by `return`.
    return_stack: Vec<TypeId>,
    file: String,
}

impl<'a> Inferrer<'a> {
    /// `types`/`vars` are threaded in rather than created fresh here
    /// because signature ingestion (§4.3) already needs a live
    /// `TypeInterner`/`TypeVarTable` to lower `TypeExpr`s into `TypeId`s
    /// before inference starts — the registry's signatures and the
    /// inferrer must share one lattice, or a `TypeId` recorded in a
    /// `MethodSignature` would be meaningless against this inferrer's
    /// own tables.
    pub fn new(
        strings: &'a mut Interner,
        registry: &'a mut SignatureRegistry,
        types: TypeInterner,
        vars: TypeVarTable,
        file: impl Into<String>,
    ) -> Self {
        let class_names = ClassNameAtoms::new(strings);
        let narrowing_atoms = NarrowingAtoms::new(strings);
        Self {
            strings,
            types,
            vars,
            registry,
            diagnostics: DiagnosticCollector::new(),
            node_types: FxHashMap::default(),
            constraints: ConstraintStore::new(),
            class_names,
            narrowing_atoms,
            hierarchy: ClassHierarchy::new(),
            return_stack: Vec::new(),
            file: file.into(),
        }
    }

    #[must_use]
    pub fn node_type(&self, node: NodeId) -> Option<TypeId> {
        self.node_types.get(&node).copied()
    }

    fn record(&mut self, node: NodeId, ty: TypeId) -> TypeId {
        self.node_types.insert(node, ty);
        ty
    }

    fn unify(&mut self, arena: &NodeArena, at: NodeId, a: TypeId, b: TypeId) -> TypeId {
        let mut unifier = Unifier::new(&mut self.types, &mut self.vars, &self.hierarchy);
        match unifier.unify(a, b) {
            Ok(()) => konpeito_types::apply(&mut self.types, &mut self.vars, a),
            Err(err) => {
                let span = arena.get(at).span;
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticCode::TypeMismatch,
                    self.file.clone(),
                    span,
                    format!("{err}"),
                ));
                TypeId::UNTYPED
            }
        }
    }

    fn join(&mut self, a: TypeId, b: TypeId) -> TypeId {
        lub(&mut self.types, &self.hierarchy, a, b)
    }

    /// Declaration pass (§4.5 "whole-program"): walk the merged tree
    /// registering every class and method stub before any body is
    /// inferred, so forward references and mutual recursion resolve.
    pub fn declare(&mut self, arena: &NodeArena, root: NodeId) {
        self.declare_node(arena, root, None);
        self.hierarchy = self.registry.hierarchy().clone();
    }

    fn declare_node(&mut self, arena: &NodeArena, node: NodeId, enclosing_class: Option<Atom>) {
        match arena.get(node).kind.clone() {
            NodeKind::StatementSequence { statements } => {
                for stmt in statements {
                    self.declare_node(arena, stmt, enclosing_class);
                }
            }
            NodeKind::ClassDef { name, superclass, body } => {
                let superclass_name = superclass.and_then(|sc| match &arena.get(sc).kind {
                    NodeKind::ConstantPath { segments } if segments.len() == 1 => Some(segments[0]),
                    _ => None,
                });
                self.registry.declare_class(name, superclass_name);
                for stmt in body {
                    self.declare_node(arena, stmt, Some(name));
                }
            }
            NodeKind::ModuleDef { name, body } => {
                self.registry.declare_class(name, None);
                for stmt in body {
                    self.declare_node(arena, stmt, Some(name));
                }
            }
            NodeKind::MethodDef { name, params, is_singleton, .. } => {
                let sig = self.declare_method_stub(&name, &params, is_singleton);
                match enclosing_class {
                    Some(class) => {
                        let layout: &mut ClassLayout = self.registry.class_layout_mut(class);
                        if is_singleton {
                            layout.singleton_methods.insert(name, sig);
                        } else {
                            layout.instance_methods.insert(name, sig);
                        }
                    }
                    None => self.registry.define_top_level_method(sig),
                }
            }
            _ => {}
        }
    }

    /// Build a method stub: a fresh `TypeVar` for every parameter and
    /// the return position, all listed as `type_params` so each call
    /// site gets its own fresh instantiation (§4.3, §4.5: "the same
    /// polymorphic function can be instantiated differently at
    /// different call sites").
    fn declare_method_stub(&mut self, name: &Atom, params: &[Param], is_singleton: bool) -> MethodSignature {
        let mut type_params = SmallVec::new();
        let mut sig_params = Vec::with_capacity(params.len());
        for param in params {
            let var = self.vars.fresh();
            let ty = self.types.fresh_var(var);
            type_params.push(var);
            sig_params.push(ParamSig {
                name: param.name,
                ty,
                is_optional: matches!(param.kind, ParamKind::Optional | ParamKind::KeywordOptional),
                is_splat: matches!(param.kind, ParamKind::Splat),
                is_keyword: matches!(param.kind, ParamKind::Keyword | ParamKind::KeywordOptional),
                is_block: matches!(param.kind, ParamKind::Block),
            });
        }
        let return_var = self.vars.fresh();
        type_params.push(return_var);
        let return_type = self.types.fresh_var(return_var);
        MethodSignature { name: *name, params: sig_params, return_type, type_params, is_singleton }
    }

    /// Inference pass: walk the same tree again, this time building
    /// the node->type map and unifying method bodies against the
    /// stubs `declare` registered.
    pub fn infer(&mut self, arena: &NodeArena, root: NodeId) {
        let mut env = Environment::new();
        self.infer_node(arena, &mut env, root, None);
        self.resolve_deferred_constraints(arena);
    }

    /// Finalize the recorded node->type map into a [`TypedTree`] (§4.6),
    /// consuming the inferrer. Call after `declare`/`infer` have both
    /// run. Returns the typed tree, the `TypeInterner`/`TypeVarTable`
    /// this run allocated into (IR lowering only ever copies `TypeId`s
    /// out of the typed tree, but `konpeito-opt`'s monomorphizer and
    /// loop optimizer need the same interner live to inspect and
    /// allocate types later in the pipeline — §5's "type lattice's
    /// interning tables... may be cleared at the end" implies the
    /// driver, not the inferrer, owns their lifetime), and every
    /// diagnostic raised across declaration, inference, and
    /// finalization, in that order.
    pub fn into_typed_tree(
        mut self,
        arena: &NodeArena,
    ) -> (TypedTree, TypeInterner, TypeVarTable, Vec<Diagnostic>) {
        let node_types = std::mem::take(&mut self.node_types);
        let mut diagnostics = self.diagnostics.into_vec();
        let tree = build_typed_tree(arena, &node_types, &mut self.types, &mut self.vars, &self.file, &mut diagnostics);
        (tree, self.types, self.vars, diagnostics)
    }

    fn infer_node(&mut self, arena: &NodeArena, env: &mut Environment, node: NodeId, enclosing_class: Option<Atom>) -> TypeId {
        let kind = arena.get(node).kind.clone();
        let ty = match kind {
            NodeKind::Literal(lit) => self.infer_literal(&lit),

            NodeKind::IdentifierRead { name } => env.lookup(name).unwrap_or(TypeId::UNTYPED),
            NodeKind::IdentifierWrite { name, value } => {
                let value_ty = self.infer_node(arena, env, value, enclosing_class);
                env.assign(name, value_ty);
                value_ty
            }

            NodeKind::GlobalRead { .. } | NodeKind::ClassVarRead { .. } | NodeKind::InstanceVarRead { .. } => {
                TypeId::UNTYPED
            }
            NodeKind::GlobalWrite { value, .. } | NodeKind::ClassVarWrite { value, .. } | NodeKind::InstanceVarWrite { value, .. } => {
                self.infer_node(arena, env, value, enclosing_class)
            }

            NodeKind::ConstantPath { segments } => self.infer_constant_path(&segments),

            NodeKind::SelfExpr => enclosing_class
                .map(|class| self.types.intern(TypeKey::ClassInstance { class, type_args: Default::default() }))
                .unwrap_or(TypeId::UNTYPED),

            NodeKind::StatementSequence { statements } => {
                let mut last = TypeId::NIL;
                for stmt in statements {
                    last = self.infer_node(arena, env, stmt, enclosing_class);
                }
                last
            }

            NodeKind::ClassDef { name, body, .. } => {
                for stmt in body {
                    self.infer_node(arena, env, stmt, Some(name));
                }
                TypeId::NIL
            }
            NodeKind::ModuleDef { name, body } => {
                for stmt in body {
                    self.infer_node(arena, env, stmt, Some(name));
                }
                TypeId::NIL
            }

            NodeKind::MethodDef { name, params, body, is_singleton } => {
                self.infer_method_def(arena, env, &name, &params, body, is_singleton, enclosing_class);
                TypeId::NIL
            }

            NodeKind::If { condition, then_branch, else_branch } => {
                self.infer_if(arena, env, node, condition, then_branch, else_branch, enclosing_class)
            }

            NodeKind::WhileLoop { condition, body, .. } | NodeKind::UntilLoop { condition, body, .. } => {
                self.infer_node(arena, env, condition, enclosing_class);
                env.push();
                self.infer_node(arena, env, body, enclosing_class);
                env.pop();
                TypeId::NIL
            }

            NodeKind::ForLoop { binding, iterable, body } => {
                let iterable_ty = self.infer_node(arena, env, iterable, enclosing_class);
                let element = self.array_element_type(iterable_ty);
                env.push();
                env.bind(binding, element);
                self.infer_node(arena, env, body, enclosing_class);
                env.pop();
                TypeId::NIL
            }

            NodeKind::CaseWhen { subject, clauses, else_branch } => {
                self.infer_case_like(arena, env, subject, &clauses, else_branch, enclosing_class)
            }
            NodeKind::PatternMatch { subject, clauses, else_branch } => {
                self.infer_case_like(arena, env, Some(subject), &clauses, else_branch, enclosing_class)
            }

            NodeKind::ArrayLiteral { elements } => self.infer_array_literal(arena, env, &elements, enclosing_class),

            NodeKind::HashLiteral { entries } => {
                for (key, value) in entries {
                    if let Some(key) = key {
                        self.infer_node(arena, env, key, enclosing_class);
                    }
                    self.infer_node(arena, env, value, enclosing_class);
                }
                TypeId::UNTYPED
            }

            NodeKind::BinaryOp { op, lhs, rhs } => self.infer_binary_op(arena, env, node, op, lhs, rhs, enclosing_class),

            NodeKind::UnaryOp { op, operand } => self.infer_unary_op(arena, env, op, operand, enclosing_class),

            NodeKind::Call { receiver, method, args, block, .. } => {
                self.infer_call(arena, env, node, receiver, method, &args, block, enclosing_class)
            }

            NodeKind::Block { params, body } => {
                env.push();
                for param in &params {
                    let var = self.vars.fresh();
                    let ty = self.types.fresh_var(var);
                    env.bind(param.name, ty);
                }
                let result = self.infer_node(arena, env, body, enclosing_class);
                env.pop();
                result
            }

            NodeKind::Yield { args } => {
                for arg in args {
                    self.infer_node(arena, env, arg, enclosing_class);
                }
                TypeId::UNTYPED
            }

            NodeKind::Return { value } => {
                let value_ty = value.map_or(TypeId::NIL, |v| self.infer_node(arena, env, v, enclosing_class));
                match self.return_stack.last().copied() {
                    Some(return_ty) => self.unify(arena, node, return_ty, value_ty),
                    None => value_ty,
                }
            }
            NodeKind::Break { value } | NodeKind::Next { value } => {
                value.map_or(TypeId::NIL, |v| self.infer_node(arena, env, v, enclosing_class))
            }

            NodeKind::Begin { body, rescues, else_branch, ensure } => {
                let mut result = self.infer_node(arena, env, body, enclosing_class);
                for rescue in &rescues {
                    env.push();
                    if let Some(binding) = rescue.binding {
                        env.bind(binding, TypeId::UNTYPED);
                    }
                    self.infer_node(arena, env, rescue.body, enclosing_class);
                    env.pop();
                }
                if let Some(else_branch) = else_branch {
                    result = self.infer_node(arena, env, else_branch, enclosing_class);
                }
                if let Some(ensure) = ensure {
                    self.infer_node(arena, env, ensure, enclosing_class);
                }
                result
            }

            NodeKind::Splat { value } | NodeKind::DoubleSplat { value } => self.infer_node(arena, env, value, enclosing_class),
        };
        self.record(node, ty)
    }

    fn infer_literal(&mut self, lit: &konpeito_ast::LiteralValue) -> TypeId {
        use konpeito_ast::LiteralValue;
        match lit {
            LiteralValue::Integer(_) => TypeId::INTEGER,
            LiteralValue::Float(_) => TypeId::FLOAT,
            LiteralValue::String(_) => TypeId::STRING,
            LiteralValue::Symbol(_) => TypeId::SYMBOL,
            LiteralValue::Bool(_) => TypeId::BOOL,
            LiteralValue::Nil => TypeId::NIL,
        }
    }

    fn infer_constant_path(&mut self, segments: &[Atom]) -> TypeId {
        let Some(&class) = segments.last() else {
            return TypeId::UNTYPED;
        };
        self.types.intern(TypeKey::ClassSingleton { class })
    }

    fn array_element_type(&mut self, array_ty: TypeId) -> TypeId {
        match self.types.lookup(array_ty).clone() {
            TypeKey::ClassInstance { type_args, .. } => type_args.first().copied().unwrap_or(TypeId::UNTYPED),
            _ => TypeId::UNTYPED,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn infer_method_def(
        &mut self,
        arena: &NodeArena,
        env: &mut Environment,
        name: &Atom,
        params: &[Param],
        body: NodeId,
        is_singleton: bool,
        enclosing_class: Option<Atom>,
    ) {
        // Recover the stub `declare` registered so body inference unifies
        // against the exact same parameter/return TypeVars, not a fresh
        // instantiation (§4.5: "unify the body's inferred type with the
        // return TypeVar").
        let stub = match enclosing_class {
            Some(class) => self.registry.class_layout(class).and_then(|layout| {
                let table = if is_singleton { &layout.singleton_methods } else { &layout.instance_methods };
                table.get(name).cloned()
            }),
            None => match self.registry.resolve_method(None, *name, false) {
                Some(ResolvedMethod::Declared(sig)) => Some(sig.clone()),
                _ => None,
            },
        };
        let Some(stub) = stub else { return };

        env.push_isolated();
        for (param, sig_param) in params.iter().zip(stub.params.iter()) {
            env.bind(param.name, sig_param.ty);
            if let Some(default) = param.default {
                let default_ty = self.infer_node(arena, env, default, enclosing_class);
                self.unify(arena, default, sig_param.ty, default_ty);
            }
        }
        self.return_stack.push(stub.return_type);
        let body_ty = self.infer_node(arena, env, body, enclosing_class);
        self.return_stack.pop();
        self.unify(arena, body, stub.return_type, body_ty);
        env.pop();
    }

    #[allow(clippy::too_many_arguments)]
    fn infer_if(
        &mut self,
        arena: &NodeArena,
        env: &mut Environment,
        node: NodeId,
        condition: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
        enclosing_class: Option<Atom>,
    ) -> TypeId {
        self.infer_node(arena, env, condition, enclosing_class);
        let delta = compute_narrowing(arena, env, &mut self.types, &self.narrowing_atoms, condition);

        let then_snapshot = env.narrowed(&delta.then_branch);
        let then_ty = self.infer_node(arena, env, then_branch, enclosing_class);
        env.restore(then_snapshot);

        let Some(else_branch) = else_branch else {
            // §4.5 "in statement position... assign type Nil" — a bare
            // `if` with no `else` can only be used this way, since an
            // expression-position conditional always needs both arms to
            // produce a joined value.
            return self.record(node, TypeId::NIL);
        };

        let else_snapshot = env.narrowed(&delta.else_branch);
        let else_ty = self.infer_node(arena, env, else_branch, enclosing_class);
        env.restore(else_snapshot);

        let joined = self.join(then_ty, else_ty);
        self.record(node, joined)
    }

    #[allow(clippy::too_many_arguments)]
    fn infer_case_like(
        &mut self,
        arena: &NodeArena,
        env: &mut Environment,
        subject: Option<NodeId>,
        clauses: &[konpeito_ast::CaseClause],
        else_branch: Option<NodeId>,
        enclosing_class: Option<Atom>,
    ) -> TypeId {
        if let Some(subject) = subject {
            self.infer_node(arena, env, subject, enclosing_class);
        }

        let mut joined: Option<TypeId> = None;
        for clause in clauses {
            for &pattern in &clause.patterns {
                self.infer_node(arena, env, pattern, enclosing_class);
            }
            env.push();
            if let Some(guard) = clause.guard {
                self.infer_node(arena, env, guard, enclosing_class);
            }
            let body_ty = self.infer_node(arena, env, clause.body, enclosing_class);
            env.pop();
            joined = Some(match joined {
                None => body_ty,
                Some(prev) => self.join(prev, body_ty),
            });
        }

        match else_branch {
            Some(else_branch) => {
                let else_ty = self.infer_node(arena, env, else_branch, enclosing_class);
                match joined {
                    Some(prev) => self.join(prev, else_ty),
                    None => else_ty,
                }
            }
            // No `else` arm: the same statement-position "no agreement
            // required" rule the `if` without an `else` branch gets
            // (§4.5).
            None => TypeId::NIL,
        }
    }

    fn infer_array_literal(
        &mut self,
        arena: &NodeArena,
        env: &mut Environment,
        elements: &[NodeId],
        enclosing_class: Option<Atom>,
    ) -> TypeId {
        let mut element_ty: Option<TypeId> = None;
        let mut heterogeneous = false;
        for &element in elements {
            let ty = self.infer_node(arena, env, element, enclosing_class);
            if matches!(self.types.lookup(ty), TypeKey::TypeVar(_)) {
                heterogeneous = true;
                continue;
            }
            element_ty = Some(match element_ty {
                None => ty,
                Some(prev) if prev == ty => prev,
                Some(prev) => {
                    heterogeneous = true;
                    self.join(prev, ty)
                }
            });
        }
        let element_ty = if heterogeneous { TypeId::UNTYPED } else { element_ty.unwrap_or(TypeId::UNTYPED) };
        let array_class = self.strings.intern("Array");
        self.types.intern(TypeKey::ClassInstance { class: array_class, type_args: smallvec::smallvec![element_ty] })
    }

    #[allow(clippy::too_many_arguments)]
    fn infer_binary_op(
        &mut self,
        arena: &NodeArena,
        env: &mut Environment,
        node: NodeId,
        op: BinaryOperator,
        lhs: NodeId,
        rhs: NodeId,
        enclosing_class: Option<Atom>,
    ) -> TypeId {
        let lhs_ty = self.infer_node(arena, env, lhs, enclosing_class);
        let rhs_ty = self.infer_node(arena, env, rhs, enclosing_class);
        match op {
            BinaryOperator::And | BinaryOperator::Or => rhs_ty,
            BinaryOperator::Eq
            | BinaryOperator::Neq
            | BinaryOperator::Lt
            | BinaryOperator::Lte
            | BinaryOperator::Gt
            | BinaryOperator::Gte
            | BinaryOperator::Cmp => TypeId::BOOL,
            _ => {
                let method_name = binary_operator_method(self.strings, op);
                self.dispatch_call(arena, node, lhs_ty, method_name, &[rhs_ty], false)
            }
        }
    }

    fn infer_unary_op(&mut self, arena: &NodeArena, env: &mut Environment, op: UnaryOperator, operand: NodeId, enclosing_class: Option<Atom>) -> TypeId {
        let operand_ty = self.infer_node(arena, env, operand, enclosing_class);
        match op {
            UnaryOperator::Not => TypeId::BOOL,
            UnaryOperator::Neg | UnaryOperator::BitNot => operand_ty,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn infer_call(
        &mut self,
        arena: &NodeArena,
        env: &mut Environment,
        node: NodeId,
        receiver: Option<NodeId>,
        method: Atom,
        args: &[NodeId],
        block: Option<NodeId>,
        enclosing_class: Option<Atom>,
    ) -> TypeId {
        let receiver_ty = match receiver {
            Some(receiver) => self.infer_node(arena, env, receiver, enclosing_class),
            None => enclosing_class
                .map(|class| self.types.intern(TypeKey::ClassInstance { class, type_args: Default::default() }))
                .unwrap_or(TypeId::UNTYPED),
        };
        let arg_types: Vec<TypeId> = args.iter().map(|&a| self.infer_node(arena, env, a, enclosing_class)).collect();
        if let Some(block) = block {
            self.infer_node(arena, env, block, enclosing_class);
        }
        self.dispatch_call(arena, node, receiver_ty, method, &arg_types, receiver.is_none())
    }

    fn dispatch_call(&mut self, arena: &NodeArena, at: NodeId, receiver_ty: TypeId, method: Atom, arg_types: &[TypeId], is_singleton: bool) -> TypeId {
        if let TypeKey::Union(members) = self.types.lookup(receiver_ty).clone() {
            let mut joined: Option<TypeId> = None;
            for &member in &members {
                let result = self.dispatch_call(arena, at, member, method, arg_types, is_singleton);
                joined = Some(match joined {
                    None => result,
                    Some(prev) => self.join(prev, result),
                });
            }
            return joined.unwrap_or(TypeId::UNTYPED);
        }

        if let TypeKey::TypeVar(receiver_var) = *self.types.lookup(receiver_ty) {
            // §4.5 "defer the call as a constraint" — the receiver is
            // still unresolved, so record it for the fixed-point loop
            // instead of failing the lookup outright.
            let result_var = self.vars.fresh();
            let result_ty = self.types.fresh_var(result_var);
            self.constraints.push(DeferredConstraint {
                receiver_var,
                method,
                arg_types: arg_types.to_vec(),
                result_var,
                is_singleton,
                site: at,
            });
            return self.record(at, result_ty);
        }

        let class = class_name_of(&self.types, &self.class_names, receiver_ty);
        let resolved = class.and_then(|c| self.registry.resolve_method(Some(c), method, is_singleton));
        match resolved {
            Some(ResolvedMethod::Builtin(builtin)) => (builtin.resolve)(receiver_ty, arg_types, &mut self.types),
            Some(ResolvedMethod::Declared(sig)) => {
                let sig = sig.clone();
                let instantiated = self.registry.instantiate(&sig, &mut self.types, &mut self.vars);
                for (param, &arg_ty) in instantiated.params.iter().zip(arg_types.iter()) {
                    self.unify(arena, at, param.ty, arg_ty);
                }
                konpeito_types::apply(&mut self.types, &mut self.vars, instantiated.return_type)
            }
            None => {
                let span = arena.get(at).span;
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticCode::MethodNotFound,
                    self.file.clone(),
                    span,
                    "no method found for this call",
                ));
                TypeId::UNTYPED
            }
        }
    }

    /// §4.5 "a fixed-point loop (capped at a small iteration count)".
    /// Each pass resolves a constraint if `receiver_var`'s binding has
    /// become concrete since it was recorded; unresolved constraints are
    /// pushed back for the next pass. This never mutates the
    /// declaration-site TypeVars a polymorphic method's stub owns —
    /// only the call-site deferred ones — so it can't corrupt another
    /// call site's independent instantiation.
    fn resolve_deferred_constraints(&mut self, arena: &NodeArena) {
        for _ in 0..limits::MAX_DEFERRED_CONSTRAINT_ITERATIONS {
            let pending = self.constraints.drain();
            if pending.is_empty() {
                return;
            }
            let mut progressed = false;
            for constraint in pending {
                let representative = self.vars.find(constraint.receiver_var);
                match self.vars.probe(representative) {
                    Some(receiver_ty) => {
                        progressed = true;
                        let result_ty = self.dispatch_call(arena, constraint.site, receiver_ty, constraint.method, &constraint.arg_types, constraint.is_singleton);
                        self.vars.bind(constraint.result_var, result_ty);
                    }
                    None => self.constraints.push(constraint),
                }
            }
            if !progressed {
                return;
            }
        }
    }
}

fn binary_operator_method(strings: &mut Interner, op: BinaryOperator) -> Atom {
    let text = match op {
        BinaryOperator::Add => "+",
        BinaryOperator::Sub => "-",
        BinaryOperator::Mul => "*",
        BinaryOperator::Div => "/",
        BinaryOperator::Mod => "%",
        BinaryOperator::Pow => "**",
        BinaryOperator::BitAnd => "&",
        BinaryOperator::BitOr => "|",
        BinaryOperator::BitXor => "^",
        BinaryOperator::Shl => "<<",
        BinaryOperator::Shr => ">>",
        BinaryOperator::Eq
        | BinaryOperator::Neq
        | BinaryOperator::Lt
        | BinaryOperator::Lte
        | BinaryOperator::Gt
        | BinaryOperator::Gte
        | BinaryOperator::Cmp
        | BinaryOperator::And
        | BinaryOperator::Or => unreachable!("handled directly by infer_binary_op"),
    };
    strings.intern(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_common::Span;

    #[test]
    fn literal_addition_infers_to_integer() {
        let mut strings = Interner::new();
        let mut registry = SignatureRegistry::new(&mut strings);
        let mut arena = NodeArena::new();
        let one = arena.alloc(NodeKind::Literal(konpeito_ast::LiteralValue::Integer(1)), Span::new(0, 1));
        let two = arena.alloc(NodeKind::Literal(konpeito_ast::LiteralValue::Integer(2)), Span::new(2, 3));
        let add = arena.alloc(NodeKind::BinaryOp { op: BinaryOperator::Add, lhs: one, rhs: two }, Span::new(0, 3));

        let mut infer = Inferrer::new(&mut strings, &mut registry, TypeInterner::new(), TypeVarTable::new(), "main.rb");
        infer.declare(&arena, add);
        infer.infer(&arena, add);
        assert_eq!(infer.node_type(add), Some(TypeId::INTEGER));
    }

    #[test]
    fn mixed_numeric_addition_widens_to_float() {
        let mut strings = Interner::new();
        let mut registry = SignatureRegistry::new(&mut strings);
        let mut arena = NodeArena::new();
        let one = arena.alloc(NodeKind::Literal(konpeito_ast::LiteralValue::Integer(1)), Span::new(0, 1));
        let half = arena.alloc(NodeKind::Literal(konpeito_ast::LiteralValue::Float(0.5)), Span::new(2, 3));
        let add = arena.alloc(NodeKind::BinaryOp { op: BinaryOperator::Add, lhs: one, rhs: half }, Span::new(0, 3));

        let mut infer = Inferrer::new(&mut strings, &mut registry, TypeInterner::new(), TypeVarTable::new(), "main.rb");
        infer.declare(&arena, add);
        infer.infer(&arena, add);
        assert_eq!(infer.node_type(add), Some(TypeId::FLOAT));
    }

    #[test]
    fn nil_narrowed_if_branch_types_string_method_as_integer() {
        let mut strings = Interner::new();
        let mut registry = SignatureRegistry::new(&mut strings);
        let s = strings.intern("s");
        let length = strings.intern("length");
        let string_class = strings.intern("String");
        registry.declare_class(string_class, None);
        registry.class_layout_mut(string_class).instance_methods.insert(
            length,
            MethodSignature {
                name: length,
                params: Vec::new(),
                return_type: TypeId::INTEGER,
                type_params: SmallVec::new(),
                is_singleton: false,
            },
        );

        let mut arena = NodeArena::new();
        let s_read_cond = arena.alloc(NodeKind::IdentifierRead { name: s }, Span::new(0, 1));
        let nil_lit = arena.alloc(NodeKind::Literal(konpeito_ast::LiteralValue::Nil), Span::new(1, 2));
        let cond = arena.alloc(NodeKind::BinaryOp { op: BinaryOperator::Neq, lhs: s_read_cond, rhs: nil_lit }, Span::new(0, 2));
        let s_read_then = arena.alloc(NodeKind::IdentifierRead { name: s }, Span::new(3, 4));
        let call = arena.alloc(
            NodeKind::Call { receiver: Some(s_read_then), method: length, args: Vec::new(), block: None, is_safe_navigation: false },
            Span::new(3, 10),
        );
        let zero = arena.alloc(NodeKind::Literal(konpeito_ast::LiteralValue::Integer(0)), Span::new(11, 12));
        let if_node = arena.alloc(NodeKind::If { condition: cond, then_branch: call, else_branch: Some(zero) }, Span::new(0, 12));

        let mut infer = Inferrer::new(&mut strings, &mut registry, TypeInterner::new(), TypeVarTable::new(), "main.rb");
        infer.declare(&arena, if_node);

        let mut env = Environment::new();
        let nilable = make_union(&mut infer.types, &[TypeId::STRING, TypeId::NIL]);
        env.bind(s, nilable);
        infer.infer_node(&arena, &mut env, if_node, None);

        assert_eq!(infer.node_type(call), Some(TypeId::INTEGER));
    }
}
