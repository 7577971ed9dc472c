//! Lowering from the typed executable tree to the basic-block IR
//! (§4.7).
//!
//! Grounded in the teacher's `tsz-checker::control_flow::FlowAnalyzer`
//! for the general shape of "walk a typed tree, thread a current-block
//! cursor, branch into fresh blocks at control-flow nodes" — that
//! analyzer built a read-only flow graph over an existing tree, while
//! this builder constructs the tree's basic blocks as it walks, but
//! the cursor-and-antecedent bookkeeping is the same idea applied in
//! the opposite direction.

use konpeito_ast::{
    BinaryOperator, LiteralValue, NodeArena, NodeId, NodeKind, Param, ParamKind, UnaryOperator,
};
use konpeito_common::{Atom, Interner, Span};
use konpeito_signatures::SignatureRegistry;
use konpeito_types::TypeId;
use rustc_hash::FxHashMap;

use crate::ir::{
    BinOp, BlockId, ClassLayout, ExceptionRegion, FieldSlot, Function, InstKind, Instruction,
    ParamSlot, PhiEdge, Program, SlotId, Terminator, UnOp, ValueId,
};
use konpeito_infer::TypedTree;

/// Where `break`/`next` jump to for the loop currently being lowered.
struct LoopTargets {
    header: BlockId,
    after: BlockId,
}

/// Per-function lowering state. A fresh one is built for every method,
/// top-level script body, and synthesized block/closure function.
struct FnCtx {
    function: Function,
    locals: FxHashMap<Atom, SlotId>,
    current: BlockId,
    self_class: Option<Atom>,
    loop_stack: Vec<LoopTargets>,
    next_value: u32,
}

impl FnCtx {
    fn new(name: Atom, self_class: Option<Atom>) -> Self {
        Self {
            function: Function::new(name),
            locals: FxHashMap::default(),
            current: BlockId::ENTRY,
            self_class,
            loop_stack: Vec::new(),
            next_value: 0,
        }
    }

    fn emit(&mut self, ty: TypeId, kind: InstKind, span: Span) -> ValueId {
        let result = ValueId::from_usize(self.next_value as usize);
        self.next_value += 1;
        self.function
            .block_mut(self.current)
            .instructions
            .push(Instruction { result, ty, kind, span });
        result
    }

    fn terminate(&mut self, terminator: Terminator) {
        self.function.block_mut(self.current).terminator = Some(terminator);
    }

    fn has_terminator(&self) -> bool {
        self.function.block(self.current).terminator.is_some()
    }
}

/// Lowers a dependency-resolved, fully-typed tree into a `Program`.
pub struct IRBuilder<'a> {
    strings: &'a mut Interner,
    typed: &'a TypedTree,
    registry: &'a SignatureRegistry,
    closure_seq: u32,
    /// Closures lowered mid-function (block arguments, `for`-loop
    /// bodies) land here rather than in the `Program` under
    /// construction, since `lower_expr` only ever has the enclosing
    /// `FnCtx` in scope, not the top-level `build()` caller's
    /// `Program`. `build()` drains this after each top-level function.
    pending_functions: Vec<Function>,
}

impl<'a> IRBuilder<'a> {
    pub fn new(strings: &'a mut Interner, typed: &'a TypedTree, registry: &'a SignatureRegistry) -> Self {
        Self { strings, typed, registry, closure_seq: 0, pending_functions: Vec::new() }
    }

    /// Lowers every top-level node (class/module/method definitions,
    /// plus any bare top-level statements, which are folded into a
    /// synthesized `<main>` function).
    pub fn build(mut self, arena: &NodeArena, roots: &[NodeId]) -> Program {
        let mut program = Program::new();
        let mut main_statements = Vec::new();

        for &root in roots {
            match &arena.get(root).kind {
                NodeKind::ClassDef { name, superclass, body } => {
                    self.lower_class(arena, &mut program, *name, *superclass, body);
                }
                NodeKind::ModuleDef { name, body } => {
                    self.lower_module(arena, &mut program, *name, body);
                }
                NodeKind::MethodDef { .. } => {
                    let function = self.lower_method(arena, None, root);
                    program.functions.push(function);
                    program.functions.append(&mut self.pending_functions);
                }
                _ => main_statements.push(root),
            }
        }

        if !main_statements.is_empty() {
            let main_name = self.strings.intern("<main>");
            let mut ctx = FnCtx::new(main_name, None);
            for &stmt in &main_statements {
                if ctx.has_terminator() {
                    break;
                }
                self.lower_expr(arena, &mut ctx, stmt);
            }
            if !ctx.has_terminator() {
                ctx.terminate(Terminator::Return(None));
            }
            program.functions.push(ctx.function);
            program.functions.append(&mut self.pending_functions);
        }

        program
    }

    fn lower_module(&mut self, arena: &NodeArena, program: &mut Program, name: Atom, body: &[NodeId]) {
        self.lower_class(arena, program, name, None, body);
    }

    fn lower_class(
        &mut self,
        arena: &NodeArena,
        program: &mut Program,
        name: Atom,
        superclass: Option<NodeId>,
        body: &[NodeId],
    ) {
        let fields = self
            .registry
            .class_layout(name)
            .map(|layout| {
                layout
                    .fields
                    .iter()
                    .map(|(&name, &ty)| FieldSlot { name, ty })
                    .collect()
            })
            .unwrap_or_default();
        let parent = superclass.and_then(|node| self.constant_name(arena, node));
        program.classes.insert(name, ClassLayout { fields, parent, mixins: Vec::new(), vtable: Vec::new() });

        for &member in body {
            match &arena.get(member).kind {
                NodeKind::MethodDef { .. } => {
                    let function = self.lower_method(arena, Some(name), member);
                    program.functions.push(function);
                    program.functions.append(&mut self.pending_functions);
                }
                NodeKind::ClassDef { name: inner, superclass: inner_super, body: inner_body } => {
                    self.lower_class(arena, program, *inner, *inner_super, inner_body);
                }
                NodeKind::ModuleDef { name: inner, body: inner_body } => {
                    self.lower_module(arena, program, *inner, inner_body);
                }
                // Class-body statements other than nested definitions (rare
                // outside `attr_accessor`-style macros, which the signature
                // ingester already expanded into fields/methods) carry no
                // further lowering obligation.
                _ => {}
            }
        }
    }

    fn constant_name(&self, arena: &NodeArena, node: NodeId) -> Option<Atom> {
        match &arena.get(node).kind {
            NodeKind::ConstantPath { segments } => {
                let joined = segments
                    .iter()
                    .map(|&seg| self.strings.resolve(seg))
                    .collect::<Vec<_>>()
                    .join("::");
                Some(self.strings.intern(&joined))
            }
            _ => None,
        }
    }

    fn lower_method(&mut self, arena: &NodeArena, owner: Option<Atom>, node: NodeId) -> Function {
        let (name, params, body, is_singleton) = match &arena.get(node).kind {
            NodeKind::MethodDef { name, params, body, is_singleton } => {
                (*name, params.clone(), *body, *is_singleton)
            }
            _ => unreachable!("lower_method called on a non-MethodDef node"),
        };

        let qualified = self.qualify(owner, name, is_singleton);
        let mut ctx = FnCtx::new(qualified, owner);
        self.bind_params(arena, &mut ctx, &params);

        let result = self.lower_expr(arena, &mut ctx, body);
        if !ctx.has_terminator() {
            ctx.terminate(Terminator::Return(Some(result)));
        }
        ctx.function.return_type = self.typed.type_of(body).unwrap_or(TypeId::UNTYPED);
        ctx.function
    }

    fn qualify(&mut self, owner: Option<Atom>, name: Atom, is_singleton: bool) -> Atom {
        match owner {
            None => name,
            Some(owner) => {
                let sep = if is_singleton { '.' } else { '#' };
                let joined = format!("{}{sep}{}", self.strings.resolve(owner), self.strings.resolve(name));
                self.strings.intern(&joined)
            }
        }
    }

    /// Allocates one slot per parameter; the calling convention binds a
    /// call's argument values directly into these slots at entry, so no
    /// explicit load/store is emitted here. Default-value expressions for
    /// `Optional`/`KeywordOptional` params are left unlowered — whether
    /// the caller supplied an argument is a call-site fact the builder
    /// doesn't have in hand while lowering the callee's own body.
    fn bind_params(&mut self, _arena: &NodeArena, ctx: &mut FnCtx, params: &[Param]) {
        for param in params {
            let ty = param
                .default
                .and_then(|d| self.typed.type_of(d))
                .unwrap_or(TypeId::UNTYPED);
            let slot = ctx.function.alloc_slot(ty);
            ctx.locals.insert(param.name, slot);
            ctx.function.params.push(ParamSlot { name: param.name, slot, ty });
        }
    }

    /// Lowers one closure body (a `Block` node or a `for` loop's body)
    /// into its own `Function`, registering it with `program` and
    /// returning the `ValueId` of the `MakeClosure` that materializes
    /// it at the call site.
    fn lower_block(&mut self, arena: &NodeArena, outer: &mut FnCtx, params: &[Param], body: NodeId) -> ValueId {
        self.closure_seq += 1;
        let enclosing = self.strings.resolve(outer.function.name).to_string();
        let synthesized = format!("{enclosing}::block{}", self.closure_seq);
        let name = self.strings.intern(&synthesized);

        let mut ctx = FnCtx::new(name, outer.self_class);
        self.bind_params(arena, &mut ctx, params);
        let result = self.lower_expr(arena, &mut ctx, body);
        if !ctx.has_terminator() {
            ctx.terminate(Terminator::Return(Some(result)));
        }
        ctx.function.return_type = self.typed.type_of(body).unwrap_or(TypeId::UNTYPED);
        self.pending_functions.push(ctx.function);

        let span = arena.get(body).span;
        outer.emit(TypeId::UNTYPED, InstKind::MakeClosure { function: name, captures: Vec::new() }, span)
    }

    /// Lowers `node` in expression position, returning the `ValueId`
    /// its evaluation produces. Callers in statement position (a
    /// sequence's non-final members) are free to ignore the result.
    #[allow(clippy::too_many_lines)]
    fn lower_expr(&mut self, arena: &NodeArena, ctx: &mut FnCtx, node: NodeId) -> ValueId {
        let span = arena.get(node).span;
        let ty = self.typed.type_of(node).unwrap_or(TypeId::UNTYPED);

        match arena.get(node).kind.clone() {
            NodeKind::Literal(literal) => self.lower_literal(ctx, ty, &literal, span),

            NodeKind::IdentifierRead { name } => {
                if let Some(&slot) = ctx.locals.get(&name) {
                    ctx.emit(ty, InstKind::LoadLocal(slot), span)
                } else {
                    let receiver = ctx.emit(TypeId::UNTYPED, InstKind::LoadSelf, span);
                    ctx.emit(ty, InstKind::MethodCall { receiver, method: name, args: Vec::new(), block: None }, span)
                }
            }
            NodeKind::IdentifierWrite { name, value } => {
                let value_id = self.lower_expr(arena, ctx, value);
                let slot = *ctx.locals.entry(name).or_insert_with(|| ctx.function.alloc_slot(ty));
                ctx.emit(ty, InstKind::StoreLocal(slot, value_id), span)
            }

            NodeKind::GlobalRead { name } => ctx.emit(ty, InstKind::LoadGlobal(name), span),
            NodeKind::GlobalWrite { name, value } => {
                let value_id = self.lower_expr(arena, ctx, value);
                ctx.emit(ty, InstKind::StoreGlobal(name, value_id), span)
            }

            NodeKind::InstanceVarRead { name } => {
                let receiver = ctx.emit(TypeId::UNTYPED, InstKind::LoadSelf, span);
                ctx.emit(ty, InstKind::LoadField { receiver, field: name }, span)
            }
            NodeKind::InstanceVarWrite { name, value } => {
                let receiver = ctx.emit(TypeId::UNTYPED, InstKind::LoadSelf, span);
                let value_id = self.lower_expr(arena, ctx, value);
                ctx.emit(ty, InstKind::StoreField { receiver, field: name, value: value_id }, span)
            }

            NodeKind::ClassVarRead { name } => {
                let class = ctx.self_class.unwrap_or_else(|| self.strings.intern("Object"));
                ctx.emit(ty, InstKind::LoadClassVar { class, name }, span)
            }
            NodeKind::ClassVarWrite { name, value } => {
                let class = ctx.self_class.unwrap_or_else(|| self.strings.intern("Object"));
                let value_id = self.lower_expr(arena, ctx, value);
                ctx.emit(ty, InstKind::StoreClassVar { class, name, value: value_id }, span)
            }

            NodeKind::ConstantPath { .. } => {
                let name = self.constant_name(arena, node).expect("ConstantPath always has segments");
                ctx.emit(ty, InstKind::LoadConstant(name), span)
            }

            NodeKind::SelfExpr => ctx.emit(ty, InstKind::LoadSelf, span),

            NodeKind::StatementSequence { statements } => {
                let mut last = ctx.emit(TypeId::NIL, InstKind::ConstNil, span);
                for stmt in statements {
                    if ctx.has_terminator() {
                        break;
                    }
                    last = self.lower_expr(arena, ctx, stmt);
                }
                last
            }

            NodeKind::If { condition, then_branch, else_branch } => {
                self.lower_if(arena, ctx, ty, condition, then_branch, else_branch, span)
            }

            NodeKind::WhileLoop { condition, body, is_post_condition } => {
                self.lower_while(arena, ctx, condition, body, is_post_condition, false, span)
            }
            NodeKind::UntilLoop { condition, body, is_post_condition } => {
                self.lower_while(arena, ctx, condition, body, is_post_condition, true, span)
            }

            NodeKind::ForLoop { binding, iterable, body } => {
                self.lower_for(arena, ctx, binding, iterable, body, span)
            }

            NodeKind::CaseWhen { subject, clauses, else_branch } => {
                self.lower_case(arena, ctx, ty, subject, &clauses, else_branch, span)
            }
            NodeKind::PatternMatch { subject, clauses, else_branch } => {
                self.lower_case(arena, ctx, ty, Some(subject), &clauses, else_branch, span)
            }

            NodeKind::Call { receiver, method, args, block, is_safe_navigation } => {
                self.lower_call(arena, ctx, ty, receiver, method, &args, block, is_safe_navigation, span)
            }

            NodeKind::Block { .. } => {
                // Only reachable if a block literal appears outside a call's
                // `block` slot (e.g. an isolated `{}` expression); lowered as
                // its own closure with no captures recorded yet.
                unreachable!("standalone Block nodes are lowered via their owning Call/ForLoop")
            }

            NodeKind::Yield { args } => {
                let arg_values = args.iter().map(|&a| self.lower_expr(arena, ctx, a)).collect();
                ctx.emit(ty, InstKind::Yield { args: arg_values }, span)
            }

            NodeKind::Return { value } => {
                let result = value.map(|v| self.lower_expr(arena, ctx, v));
                ctx.terminate(Terminator::Return(result));
                self.open_unreachable_block(ctx, span)
            }
            NodeKind::Break { value } => {
                let result = value.map(|v| self.lower_expr(arena, ctx, v));
                let after = ctx.loop_stack.last().map(|l| l.after).expect("break outside a loop");
                ctx.terminate(Terminator::Jump(after));
                result.unwrap_or_else(|| self.open_unreachable_block(ctx, span))
            }
            NodeKind::Next { value } => {
                let result = value.map(|v| self.lower_expr(arena, ctx, v));
                let header = ctx.loop_stack.last().map(|l| l.header).expect("next outside a loop");
                ctx.terminate(Terminator::Jump(header));
                result.unwrap_or_else(|| self.open_unreachable_block(ctx, span))
            }

            NodeKind::BinaryOp { op, lhs, rhs } => self.lower_binary_op(arena, ctx, ty, op, lhs, rhs, span),
            NodeKind::UnaryOp { op, operand } => {
                let value = self.lower_expr(arena, ctx, operand);
                let op = match op {
                    UnaryOperator::Neg => UnOp::Neg,
                    UnaryOperator::Not => UnOp::Not,
                    UnaryOperator::BitNot => UnOp::BitNot,
                };
                ctx.emit(ty, InstKind::UnOp { op, operand: value }, span)
            }

            NodeKind::Begin { body, rescues, else_branch, ensure } => {
                self.lower_begin(arena, ctx, ty, body, &rescues, else_branch, ensure, span)
            }

            // Splat/double-splat flattening is a call/literal-site concern
            // downstream (§9 notes native array/hash construction as
            // backend-defined); the builder only needs the inner value.
            NodeKind::Splat { value } | NodeKind::DoubleSplat { value } => self.lower_expr(arena, ctx, value),

            NodeKind::ArrayLiteral { elements } => {
                let values = elements.iter().map(|&e| self.lower_expr(arena, ctx, e)).collect();
                ctx.emit(ty, InstKind::ArrayLiteral(values), span)
            }
            NodeKind::HashLiteral { entries } => {
                let pairs = entries
                    .iter()
                    .filter_map(|(key, value)| {
                        let key = (*key)?;
                        let key_value = self.lower_expr(arena, ctx, key);
                        let value_value = self.lower_expr(arena, ctx, *value);
                        Some((key_value, value_value))
                    })
                    .collect();
                ctx.emit(ty, InstKind::HashLiteral(pairs), span)
            }

            NodeKind::MethodDef { .. } | NodeKind::ClassDef { .. } | NodeKind::ModuleDef { .. } => {
                unreachable!("definitions are lowered by build()/lower_class, not lower_expr")
            }
        }
    }

    fn lower_literal(&mut self, ctx: &mut FnCtx, ty: TypeId, literal: &LiteralValue, span: Span) -> ValueId {
        let kind = match literal {
            LiteralValue::Integer(v) => InstKind::ConstInt(*v),
            LiteralValue::Float(v) => InstKind::ConstFloat(*v),
            LiteralValue::String(s) => InstKind::ConstString(self.strings.intern(s)),
            LiteralValue::Symbol(atom) => InstKind::ConstSymbol(*atom),
            LiteralValue::Bool(v) => InstKind::ConstBool(*v),
            LiteralValue::Nil => InstKind::ConstNil,
        };
        ctx.emit(ty, kind, span)
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_if(
        &mut self,
        arena: &NodeArena,
        ctx: &mut FnCtx,
        ty: TypeId,
        condition: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
        span: Span,
    ) -> ValueId {
        let predicate = self.lower_expr(arena, ctx, condition);
        let then_block = ctx.function.alloc_block("if_then");
        let else_block = ctx.function.alloc_block("if_else");
        let merge = ctx.function.alloc_block("if_merge");
        ctx.terminate(Terminator::Branch { predicate, then_block, else_block });

        ctx.current = then_block;
        let then_value = self.lower_expr(arena, ctx, then_branch);
        let then_end = ctx.current;
        if !ctx.has_terminator() {
            ctx.terminate(Terminator::Jump(merge));
        }

        ctx.current = else_block;
        let else_value = match else_branch {
            Some(node) => self.lower_expr(arena, ctx, node),
            None => ctx.emit(TypeId::NIL, InstKind::ConstNil, span),
        };
        let else_end = ctx.current;
        if !ctx.has_terminator() {
            ctx.terminate(Terminator::Jump(merge));
        }

        ctx.current = merge;
        ctx.emit(
            ty,
            InstKind::Phi(vec![
                PhiEdge { from: then_end, value: then_value },
                PhiEdge { from: else_end, value: else_value },
            ]),
            span,
        )
    }

    fn lower_while(
        &mut self,
        arena: &NodeArena,
        ctx: &mut FnCtx,
        condition: NodeId,
        body: NodeId,
        is_post_condition: bool,
        negate: bool,
        span: Span,
    ) -> ValueId {
        let header = ctx.function.alloc_block("loop_header");
        let loop_body = ctx.function.alloc_block("loop_body");
        let after = ctx.function.alloc_block("loop_after");

        if is_post_condition {
            ctx.terminate(Terminator::Jump(loop_body));
        } else {
            ctx.terminate(Terminator::Jump(header));
        }

        ctx.current = header;
        let predicate = self.lower_loop_predicate(arena, ctx, condition, negate);
        ctx.terminate(Terminator::Branch { predicate, then_block: loop_body, else_block: after });

        ctx.current = loop_body;
        ctx.loop_stack.push(LoopTargets { header, after });
        self.lower_expr(arena, ctx, body);
        ctx.loop_stack.pop();
        if !ctx.has_terminator() {
            ctx.terminate(Terminator::Jump(header));
        }

        ctx.current = after;
        ctx.emit(TypeId::NIL, InstKind::ConstNil, span)
    }

    fn lower_loop_predicate(&mut self, arena: &NodeArena, ctx: &mut FnCtx, condition: NodeId, negate: bool) -> ValueId {
        let value = self.lower_expr(arena, ctx, condition);
        if negate {
            let span = arena.get(condition).span;
            ctx.emit(TypeId::BOOL, InstKind::UnOp { op: UnOp::Not, operand: value }, span)
        } else {
            value
        }
    }

    fn lower_for(&mut self, arena: &NodeArena, ctx: &mut FnCtx, binding: Atom, iterable: NodeId, body: NodeId, span: Span) -> ValueId {
        let iterable_value = self.lower_expr(arena, ctx, iterable);
        let each = self.strings.intern("each");
        let param = Param { name: binding, kind: ParamKind::Required, default: None, span };
        let block_value = self.lower_block(arena, ctx, std::slice::from_ref(&param), body);
        ctx.emit(TypeId::NIL, InstKind::MethodCall { receiver: iterable_value, method: each, args: vec![block_value], block: None }, span)
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_case(
        &mut self,
        arena: &NodeArena,
        ctx: &mut FnCtx,
        ty: TypeId,
        subject: Option<NodeId>,
        clauses: &[konpeito_ast::CaseClause],
        else_branch: Option<NodeId>,
        span: Span,
    ) -> ValueId {
        let subject_value = subject.map(|s| self.lower_expr(arena, ctx, s));
        let merge = ctx.function.alloc_block("case_merge");
        let mut edges = Vec::new();

        for clause in clauses {
            let test_block = ctx.function.alloc_block("case_test");
            let body_block = ctx.function.alloc_block("case_body");
            let next_test = ctx.function.alloc_block("case_next");
            if !ctx.has_terminator() {
                ctx.terminate(Terminator::Jump(test_block));
            }

            ctx.current = test_block;
            let mut matched = ctx.emit(TypeId::BOOL, InstKind::ConstBool(false), span);
            for &pattern in &clause.patterns {
                let pattern_value = self.lower_expr(arena, ctx, pattern);
                let equal = match subject_value {
                    Some(subject_value) => {
                        ctx.emit(TypeId::BOOL, InstKind::BinOp { op: BinOp::Eq, lhs: subject_value, rhs: pattern_value }, span)
                    }
                    None => pattern_value,
                };
                matched = ctx.emit(TypeId::BOOL, InstKind::BinOp { op: BinOp::BitOr, lhs: matched, rhs: equal }, span);
            }
            if let Some(guard) = clause.guard {
                let guard_value = self.lower_expr(arena, ctx, guard);
                matched = ctx.emit(TypeId::BOOL, InstKind::BinOp { op: BinOp::BitAnd, lhs: matched, rhs: guard_value }, span);
            }
            ctx.terminate(Terminator::Branch { predicate: matched, then_block: body_block, else_block: next_test });

            ctx.current = body_block;
            let body_value = self.lower_expr(arena, ctx, clause.body);
            let body_end = ctx.current;
            if !ctx.has_terminator() {
                ctx.terminate(Terminator::Jump(merge));
            }
            edges.push(PhiEdge { from: body_end, value: body_value });

            ctx.current = next_test;
        }

        // `ctx.current` is now the last clause's fallthrough block (or the
        // whole-case entry, if there were no clauses at all).
        match else_branch {
            Some(node) => {
                let else_value = self.lower_expr(arena, ctx, node);
                let else_end = ctx.current;
                if !ctx.has_terminator() {
                    ctx.terminate(Terminator::Jump(merge));
                }
                edges.push(PhiEdge { from: else_end, value: else_value });
            }
            None => ctx.terminate(Terminator::RaiseNoMatch),
        }

        ctx.current = merge;
        ctx.emit(ty, InstKind::Phi(edges), span)
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_call(
        &mut self,
        arena: &NodeArena,
        ctx: &mut FnCtx,
        ty: TypeId,
        receiver: Option<NodeId>,
        method: Atom,
        args: &[NodeId],
        block: Option<NodeId>,
        is_safe_navigation: bool,
        span: Span,
    ) -> ValueId {
        let receiver_value = match receiver {
            Some(node) => self.lower_expr(arena, ctx, node),
            None => ctx.emit(TypeId::UNTYPED, InstKind::LoadSelf, span),
        };
        let arg_values: Vec<_> = args.iter().map(|&a| self.lower_expr(arena, ctx, a)).collect();
        let block_value = block.and_then(|b| match &arena.get(b).kind {
            NodeKind::Block { params, body } => {
                let params = params.clone();
                let body = *body;
                Some(self.lower_block(arena, ctx, &params, body))
            }
            _ => None,
        });

        if !is_safe_navigation {
            return ctx.emit(
                ty,
                InstKind::MethodCall { receiver: receiver_value, method, args: arg_values, block: block_value },
                span,
            );
        }

        let nil_literal = ctx.emit(TypeId::NIL, InstKind::ConstNil, span);
        let is_nil = ctx.emit(TypeId::BOOL, InstKind::BinOp { op: BinOp::Eq, lhs: receiver_value, rhs: nil_literal }, span);
        let call_block = ctx.function.alloc_block("safe_nav_call");
        let nil_block = ctx.function.alloc_block("safe_nav_nil");
        let merge = ctx.function.alloc_block("safe_nav_merge");
        ctx.terminate(Terminator::Branch { predicate: is_nil, then_block: nil_block, else_block: call_block });

        ctx.current = call_block;
        let call_value = ctx.emit(
            ty,
            InstKind::MethodCall { receiver: receiver_value, method, args: arg_values, block: block_value },
            span,
        );
        let call_end = ctx.current;
        ctx.terminate(Terminator::Jump(merge));

        ctx.current = nil_block;
        let nil_value = ctx.emit(TypeId::NIL, InstKind::ConstNil, span);
        ctx.terminate(Terminator::Jump(merge));

        ctx.current = merge;
        ctx.emit(
            ty,
            InstKind::Phi(vec![
                PhiEdge { from: call_end, value: call_value },
                PhiEdge { from: nil_block, value: nil_value },
            ]),
            span,
        )
    }

    fn lower_binary_op(
        &mut self,
        arena: &NodeArena,
        ctx: &mut FnCtx,
        ty: TypeId,
        op: BinaryOperator,
        lhs: NodeId,
        rhs: NodeId,
        span: Span,
    ) -> ValueId {
        if matches!(op, BinaryOperator::And | BinaryOperator::Or) {
            return self.lower_short_circuit(arena, ctx, ty, op, lhs, rhs, span);
        }
        let lhs_value = self.lower_expr(arena, ctx, lhs);
        let rhs_value = self.lower_expr(arena, ctx, rhs);
        let op = match op {
            BinaryOperator::Add => BinOp::Add,
            BinaryOperator::Sub => BinOp::Sub,
            BinaryOperator::Mul => BinOp::Mul,
            BinaryOperator::Div => BinOp::Div,
            BinaryOperator::Mod => BinOp::Mod,
            BinaryOperator::Pow => BinOp::Pow,
            BinaryOperator::Eq => BinOp::Eq,
            BinaryOperator::Neq => BinOp::Neq,
            BinaryOperator::Lt => BinOp::Lt,
            BinaryOperator::Lte => BinOp::Lte,
            BinaryOperator::Gt => BinOp::Gt,
            BinaryOperator::Gte => BinOp::Gte,
            BinaryOperator::Cmp => BinOp::Cmp,
            BinaryOperator::BitAnd => BinOp::BitAnd,
            BinaryOperator::BitOr => BinOp::BitOr,
            BinaryOperator::BitXor => BinOp::BitXor,
            BinaryOperator::Shl => BinOp::Shl,
            BinaryOperator::Shr => BinOp::Shr,
            BinaryOperator::And | BinaryOperator::Or => unreachable!("handled above"),
        };
        ctx.emit(ty, InstKind::BinOp { op, lhs: lhs_value, rhs: rhs_value }, span)
    }

    fn lower_short_circuit(
        &mut self,
        arena: &NodeArena,
        ctx: &mut FnCtx,
        ty: TypeId,
        op: BinaryOperator,
        lhs: NodeId,
        rhs: NodeId,
        span: Span,
    ) -> ValueId {
        let lhs_value = self.lower_expr(arena, ctx, lhs);
        let lhs_end = ctx.current;
        let rhs_block = ctx.function.alloc_block("logical_rhs");
        let merge = ctx.function.alloc_block("logical_merge");

        let (then_block, else_block) = if matches!(op, BinaryOperator::And) {
            (rhs_block, merge)
        } else {
            (merge, rhs_block)
        };
        ctx.terminate(Terminator::Branch { predicate: lhs_value, then_block, else_block });

        ctx.current = rhs_block;
        let rhs_value = self.lower_expr(arena, ctx, rhs);
        let rhs_end = ctx.current;
        if !ctx.has_terminator() {
            ctx.terminate(Terminator::Jump(merge));
        }

        ctx.current = merge;
        ctx.emit(
            ty,
            InstKind::Phi(vec![PhiEdge { from: lhs_end, value: lhs_value }, PhiEdge { from: rhs_end, value: rhs_value }]),
            span,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_begin(
        &mut self,
        arena: &NodeArena,
        ctx: &mut FnCtx,
        ty: TypeId,
        body: NodeId,
        rescues: &[konpeito_ast::RescueClause],
        else_branch: Option<NodeId>,
        ensure: Option<NodeId>,
        span: Span,
    ) -> ValueId {
        let body_start_block_count = ctx.function.blocks.len();
        let body_value = self.lower_expr(arena, ctx, body);
        let body_value = match else_branch {
            Some(node) => self.lower_expr(arena, ctx, node),
            None => body_value,
        };
        let body_end = ctx.current;
        let protected = (body_start_block_count..ctx.function.blocks.len()).map(BlockId::from_usize).collect();

        let pre_merge = ctx.function.alloc_block("begin_merge");
        if !ctx.has_terminator() {
            ctx.terminate(Terminator::Jump(pre_merge));
        }

        let handler_block = ctx.function.alloc_block("rescue_handler");
        ctx.current = handler_block;
        let handler_value = match rescues.first() {
            Some(clause) => self.lower_expr(arena, ctx, clause.body),
            None => ctx.emit(TypeId::NIL, InstKind::ConstNil, span),
        };
        let handler_end = ctx.current;
        if !ctx.has_terminator() {
            ctx.terminate(Terminator::Jump(pre_merge));
        }

        ctx.current = pre_merge;
        let value = ctx.emit(
            ty,
            InstKind::Phi(vec![
                PhiEdge { from: body_end, value: body_value },
                PhiEdge { from: handler_end, value: handler_value },
            ]),
            span,
        );

        let ensure_block = ensure.map(|ensure_node| {
            let block = ctx.function.alloc_block("ensure");
            ctx.terminate(Terminator::Jump(block));
            ctx.current = block;
            self.lower_expr(arena, ctx, ensure_node);
            if !ctx.has_terminator() {
                let after = ctx.function.alloc_block("after_ensure");
                ctx.terminate(Terminator::Jump(after));
                ctx.current = after;
            }
            block
        });

        ctx.function.handlers.push(ExceptionRegion { protected, handler: handler_block, ensure: ensure_block });
        value
    }

    fn open_unreachable_block(&mut self, ctx: &mut FnCtx, span: Span) -> ValueId {
        let block = ctx.function.alloc_block("unreachable");
        ctx.current = block;
        ctx.emit(TypeId::NIL, InstKind::ConstNil, span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_infer::build_typed_tree;
    use konpeito_types::{TypeInterner, TypeVarTable};

    fn typed_tree_for(arena: &NodeArena, types: &[(NodeId, TypeId)]) -> TypedTree {
        let mut node_types = FxHashMap::default();
        for &(node, ty) in types {
            node_types.insert(node, ty);
        }
        let mut interner = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let mut diagnostics = Vec::new();
        build_typed_tree(arena, &node_types, &mut interner, &mut vars, "main.rb", &mut diagnostics)
    }

    /// §8 S1: `def double(x); x * 2; end` lowers to one function, one
    /// block, and a return of the multiply.
    #[test]
    fn double_lowers_to_single_block_with_multiply_and_return() {
        let mut strings = Interner::new();
        let x = strings.intern("x");
        let double = strings.intern("double");

        let mut arena = NodeArena::new();
        let x_read = arena.alloc(NodeKind::IdentifierRead { name: x }, Span::new(0, 1));
        let two = arena.alloc(NodeKind::Literal(LiteralValue::Integer(2)), Span::new(2, 3));
        let mul = arena.alloc(
            NodeKind::BinaryOp { op: BinaryOperator::Mul, lhs: x_read, rhs: two },
            Span::new(0, 3),
        );
        let param = Param { name: x, kind: ParamKind::Required, default: None, span: Span::new(0, 1) };
        let method = arena.alloc(
            NodeKind::MethodDef { name: double, params: vec![param], body: mul, is_singleton: false },
            Span::new(0, 3),
        );

        let tree = typed_tree_for(
            &arena,
            &[(x_read, TypeId::INTEGER), (two, TypeId::INTEGER), (mul, TypeId::INTEGER)],
        );
        let registry = SignatureRegistry::new(&mut strings);
        let program = IRBuilder::new(&mut strings, &tree, &registry).build(&arena, &[method]);

        let function = program.function_named(double).expect("double was lowered");
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.return_type, TypeId::INTEGER);

        let entry = function.block(BlockId::ENTRY);
        assert!(matches!(entry.instructions[0].kind, InstKind::LoadLocal(_)));
        assert!(matches!(entry.instructions[1].kind, InstKind::ConstInt(2)));
        assert!(matches!(entry.instructions[2].kind, InstKind::BinOp { op: BinOp::Mul, .. }));
        assert!(matches!(entry.terminator, Some(Terminator::Return(Some(_)))));
    }

    /// An `if` used in expression position joins both arms with a Phi
    /// at the merge block (§4.7 "insert a Phi at `merge`").
    #[test]
    fn if_in_expression_position_joins_arms_with_phi() {
        let mut strings = Interner::new();
        let s = strings.intern("s");
        let len = strings.intern("len");

        let mut arena = NodeArena::new();
        let cond = arena.alloc(NodeKind::IdentifierRead { name: s }, Span::new(0, 1));
        let then_branch = arena.alloc(NodeKind::Literal(LiteralValue::Integer(1)), Span::new(1, 2));
        let else_branch = arena.alloc(NodeKind::Literal(LiteralValue::Integer(0)), Span::new(2, 3));
        let if_node = arena.alloc(
            NodeKind::If { condition: cond, then_branch, else_branch: Some(else_branch) },
            Span::new(0, 3),
        );
        let method = arena.alloc(
            NodeKind::MethodDef { name: len, params: Vec::new(), body: if_node, is_singleton: false },
            Span::new(0, 3),
        );

        let tree = typed_tree_for(
            &arena,
            &[
                (cond, TypeId::UNTYPED),
                (then_branch, TypeId::INTEGER),
                (else_branch, TypeId::INTEGER),
                (if_node, TypeId::INTEGER),
            ],
        );
        let registry = SignatureRegistry::new(&mut strings);
        let program = IRBuilder::new(&mut strings, &tree, &registry).build(&arena, &[method]);

        let function = program.function_named(len).expect("len was lowered");
        assert_eq!(function.blocks.len(), 4, "entry, then, else, merge");
        let merge = function.blocks.last().expect("merge block exists");
        let phi = merge
            .instructions
            .iter()
            .find(|i| matches!(i.kind, InstKind::Phi(_)))
            .expect("merge block has a Phi");
        let InstKind::Phi(edges) = &phi.kind else { unreachable!() };
        assert_eq!(edges.len(), 2);
    }
}
