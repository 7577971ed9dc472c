//! Loop-invariant code motion (§4.10): detect natural loops via
//! dominator analysis, determine which of their instructions are both
//! pure and invariant, and hoist those into a pre-header block
//! inserted immediately before the loop's header.
//!
//! Grounded in `konpeito_ir::Dominators`, whose own doc comment names
//! this exact use ("shared by... `konpeito-opt`'s natural-loop
//! detection for LICM"). The purity whitelist and the "all operands
//! defined outside the loop, or themselves invariant" fixed point
//! follow §4.10 steps 2-3 directly; only loops with a single entry
//! edge into the header are hoisted from, since every loop
//! `konpeito_ir::builder` lowers has exactly one predecessor outside
//! the loop (the block preceding the `if`-less `while`/`until`) and a
//! second, multi-entry shape never arises from this source language's
//! structured control flow.

use konpeito_common::Interner;
use konpeito_ir::{BasicBlock, BlockId, Dominators, Function, InstKind, Instruction, Program, Terminator, ValueId};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Default, Debug, Clone, Copy)]
pub struct LicmStats {
    pub hoisted_count: usize,
}

/// Method names §4.10's purity whitelist calls out by name ("length/size
/// queries"). Any other method call is conservatively treated as
/// possibly side-effecting.
const PURE_BUILTIN_METHODS: &[&str] = &["length", "size"];

pub fn run_licm(program: &mut Program, strings: &Interner) -> LicmStats {
    let mut stats = LicmStats::default();
    for function in &mut program.functions {
        stats.hoisted_count += run_licm_function(function, strings);
    }
    stats
}

fn run_licm_function(function: &mut Function, strings: &Interner) -> usize {
    let mut hoisted = 0;
    for (header, body) in natural_loops(function) {
        hoisted += hoist_loop(function, header, &body, strings);
    }
    hoisted
}

/// One natural loop per distinct header, bodies from every back edge
/// sharing that header merged together (§4.10 step 1).
fn natural_loops(function: &Function) -> Vec<(BlockId, FxHashSet<BlockId>)> {
    let doms = Dominators::compute(function);
    let mut bodies: FxHashMap<BlockId, FxHashSet<BlockId>> = FxHashMap::default();
    let mut order: Vec<BlockId> = Vec::new();
    let preds = function.predecessors();

    for tail_index in 0..function.blocks.len() {
        let tail = BlockId::from_usize(tail_index);
        for header in function.successors(tail) {
            if !doms.dominates(header, tail) {
                continue;
            }
            let body = natural_loop_body(&preds, header, tail);
            let entry = bodies.entry(header).or_insert_with(|| {
                order.push(header);
                FxHashSet::default()
            });
            entry.extend(body);
        }
    }

    order.into_iter().map(|header| (header, bodies.remove(&header).unwrap())).collect()
}

fn natural_loop_body(preds: &[Vec<BlockId>], header: BlockId, tail: BlockId) -> FxHashSet<BlockId> {
    let mut body = FxHashSet::default();
    body.insert(header);
    body.insert(tail);
    let mut stack = vec![tail];
    while let Some(block) = stack.pop() {
        for &pred in &preds[block.index()] {
            if body.insert(pred) {
                stack.push(pred);
            }
        }
    }
    body
}

fn hoist_loop(function: &mut Function, header: BlockId, body: &FxHashSet<BlockId>, strings: &Interner) -> usize {
    let preds = function.predecessors();
    let outside_preds: Vec<BlockId> = preds[header.index()].iter().copied().filter(|p| !body.contains(p)).collect();
    let [entry_pred] = outside_preds.as_slice() else {
        // Multi-entry loop header: not producible by this source
        // language's structured control flow, so nothing is hoisted
        // rather than risk splitting a Phi edge incorrectly.
        return 0;
    };
    let entry_pred = *entry_pred;

    let invariant = invariant_pure_values(function, body, strings);
    if invariant.is_empty() {
        return 0;
    }

    let doms = Dominators::compute(function);
    let mut to_hoist: Vec<(BlockId, usize)> = Vec::new();
    for block in doms.reverse_postorder() {
        if !body.contains(&block) {
            continue;
        }
        for (index, inst) in function.block(block).instructions.iter().enumerate() {
            if invariant.contains(&inst.result) {
                to_hoist.push((block, index));
            }
        }
    }
    if to_hoist.is_empty() {
        return 0;
    }

    let mut hoisted_instructions: Vec<Instruction> = Vec::with_capacity(to_hoist.len());
    let mut removals: FxHashMap<BlockId, FxHashSet<usize>> = FxHashMap::default();
    for &(block, index) in &to_hoist {
        hoisted_instructions.push(function.block(block).instructions[index].clone());
        removals.entry(block).or_default().insert(index);
    }
    for (block, indices) in &removals {
        let instructions = &mut function.block_mut(*block).instructions;
        let mut kept = Vec::with_capacity(instructions.len() - indices.len());
        for (index, inst) in instructions.drain(..).enumerate() {
            if !indices.contains(&index) {
                kept.push(inst);
            }
        }
        *instructions = kept;
    }

    let preheader = function.alloc_block(format!("licm.preheader.{}", header.index()));
    retarget_terminator(function.block_mut(entry_pred), header, preheader);
    retarget_phi_from(function, header, entry_pred, preheader);
    function.block_mut(preheader).instructions = hoisted_instructions;
    function.block_mut(preheader).terminator = Some(Terminator::Jump(header));

    to_hoist.len()
}

/// §4.10 steps 2-3: a pure instruction is invariant once every operand
/// it reads is either defined outside `body` (including function
/// parameters, which have no defining instruction at all) or is itself
/// already known invariant. Runs to a fixed point since an invariant
/// instruction can make a later one invariant in turn.
fn invariant_pure_values(function: &Function, body: &FxHashSet<BlockId>, strings: &Interner) -> FxHashSet<ValueId> {
    let mut defined_in: FxHashMap<ValueId, BlockId> = FxHashMap::default();
    for &block in body {
        for inst in &function.block(block).instructions {
            defined_in.insert(inst.result, block);
        }
    }

    let mut invariant: FxHashSet<ValueId> = FxHashSet::default();
    loop {
        let mut changed = false;
        for &block in body {
            for inst in &function.block(block).instructions {
                if invariant.contains(&inst.result) || !is_pure(&inst.kind, strings) {
                    continue;
                }
                let all_invariant = operands_of(&inst.kind).into_iter().all(|operand| match defined_in.get(&operand) {
                    None => true,
                    Some(def_block) => !body.contains(def_block) || invariant.contains(&operand),
                });
                if all_invariant {
                    invariant.insert(inst.result);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    invariant
}

fn is_pure(kind: &InstKind, strings: &Interner) -> bool {
    match kind {
        InstKind::ConstInt(_)
        | InstKind::ConstFloat(_)
        | InstKind::ConstBool(_)
        | InstKind::ConstNil
        | InstKind::ConstString(_)
        | InstKind::ConstSymbol(_)
        | InstKind::BinOp { .. }
        | InstKind::UnOp { .. } => true,
        InstKind::MethodCall { method, args, block: None, .. } if args.is_empty() => {
            PURE_BUILTIN_METHODS.contains(&strings.resolve(*method))
        }
        _ => false,
    }
}

/// The `ValueId`s an instruction reads, for the invariance fixed point.
/// Mirrors `inline::remap_kind`'s operand enumeration but collects
/// rather than rewrites.
fn operands_of(kind: &InstKind) -> Vec<ValueId> {
    match kind {
        InstKind::BinOp { lhs, rhs, .. } => vec![*lhs, *rhs],
        InstKind::UnOp { operand, .. } => vec![*operand],
        InstKind::MethodCall { receiver, args, .. } => {
            let mut v = vec![*receiver];
            v.extend(args);
            v
        }
        _ => Vec::new(),
    }
}

fn retarget_terminator(block: &mut BasicBlock, from: BlockId, to: BlockId) {
    match &mut block.terminator {
        Some(Terminator::Jump(target)) if *target == from => *target = to,
        Some(Terminator::Branch { then_block, else_block, .. }) => {
            if *then_block == from {
                *then_block = to;
            }
            if *else_block == from {
                *else_block = to;
            }
        }
        _ => {}
    }
}

fn retarget_phi_from(function: &mut Function, header: BlockId, from: BlockId, to: BlockId) {
    for inst in &mut function.block_mut(header).instructions {
        if let InstKind::Phi(edges) = &mut inst.kind {
            for edge in edges.iter_mut() {
                if edge.from == from {
                    edge.from = to;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_common::Span;
    use konpeito_ir::{BinOp, ParamSlot, Terminator};
    use konpeito_types::TypeId;

    /// `before -> header(test) -> body -> header`, with `arr.length`
    /// computed inside `body` from a value defined before the loop —
    /// the shape §8 S5 describes.
    fn loop_with_invariant_length() -> (Function, Interner) {
        let mut strings = Interner::new();
        let name = strings.intern("with_loop");
        let length = strings.intern("length");
        let mut function = Function::new(name);
        function.params.push(ParamSlot { name: strings.intern("arr"), slot: konpeito_ir::SlotId::from_usize(0), ty: TypeId::UNTYPED });

        let header = function.alloc_block("header");
        let body = function.alloc_block("body");
        let after = function.alloc_block("after");

        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Jump(header));

        let cond = ValueId::from_usize(10);
        function.block_mut(header).instructions.push(Instruction {
            result: cond,
            ty: TypeId::UNTYPED,
            kind: InstKind::ConstBool(true),
            span: Span::default(),
        });
        function.block_mut(header).terminator =
            Some(Terminator::Branch { predicate: cond, then_block: body, else_block: after });

        let len_value = ValueId::from_usize(11);
        function.block_mut(body).instructions.push(Instruction {
            result: len_value,
            ty: TypeId::UNTYPED,
            kind: InstKind::MethodCall { receiver: ValueId::from_usize(0), method: length, args: vec![], block: None },
            span: Span::default(),
        });
        function.block_mut(body).terminator = Some(Terminator::Jump(header));

        function.block_mut(after).terminator = Some(Terminator::Return(None));

        (function, strings)
    }

    #[test]
    fn hoists_pure_invariant_call_into_preheader() {
        let (mut function, strings) = loop_with_invariant_length();
        let hoisted = run_licm_function(&mut function, &strings);
        assert_eq!(hoisted, 1);

        let preheader = function.blocks.iter().find(|b| b.label.starts_with("licm.preheader")).expect("preheader inserted");
        assert_eq!(preheader.instructions.len(), 1);
        assert!(matches!(preheader.instructions[0].kind, InstKind::MethodCall { .. }));
    }

    #[test]
    fn does_not_hoist_when_nothing_is_invariant() {
        let mut strings = Interner::new();
        let name = strings.intern("f");
        let add = strings.intern("add");
        let _ = add;
        let mut function = Function::new(name);
        let header = function.alloc_block("header");
        let body = function.alloc_block("body");
        let after = function.alloc_block("after");
        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Jump(header));
        let cond = ValueId::from_usize(5);
        function.block_mut(header).instructions.push(Instruction {
            result: cond,
            ty: TypeId::UNTYPED,
            kind: InstKind::ConstBool(true),
            span: Span::default(),
        });
        function.block_mut(header).terminator =
            Some(Terminator::Branch { predicate: cond, then_block: body, else_block: after });
        // `body` only mutates a field via `StoreField`, never represented
        // as pure here, so nothing should hoist.
        function.block_mut(body).instructions.push(Instruction {
            result: ValueId::from_usize(6),
            ty: TypeId::UNTYPED,
            kind: InstKind::StoreField { receiver: ValueId::from_usize(0), field: strings.intern("x"), value: cond },
            span: Span::default(),
        });
        function.block_mut(body).terminator = Some(Terminator::Jump(header));
        function.block_mut(after).terminator = Some(Terminator::Return(None));

        let hoisted = run_licm_function(&mut function, &strings);
        assert_eq!(hoisted, 0);
        assert!(!function.blocks.iter().any(|b| b.label.starts_with("licm.preheader")));
    }

    #[test]
    fn binop_on_pre_loop_values_is_invariant() {
        let mut strings = Interner::new();
        let name = strings.intern("g");
        let mut function = Function::new(name);
        let a = ValueId::from_usize(0);
        let b = ValueId::from_usize(1);
        function.block_mut(BlockId::ENTRY).instructions.push(Instruction {
            result: a,
            ty: TypeId::UNTYPED,
            kind: InstKind::ConstInt(1),
            span: Span::default(),
        });
        function.block_mut(BlockId::ENTRY).instructions.push(Instruction {
            result: b,
            ty: TypeId::UNTYPED,
            kind: InstKind::ConstInt(2),
            span: Span::default(),
        });
        let header = function.alloc_block("header");
        let body = function.alloc_block("body");
        let after = function.alloc_block("after");
        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Jump(header));
        let cond = ValueId::from_usize(10);
        function.block_mut(header).instructions.push(Instruction {
            result: cond,
            ty: TypeId::UNTYPED,
            kind: InstKind::ConstBool(true),
            span: Span::default(),
        });
        function.block_mut(header).terminator =
            Some(Terminator::Branch { predicate: cond, then_block: body, else_block: after });
        let sum = ValueId::from_usize(11);
        function.block_mut(body).instructions.push(Instruction {
            result: sum,
            ty: TypeId::UNTYPED,
            kind: InstKind::BinOp { op: BinOp::Add, lhs: a, rhs: b },
            span: Span::default(),
        });
        function.block_mut(body).terminator = Some(Terminator::Jump(header));
        function.block_mut(after).terminator = Some(Terminator::Return(None));

        let hoisted = run_licm_function(&mut function, &strings);
        assert_eq!(hoisted, 1);
    }
}
