//! Merging each dependency-ordered file's executable tree into the one
//! arena whole-program inference and IR lowering expect (§4.4: "a
//! merged parsed tree").
//!
//! `NodeId`s are never valid across two arenas, so merging means
//! re-allocating every node from each file's arena into a shared one,
//! shifting every `NodeId` a node's kind contains by that file's
//! starting offset. `NodeArena::alloc` always hands out ids in
//! allocation order, so replaying a file's nodes in its own order into
//! the combined arena reproduces the same relative structure — file-local
//! id `i` lands at combined id `offset + i`.

use konpeito_ast::{CaseClause, NodeArena, NodeId, NodeKind, Param, RescueClause};
use konpeito_common::Span;
use smallvec::SmallVec;

/// One file's already-parsed tree, handed to [`merge_parsed_files`] in
/// dependency post-order.
pub struct ParsedFile {
    pub arena: NodeArena,
    /// This file's top-level statements/definitions, in source order.
    pub roots: Vec<NodeId>,
}

/// The merged tree: one arena holding every file's nodes, the flat list
/// of every file's top-level roots in file order (what `IRBuilder::build`
/// walks), and a synthetic `StatementSequence` root wrapping all of them
/// (what the single-root `Inferrer::declare`/`infer` walk consumes).
pub struct MergedTree {
    pub arena: NodeArena,
    pub top_level_roots: Vec<NodeId>,
    pub inference_root: NodeId,
}

/// Re-base and append every node of `file` onto the end of `combined`,
/// returning the offset applied to this file's ids.
fn append_file(combined: &mut NodeArena, file: NodeArena) -> u32 {
    let offset = combined.len() as u32;
    for (_, node) in file.iter() {
        let kind = offset_kind(node.kind.clone(), offset);
        combined.alloc(kind, node.span);
    }
    offset
}

fn off(id: NodeId, delta: u32) -> NodeId {
    id.offset(delta)
}

fn off_opt(id: Option<NodeId>, delta: u32) -> Option<NodeId> {
    id.map(|i| i.offset(delta))
}

fn off_vec(ids: Vec<NodeId>, delta: u32) -> Vec<NodeId> {
    ids.into_iter().map(|i| i.offset(delta)).collect()
}

fn off_params(params: Vec<Param>, delta: u32) -> Vec<Param> {
    params
        .into_iter()
        .map(|p| Param { default: off_opt(p.default, delta), ..p })
        .collect()
}

fn off_clauses(clauses: Vec<CaseClause>, delta: u32) -> Vec<CaseClause> {
    clauses
        .into_iter()
        .map(|c| CaseClause {
            patterns: c.patterns.into_iter().map(|p| p.offset(delta)).collect::<SmallVec<[NodeId; 2]>>(),
            guard: off_opt(c.guard, delta),
            body: off(c.body, delta),
        })
        .collect()
}

fn off_rescues(rescues: Vec<RescueClause>, delta: u32) -> Vec<RescueClause> {
    rescues
        .into_iter()
        .map(|r| RescueClause {
            exception_classes: r
                .exception_classes
                .into_iter()
                .map(|c| c.offset(delta))
                .collect::<SmallVec<[NodeId; 1]>>(),
            binding: r.binding,
            body: off(r.body, delta),
        })
        .collect()
}

/// Shift every `NodeId` embedded in `kind` by `delta`. Exhaustive over
/// `NodeKind` by construction — a new variant there needs an arm here
/// too.
fn offset_kind(kind: NodeKind, delta: u32) -> NodeKind {
    match kind {
        NodeKind::Literal(v) => NodeKind::Literal(v),
        NodeKind::IdentifierRead { name } => NodeKind::IdentifierRead { name },
        NodeKind::IdentifierWrite { name, value } => {
            NodeKind::IdentifierWrite { name, value: off(value, delta) }
        }
        NodeKind::GlobalRead { name } => NodeKind::GlobalRead { name },
        NodeKind::GlobalWrite { name, value } => NodeKind::GlobalWrite { name, value: off(value, delta) },
        NodeKind::InstanceVarRead { name } => NodeKind::InstanceVarRead { name },
        NodeKind::InstanceVarWrite { name, value } => {
            NodeKind::InstanceVarWrite { name, value: off(value, delta) }
        }
        NodeKind::ClassVarRead { name } => NodeKind::ClassVarRead { name },
        NodeKind::ClassVarWrite { name, value } => {
            NodeKind::ClassVarWrite { name, value: off(value, delta) }
        }
        NodeKind::ConstantPath { segments } => NodeKind::ConstantPath { segments },
        NodeKind::MethodDef { name, params, body, is_singleton } => NodeKind::MethodDef {
            name,
            params: off_params(params, delta),
            body: off(body, delta),
            is_singleton,
        },
        NodeKind::ClassDef { name, superclass, body } => NodeKind::ClassDef {
            name,
            superclass: off_opt(superclass, delta),
            body: off_vec(body, delta),
        },
        NodeKind::ModuleDef { name, body } => NodeKind::ModuleDef { name, body: off_vec(body, delta) },
        NodeKind::If { condition, then_branch, else_branch } => NodeKind::If {
            condition: off(condition, delta),
            then_branch: off(then_branch, delta),
            else_branch: off_opt(else_branch, delta),
        },
        NodeKind::WhileLoop { condition, body, is_post_condition } => NodeKind::WhileLoop {
            condition: off(condition, delta),
            body: off(body, delta),
            is_post_condition,
        },
        NodeKind::UntilLoop { condition, body, is_post_condition } => NodeKind::UntilLoop {
            condition: off(condition, delta),
            body: off(body, delta),
            is_post_condition,
        },
        NodeKind::ForLoop { binding, iterable, body } => NodeKind::ForLoop {
            binding,
            iterable: off(iterable, delta),
            body: off(body, delta),
        },
        NodeKind::CaseWhen { subject, clauses, else_branch } => NodeKind::CaseWhen {
            subject: off_opt(subject, delta),
            clauses: off_clauses(clauses, delta),
            else_branch: off_opt(else_branch, delta),
        },
        NodeKind::PatternMatch { subject, clauses, else_branch } => NodeKind::PatternMatch {
            subject: off(subject, delta),
            clauses: off_clauses(clauses, delta),
            else_branch: off_opt(else_branch, delta),
        },
        NodeKind::Call { receiver, method, args, block, is_safe_navigation } => NodeKind::Call {
            receiver: off_opt(receiver, delta),
            method,
            args: off_vec(args, delta),
            block: off_opt(block, delta),
            is_safe_navigation,
        },
        NodeKind::Block { params, body } => {
            NodeKind::Block { params: off_params(params, delta), body: off(body, delta) }
        }
        NodeKind::Yield { args } => NodeKind::Yield { args: off_vec(args, delta) },
        NodeKind::Return { value } => NodeKind::Return { value: off_opt(value, delta) },
        NodeKind::Break { value } => NodeKind::Break { value: off_opt(value, delta) },
        NodeKind::Next { value } => NodeKind::Next { value: off_opt(value, delta) },
        NodeKind::BinaryOp { op, lhs, rhs } => {
            NodeKind::BinaryOp { op, lhs: off(lhs, delta), rhs: off(rhs, delta) }
        }
        NodeKind::UnaryOp { op, operand } => NodeKind::UnaryOp { op, operand: off(operand, delta) },
        NodeKind::Begin { body, rescues, else_branch, ensure } => NodeKind::Begin {
            body: off(body, delta),
            rescues: off_rescues(rescues, delta),
            else_branch: off_opt(else_branch, delta),
            ensure: off_opt(ensure, delta),
        },
        NodeKind::Splat { value } => NodeKind::Splat { value: off(value, delta) },
        NodeKind::DoubleSplat { value } => NodeKind::DoubleSplat { value: off(value, delta) },
        NodeKind::ArrayLiteral { elements } => NodeKind::ArrayLiteral { elements: off_vec(elements, delta) },
        NodeKind::HashLiteral { entries } => NodeKind::HashLiteral {
            entries: entries
                .into_iter()
                .map(|(k, v)| (off_opt(k, delta), off(v, delta)))
                .collect(),
        },
        NodeKind::StatementSequence { statements } => {
            NodeKind::StatementSequence { statements: off_vec(statements, delta) }
        }
        NodeKind::SelfExpr => NodeKind::SelfExpr,
    }
}

/// Merge every file's tree, in the dependency resolver's post-order, into
/// one combined arena (§4.4).
pub fn merge_parsed_files(files: Vec<ParsedFile>) -> MergedTree {
    let mut combined = NodeArena::new();
    let mut top_level_roots = Vec::new();
    for file in files {
        let offset = append_file(&mut combined, file.arena);
        top_level_roots.extend(file.roots.into_iter().map(|r| r.offset(offset)));
    }
    let inference_root = combined.alloc(
        NodeKind::StatementSequence { statements: top_level_roots.clone() },
        Span::new(0, 0),
    );
    MergedTree { arena: combined, top_level_roots, inference_root }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_ast::LiteralValue;
    use konpeito_common::{Interner, Span};

    #[test]
    fn merges_two_files_preserving_relative_structure() {
        let mut strings = Interner::new();
        let name = strings.intern("x");

        let mut a = NodeArena::new();
        let a_lit = a.alloc(NodeKind::Literal(LiteralValue::Integer(1)), Span::new(0, 1));
        let a_root = a.alloc(NodeKind::IdentifierWrite { name, value: a_lit }, Span::new(0, 1));

        let mut b = NodeArena::new();
        let b_lit = b.alloc(NodeKind::Literal(LiteralValue::Integer(2)), Span::new(0, 1));
        let b_root = b.alloc(NodeKind::IdentifierWrite { name, value: b_lit }, Span::new(0, 1));

        let merged = merge_parsed_files(vec![
            ParsedFile { arena: a, roots: vec![a_root] },
            ParsedFile { arena: b, roots: vec![b_root] },
        ]);

        assert_eq!(merged.top_level_roots.len(), 2);
        assert_eq!(merged.arena.len(), 5); // 2 nodes/file + 1 synthesized root
        let NodeKind::IdentifierWrite { value, .. } = &merged.arena.get(merged.top_level_roots[1]).kind else {
            panic!("expected identifier write");
        };
        assert!(matches!(
            merged.arena.get(*value).kind,
            NodeKind::Literal(LiteralValue::Integer(2))
        ));
    }
}
