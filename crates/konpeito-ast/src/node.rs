//! The executable syntax tree (§6 "Consumed from the parser").
//!
//! Every node is stored in a [`NodeArena`] and referred to elsewhere by
//! [`NodeId`], mirroring the arena-index convention the signature
//! registry's declaration tables use for symbol references.

use konpeito_common::{Atom, Span};
use smallvec::SmallVec;

/// Index of a node within a [`NodeArena`]. Never valid across two
/// different arenas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) const fn from_usize(index: usize) -> Self {
        NodeId(index as u32)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Shift this id by `delta`. Only meaningful when re-basing every id
    /// from one file's arena into a combined arena that appends this
    /// file's nodes starting at index `delta` (the dependency resolver's
    /// "merged parsed tree", §4.4) — never useful within a single arena.
    #[must_use]
    pub const fn offset(self, delta: u32) -> Self {
        NodeId(self.0 + delta)
    }
}

/// One node of the executable tree: a kind plus the span it came from.
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

/// Flat, append-only storage for one file's executable tree.
#[derive(Default, Debug)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId::from_usize(self.nodes.len());
        self.nodes.push(Node { kind, span });
        id
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId::from_usize(i), n))
    }
}

/// A literal value, already parsed into its Rust-native representation.
#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValue {
    Integer(i64),
    Float(f64),
    String(String),
    Symbol(Atom),
    Bool(bool),
    Nil,
}

/// Binary operators recognized by the typed-tree builder and lowering
/// (§6 "arithmetic, comparison, and logical operators").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Cmp,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOperator {
    Neg,
    Not,
    BitNot,
}

/// The kind of a method/block parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Required,
    Optional,
    Splat,
    DoubleSplat,
    Block,
    Keyword,
    KeywordOptional,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: Atom,
    pub kind: ParamKind,
    /// Default-value expression for `Optional`/`KeywordOptional` params.
    pub default: Option<NodeId>,
    pub span: Span,
}

/// One `when`/pattern arm of a `case` expression.
#[derive(Clone, Debug)]
pub struct CaseClause {
    /// Values or patterns this clause matches against (`when a, b`).
    pub patterns: SmallVec<[NodeId; 2]>,
    /// Present for `case ... in` pattern-match clauses with a guard.
    pub guard: Option<NodeId>,
    pub body: NodeId,
}

/// One `rescue` clause of a `begin`/`rescue`/`ensure`/`else` block.
#[derive(Clone, Debug)]
pub struct RescueClause {
    /// Exception class names being rescued; empty means "rescue StandardError".
    pub exception_classes: SmallVec<[NodeId; 1]>,
    /// Binding name, e.g. `rescue Foo => e`.
    pub binding: Option<Atom>,
    pub body: NodeId,
}

/// The closed set of executable-tree node shapes (§6).
#[derive(Clone, Debug)]
pub enum NodeKind {
    Literal(LiteralValue),

    /// A bare local-variable or method-call-without-parens read.
    IdentifierRead { name: Atom },
    /// Assignment to a local variable.
    IdentifierWrite { name: Atom, value: NodeId },

    GlobalRead { name: Atom },
    GlobalWrite { name: Atom, value: NodeId },
    InstanceVarRead { name: Atom },
    InstanceVarWrite { name: Atom, value: NodeId },
    ClassVarRead { name: Atom },
    ClassVarWrite { name: Atom, value: NodeId },

    /// A possibly-qualified constant reference, e.g. `Foo::Bar`.
    ConstantPath { segments: SmallVec<[Atom; 2]> },

    MethodDef {
        name: Atom,
        params: Vec<Param>,
        body: NodeId,
        /// `self.name` singleton-method definitions.
        is_singleton: bool,
    },

    ClassDef {
        name: Atom,
        superclass: Option<NodeId>,
        body: Vec<NodeId>,
    },

    ModuleDef {
        name: Atom,
        body: Vec<NodeId>,
    },

    If {
        condition: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
    },

    WhileLoop {
        condition: NodeId,
        body: NodeId,
        /// `begin ... end while cond` runs the body before testing once.
        is_post_condition: bool,
    },

    UntilLoop {
        condition: NodeId,
        body: NodeId,
        is_post_condition: bool,
    },

    /// `for x in xs` is desugared by lowering into an each-call; the
    /// tree still records it as a distinct loop node per §6.
    ForLoop {
        binding: Atom,
        iterable: NodeId,
        body: NodeId,
    },

    CaseWhen {
        subject: Option<NodeId>,
        clauses: Vec<CaseClause>,
        else_branch: Option<NodeId>,
    },

    /// `case ... in` structural pattern-match, distinct from `CaseWhen`
    /// because its clauses may bind names from the pattern.
    PatternMatch {
        subject: NodeId,
        clauses: Vec<CaseClause>,
        else_branch: Option<NodeId>,
    },

    Call {
        receiver: Option<NodeId>,
        method: Atom,
        args: Vec<NodeId>,
        block: Option<NodeId>,
        /// `&.` safe-navigation call: short-circuits to nil when the
        /// receiver is nil instead of raising.
        is_safe_navigation: bool,
    },

    Block {
        params: Vec<Param>,
        body: NodeId,
    },

    Yield {
        args: Vec<NodeId>,
    },

    Return {
        value: Option<NodeId>,
    },

    Break {
        value: Option<NodeId>,
    },

    Next {
        value: Option<NodeId>,
    },

    BinaryOp {
        op: BinaryOperator,
        lhs: NodeId,
        rhs: NodeId,
    },

    UnaryOp {
        op: UnaryOperator,
        operand: NodeId,
    },

    Begin {
        body: NodeId,
        rescues: Vec<RescueClause>,
        else_branch: Option<NodeId>,
        ensure: Option<NodeId>,
    },

    Splat {
        value: NodeId,
    },

    /// `**hash` double-splat in an argument list or hash literal.
    DoubleSplat {
        value: NodeId,
    },

    ArrayLiteral {
        elements: Vec<NodeId>,
    },

    HashLiteral {
        /// Parallel key/value pairs; `None` key marks a double-splat entry.
        entries: Vec<(Option<NodeId>, NodeId)>,
    },

    /// A sequence of statements, e.g. a method or block body.
    StatementSequence {
        statements: Vec<NodeId>,
    },

    SelfExpr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_common::Interner;

    #[test]
    fn arena_allocates_increasing_ids() {
        let mut interner = Interner::new();
        let name = interner.intern("x");
        let mut arena = NodeArena::new();
        let a = arena.alloc(NodeKind::IdentifierRead { name }, Span::new(0, 1));
        let b = arena.alloc(NodeKind::IdentifierRead { name }, Span::new(1, 2));
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
        assert!(matches!(arena.get(a).kind, NodeKind::IdentifierRead { .. }));
    }

    #[test]
    fn iter_yields_ids_in_allocation_order() {
        let mut arena = NodeArena::new();
        arena.alloc(NodeKind::Literal(LiteralValue::Nil), Span::new(0, 0));
        arena.alloc(NodeKind::Literal(LiteralValue::Bool(true)), Span::new(1, 1));
        let ids: Vec<_> = arena.iter().map(|(id, _)| id.index()).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
