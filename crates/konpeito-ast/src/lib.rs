//! The external syntax-tree and signature-tree types consumed by the
//! compiler core (§6 "External Interfaces").
//!
//! This crate holds no parsing logic. The parser and the signature-file
//! loader are external collaborators that hand the core an already-built
//! tree; everything here is plain data shaped to receive it. Both trees
//! use the arena + index pattern: nodes live in a flat `Vec` owned by the
//! arena and are referenced by a small `Copy` index rather than by `Box`
//! or `Rc`, so a whole program's tree is one contiguous allocation per
//! node kind and cross-references (e.g. a `Call`'s receiver) are cheap to
//! copy around during inference and lowering.

pub mod node;
pub use node::{
    BinaryOperator, CaseClause, LiteralValue, Node, NodeArena, NodeId, NodeKind, Param, ParamKind,
    RescueClause, UnaryOperator,
};

pub mod signature;
pub use signature::{
    AnnotationDirective, FieldDecl, MethodSigDecl, ModuleMemberDecl, SigParam, SignatureArena,
    SignatureDecl, SignatureFile, SignatureId, SignatureKind, TypeExpr, TypeExprId,
};
