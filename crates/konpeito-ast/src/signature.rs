//! The signature-declaration tree (§6 "Consumed from the signature-file
//! parser").
//!
//! Signature files describe the shape of classes, modules, and methods
//! without bodies — the inferrer and signature registry consume this
//! tree to seed `SignatureRegistry` entries before whole-program
//! inference begins. Type annotations inside a signature file are
//! themselves a small closed grammar ([`TypeExpr`]); the signature
//! registry is responsible for interpreting a `TypeExpr` into a lattice
//! `Type`, so this crate only needs to represent its surface shape.

use konpeito_common::{Atom, Span};

/// Index of a type expression within a [`SignatureArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeExprId(u32);

impl TypeExprId {
    pub(crate) const fn from_usize(index: usize) -> Self {
        TypeExprId(index as u32)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a declaration within a [`SignatureArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignatureId(u32);

impl SignatureId {
    pub(crate) const fn from_usize(index: usize) -> Self {
        SignatureId(index as u32)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A type-expression surface form as written in a signature file or an
/// inline signature comment, e.g. `Array[String]`, `Integer | Nil`,
/// `((Integer) -> String)`.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeExpr {
    /// A bare class/module name, e.g. `String`.
    Named(Atom),
    /// `Name[Arg, ...]`, e.g. `Array[Integer]`, `Hash[Symbol, String]`.
    Generic { name: Atom, args: Vec<TypeExprId> },
    /// `A | B | ...`.
    Union(Vec<TypeExprId>),
    /// `[A, B]` tuple-shape annotation.
    Tuple(Vec<TypeExprId>),
    /// `T?`, sugar for `T | nil`.
    Nilable(TypeExprId),
    /// `(A, B) -> C` proc/lambda type.
    Proc {
        params: Vec<TypeExprId>,
        return_type: TypeExprId,
    },
    /// `self` as used in a method's return-type position.
    SelfType,
    /// `untyped`, the explicit escape hatch into the dynamic region.
    Untyped,
    /// `void`, used only in return-type position.
    Void,
}

/// A single field/attribute declaration inside a class or module
/// signature, e.g. `@name: String`.
#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub name: Atom,
    pub type_expr: TypeExprId,
    pub span: Span,
}

/// A single parameter inside a method signature.
#[derive(Clone, Debug)]
pub struct SigParam {
    pub name: Atom,
    pub type_expr: TypeExprId,
    pub is_optional: bool,
    pub is_splat: bool,
    pub is_keyword: bool,
    pub is_block: bool,
}

/// A method declaration inside a class or module signature.
#[derive(Clone, Debug)]
pub struct MethodSigDecl {
    pub name: Atom,
    pub params: Vec<SigParam>,
    pub return_type: TypeExprId,
    pub is_singleton: bool,
    /// Generic type parameters introduced by this method, e.g. `[U]`.
    pub type_params: Vec<Atom>,
    pub span: Span,
}

/// A directive annotating how a method or class binds to the managed
/// runtime or a native extension (§6's "annotation directives" — e.g.
/// marking a class as a native-struct layout, or a method as a direct
/// native call).
#[derive(Clone, Debug)]
pub enum AnnotationDirective {
    /// This class is backed by a fixed native struct layout rather than
    /// a managed object header.
    NativeStruct,
    /// This method compiles to a direct call into a named native symbol
    /// instead of managed dispatch.
    NativeCall { symbol: Atom },
    /// This signature links against an external native library.
    LinksLibrary { name: Atom },
}

/// One member of a class or module signature declaration.
#[derive(Clone, Debug)]
pub enum ModuleMemberDecl {
    Field(FieldDecl),
    Method(MethodSigDecl),
    Annotation(AnnotationDirective),
    /// A nested class/module declaration.
    Nested(SignatureId),
}

/// The kind of a top-level signature declaration.
#[derive(Clone, Debug)]
pub enum SignatureKind {
    Class {
        name: Atom,
        superclass: Option<Atom>,
        members: Vec<ModuleMemberDecl>,
    },
    Module {
        name: Atom,
        members: Vec<ModuleMemberDecl>,
    },
}

/// One declaration stored in a [`SignatureArena`].
#[derive(Clone, Debug)]
pub struct SignatureDecl {
    pub kind: SignatureKind,
    pub span: Span,
}

/// Flat, append-only storage for one signature file's declaration tree
/// and the type expressions its declarations reference.
#[derive(Default, Debug)]
pub struct SignatureArena {
    decls: Vec<SignatureDecl>,
    type_exprs: Vec<TypeExpr>,
}

impl SignatureArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_decl(&mut self, kind: SignatureKind, span: Span) -> SignatureId {
        let id = SignatureId::from_usize(self.decls.len());
        self.decls.push(SignatureDecl { kind, span });
        id
    }

    pub fn alloc_type_expr(&mut self, expr: TypeExpr) -> TypeExprId {
        let id = TypeExprId::from_usize(self.type_exprs.len());
        self.type_exprs.push(expr);
        id
    }

    #[must_use]
    pub fn decl(&self, id: SignatureId) -> &SignatureDecl {
        &self.decls[id.index()]
    }

    #[must_use]
    pub fn type_expr(&self, id: TypeExprId) -> &TypeExpr {
        &self.type_exprs[id.index()]
    }

    pub fn top_level_decls(&self) -> impl Iterator<Item = (SignatureId, &SignatureDecl)> {
        self.decls
            .iter()
            .enumerate()
            .map(|(i, d)| (SignatureId::from_usize(i), d))
    }
}

/// One loaded signature file: its source path and the declarations it
/// contributed to the arena.
#[derive(Clone, Debug)]
pub struct SignatureFile {
    pub path: String,
    pub top_level: Vec<SignatureId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_common::Interner;

    #[test]
    fn arena_round_trips_type_exprs() {
        let mut interner = Interner::new();
        let name = interner.intern("String");
        let mut arena = SignatureArena::new();
        let inner = arena.alloc_type_expr(TypeExpr::Named(name));
        let outer = arena.alloc_type_expr(TypeExpr::Nilable(inner));
        assert!(matches!(arena.type_expr(outer), TypeExpr::Nilable(_)));
    }
}
