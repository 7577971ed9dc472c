//! Extracting `require`/`require_relative` specifiers from an
//! executable tree.
//!
//! Ruby has no distinct import syntax — `require`/`require_relative`
//! are ordinary top-level method calls with a single string-literal
//! argument, so the dependency resolver's input is a plain scan over
//! `konpeito-ast`'s `Call` nodes rather than a dedicated AST shape.

use konpeito_ast::{LiteralValue, NodeArena, NodeKind};
use konpeito_common::{Atom, Span};

/// Whether a `require` resolves relative to the requiring file
/// (`require_relative`) or via the managed load path (`require`,
/// covering both the managed standard library and runtime-native
/// extensions).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequireForm {
    Relative,
    LoadPath,
}

#[derive(Clone, Debug)]
pub struct RequireStatement {
    pub specifier: String,
    pub form: RequireForm,
    pub span: Span,
}

/// The two method-name atoms `extract_requires` recognizes, interned
/// once against the shared string interner (the same way
/// `konpeito_signatures::PrimitiveAtoms` pre-interns its names) so the
/// scan is a cheap `Atom` comparison rather than a string compare per
/// call site.
pub struct RequireAtoms {
    pub require: Atom,
    pub require_relative: Atom,
}

impl RequireAtoms {
    pub fn new(strings: &mut konpeito_common::Interner) -> Self {
        Self {
            require: strings.intern("require"),
            require_relative: strings.intern("require_relative"),
        }
    }
}

/// Scan every node in `arena` for a `require`/`require_relative` call
/// with a single string-literal argument. Nested calls (inside a
/// method body, a conditional, etc.) are included — Ruby code
/// routinely requires conditionally — but a non-literal argument (a
/// computed path) is not something the resolver can follow statically
/// and is skipped.
pub fn extract_requires(arena: &NodeArena, atoms: &RequireAtoms) -> Vec<RequireStatement> {
    let mut requires = Vec::new();
    for (_, node) in arena.iter() {
        let NodeKind::Call { receiver: None, method, args, .. } = &node.kind else {
            continue;
        };
        let form = if *method == atoms.require {
            RequireForm::LoadPath
        } else if *method == atoms.require_relative {
            RequireForm::Relative
        } else {
            continue;
        };
        let [arg] = args.as_slice() else { continue };
        if let NodeKind::Literal(LiteralValue::String(specifier)) = &arena.get(*arg).kind {
            requires.push(RequireStatement {
                specifier: specifier.clone(),
                form,
                span: node.span,
            });
        }
    }
    requires
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_common::Interner;

    #[test]
    fn extracts_relative_and_load_path_requires() {
        let mut strings = Interner::new();
        let atoms = RequireAtoms::new(&mut strings);
        let mut arena = NodeArena::new();

        let rel_arg = arena.alloc(
            NodeKind::Literal(LiteralValue::String("./helper".to_string())),
            Span::new(0, 0),
        );
        arena.alloc(
            NodeKind::Call {
                receiver: None,
                method: atoms.require_relative,
                args: vec![rel_arg],
                block: None,
                is_safe_navigation: false,
            },
            Span::new(0, 10),
        );

        let lib_arg = arena.alloc(
            NodeKind::Literal(LiteralValue::String("json".to_string())),
            Span::new(11, 11),
        );
        arena.alloc(
            NodeKind::Call {
                receiver: None,
                method: atoms.require,
                args: vec![lib_arg],
                block: None,
                is_safe_navigation: false,
            },
            Span::new(11, 20),
        );

        let requires = extract_requires(&arena, &atoms);
        assert_eq!(requires.len(), 2);
        assert_eq!(requires[0].specifier, "./helper");
        assert_eq!(requires[0].form, RequireForm::Relative);
        assert_eq!(requires[1].specifier, "json");
        assert_eq!(requires[1].form, RequireForm::LoadPath);
    }

    #[test]
    fn skips_calls_with_non_literal_arguments() {
        let mut strings = Interner::new();
        let atoms = RequireAtoms::new(&mut strings);
        let mut arena = NodeArena::new();
        let name = strings.intern("path_variable");
        let dynamic_arg = arena.alloc(NodeKind::IdentifierRead { name }, Span::new(0, 0));
        arena.alloc(
            NodeKind::Call {
                receiver: None,
                method: atoms.require,
                args: vec![dynamic_arg],
                block: None,
                is_safe_navigation: false,
            },
            Span::new(0, 10),
        );
        assert!(extract_requires(&arena, &atoms).is_empty());
    }
}
