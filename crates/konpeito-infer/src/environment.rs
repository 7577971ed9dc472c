//! The inference-time variable environment: a stack of scopes mapping
//! local names to their currently-inferred type (§4.5 "Variable
//! lookup").
//!
//! Flow narrowing (§4.5.1) needs to install a temporarily-narrowed
//! binding for a branch and restore the prior one once the branch
//! rejoins; [`Environment::narrowed`] and [`Environment::restore`]
//! exist for exactly that push/pop discipline, grounded in the
//! teacher's own narrowed-type-stack handling in `control_flow.rs`.

use konpeito_common::Atom;
use konpeito_types::TypeId;
use rustc_hash::FxHashMap;

/// One lexical scope: a method body, a block body, or the top level.
#[derive(Default, Debug)]
struct Scope {
    bindings: FxHashMap<Atom, TypeId>,
}

/// A stack of scopes. Lookups walk from the innermost scope outward,
/// matching Ruby's block-local-variable-shadowing behavior (method
/// scopes, unlike blocks, do not see outer locals at all — callers
/// that need a fresh, non-closing-over scope should call
/// [`Environment::push_isolated`] rather than [`Environment::push`]).
#[derive(Default, Debug)]
pub struct Environment {
    scopes: Vec<Scope>,
}

impl Environment {
    #[must_use]
    pub fn new() -> Self {
        let mut env = Self { scopes: Vec::new() };
        env.push();
        env
    }

    /// Enter a nested scope that still sees outer bindings (block
    /// bodies, conditional branches).
    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Enter a method-body scope: starts empty, with no visibility into
    /// the caller's locals, matching Ruby method scoping.
    pub fn push_isolated(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    pub fn bind(&mut self, name: Atom, ty: TypeId) {
        self.scopes
            .last_mut()
            .expect("environment always has at least one scope")
            .bindings
            .insert(name, ty);
    }

    #[must_use]
    pub fn lookup(&self, name: Atom) -> Option<TypeId> {
        self.scopes.iter().rev().find_map(|scope| scope.bindings.get(&name).copied())
    }

    /// Overwrite the nearest existing binding for `name` (reassignment
    /// within the same or an enclosing, non-isolated scope). Falls back
    /// to binding in the current scope if `name` isn't bound anywhere
    /// yet, matching Ruby's implicit local-variable declaration on
    /// first assignment.
    pub fn assign(&mut self, name: Atom, ty: TypeId) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.bindings.get_mut(&name) {
                *slot = ty;
                return;
            }
        }
        self.bind(name, ty);
    }

    /// Snapshot every binding about to be narrowed, apply `delta`, and
    /// return the snapshot so the caller can restore it with
    /// [`Environment::restore`] once the branch rejoins (§4.5.1:
    /// "bindings are restored after the branches merge").
    pub fn narrowed(&mut self, delta: &FxHashMap<Atom, TypeId>) -> FxHashMap<Atom, Option<TypeId>> {
        let mut snapshot = FxHashMap::default();
        for (&name, &ty) in delta {
            snapshot.insert(name, self.lookup(name));
            self.assign(name, ty);
        }
        snapshot
    }

    pub fn restore(&mut self, snapshot: FxHashMap<Atom, Option<TypeId>>) {
        for (name, prior) in snapshot {
            match prior {
                Some(ty) => self.assign(name, ty),
                None => {
                    // Was unbound before narrowing; nothing to restore to,
                    // but leaving the narrowed binding in place would leak
                    // a branch-local type past the branch.
                    if let Some(scope) = self.scopes.iter_mut().rev().find(|s| s.bindings.contains_key(&name)) {
                        scope.bindings.remove(&name);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_common::Interner;

    #[test]
    fn inner_scope_shadows_outer_binding() {
        let mut strings = Interner::new();
        let x = strings.intern("x");
        let mut env = Environment::new();
        env.bind(x, TypeId::STRING);
        env.push();
        env.bind(x, TypeId::INTEGER);
        assert_eq!(env.lookup(x), Some(TypeId::INTEGER));
        env.pop();
        assert_eq!(env.lookup(x), Some(TypeId::STRING));
    }

    #[test]
    fn narrowing_restores_prior_binding_after_branch() {
        let mut strings = Interner::new();
        let x = strings.intern("x");
        let mut env = Environment::new();
        env.bind(x, TypeId::NIL);

        let mut delta = FxHashMap::default();
        delta.insert(x, TypeId::STRING);
        let snapshot = env.narrowed(&delta);
        assert_eq!(env.lookup(x), Some(TypeId::STRING));
        env.restore(snapshot);
        assert_eq!(env.lookup(x), Some(TypeId::NIL));
    }
}
