//! The class hierarchy (§4.3's BFS-over-class-hierarchy resolution
//! step depends on this; the hierarchy itself is shared lattice state
//! per §3.1).
//!
//! Ruby's single-inheritance class tree (mixins aside — modules are
//! recorded as an ordered ancestor list per class, not as additional
//! superclasses) is modeled as a forest of parent pointers with an
//! `Object`-rooted convention: a class with no declared superclass is
//! implicitly a direct child of `Object`.

use konpeito_common::Atom;
use rustc_hash::FxHashMap;

/// One class's position in the hierarchy.
#[derive(Clone, Debug)]
struct ClassNode {
    superclass: Option<Atom>,
    /// Included modules, most-recently-included first — this is the
    /// method-resolution order modules contribute, ahead of the
    /// superclass (Ruby's own MRO rule).
    included_modules: Vec<Atom>,
}

/// The whole-program class/module hierarchy, built once while ingesting
/// signatures and declarations, then read by every later inference and
/// lookup step.
#[derive(Default, Clone)]
pub struct ClassHierarchy {
    classes: FxHashMap<Atom, ClassNode>,
}

impl ClassHierarchy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Calling this twice for the same name overwrites
    /// the earlier declaration, matching Ruby's own reopenable-class
    /// semantics at the level the signature registry cares about (later
    /// declarations win for superclass/module bookkeeping).
    pub fn declare_class(&mut self, name: Atom, superclass: Option<Atom>) {
        self.classes
            .entry(name)
            .and_modify(|node| node.superclass = superclass)
            .or_insert(ClassNode {
                superclass,
                included_modules: Vec::new(),
            });
    }

    pub fn include_module(&mut self, class: Atom, module: Atom) {
        self.classes
            .entry(class)
            .or_insert(ClassNode {
                superclass: None,
                included_modules: Vec::new(),
            })
            .included_modules
            .push(module);
    }

    #[must_use]
    pub fn is_declared(&self, class: Atom) -> bool {
        self.classes.contains_key(&class)
    }

    #[must_use]
    pub fn superclass(&self, class: Atom) -> Option<Atom> {
        self.classes.get(&class).and_then(|n| n.superclass)
    }

    /// The method-resolution order starting at `class`: the class
    /// itself, then its included modules (most-recent first), then the
    /// same walk applied to its superclass, and so on up to (but not
    /// including) the implicit `Object` root. A `SignatureRegistry`
    /// method lookup BFS-walks exactly this order (§4.3).
    #[must_use]
    pub fn resolution_order(&self, class: Atom) -> Vec<Atom> {
        let mut order = Vec::new();
        let mut current = Some(class);
        let mut guard = 0usize;
        while let Some(name) = current {
            if order.contains(&name) || guard > konpeito_common::limits::MAX_SCOPE_WALK_ITERATIONS {
                break; // cyclic superclass chain; signature ingestion should have rejected this already
            }
            guard += 1;
            order.push(name);
            if let Some(node) = self.classes.get(&name) {
                order.extend(node.included_modules.iter().rev().copied());
                current = node.superclass;
            } else {
                current = None;
            }
        }
        order
    }

    /// Whether `descendant` is `ancestor` or has `ancestor` anywhere in
    /// its resolution order — the structural basis for `ClassInstance`
    /// subtyping (§4.1).
    #[must_use]
    pub fn is_ancestor(&self, ancestor: Atom, descendant: Atom) -> bool {
        self.resolution_order(descendant).contains(&ancestor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_common::Interner;

    #[test]
    fn resolution_order_walks_superclass_chain() {
        let mut strings = Interner::new();
        let animal = strings.intern("Animal");
        let dog = strings.intern("Dog");
        let mut hierarchy = ClassHierarchy::new();
        hierarchy.declare_class(animal, None);
        hierarchy.declare_class(dog, Some(animal));

        assert_eq!(hierarchy.resolution_order(dog), vec![dog, animal]);
        assert!(hierarchy.is_ancestor(animal, dog));
        assert!(!hierarchy.is_ancestor(dog, animal));
    }

    #[test]
    fn included_modules_precede_superclass_in_resolution_order() {
        let mut strings = Interner::new();
        let base = strings.intern("Base");
        let mixin = strings.intern("Mixin");
        let sub = strings.intern("Sub");
        let mut hierarchy = ClassHierarchy::new();
        hierarchy.declare_class(base, None);
        hierarchy.declare_class(sub, Some(base));
        hierarchy.include_module(sub, mixin);

        assert_eq!(hierarchy.resolution_order(sub), vec![sub, mixin, base]);
    }

    #[test]
    fn cyclic_superclass_chain_terminates() {
        let mut strings = Interner::new();
        let a = strings.intern("A");
        let b = strings.intern("B");
        let mut hierarchy = ClassHierarchy::new();
        hierarchy.declare_class(a, Some(b));
        hierarchy.declare_class(b, Some(a));

        let order = hierarchy.resolution_order(a);
        assert_eq!(order, vec![a, b]);
    }
}
