//! The signature registry itself (§4.3).
//!
//! Holds every class layout and method signature known to the
//! compile — both the handful of built-in rules for core classes
//! (`Integer`, `Float`, `String`, `Array`, `Hash`, ...) and whatever
//! user classes the signature files and in-source declarations
//! contributed. Populated once while ingesting dependencies, then read
//! many times during inference (§5).

use crate::builtin::{builtin_table, BuiltinMethod};
use konpeito_common::Atom;
use konpeito_types::{substitute, ClassHierarchy, TypeId, TypeInterner, TypeVar, TypeVarTable};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// One parameter of a registered method signature.
#[derive(Clone, Debug)]
pub struct ParamSig {
    pub name: Atom,
    pub ty: TypeId,
    pub is_optional: bool,
    pub is_splat: bool,
    pub is_keyword: bool,
    pub is_block: bool,
}

/// A fully-resolved method signature (§4.3).
#[derive(Clone, Debug)]
pub struct MethodSignature {
    pub name: Atom,
    pub params: Vec<ParamSig>,
    pub return_type: TypeId,
    /// Method-local generic type parameters, instantiated fresh at
    /// each lookup (§4.3 "generic instantiation").
    pub type_params: SmallVec<[TypeVar; 2]>,
    pub is_singleton: bool,
}

/// Instance/class-method table and field layout for one class or
/// module.
#[derive(Default, Clone, Debug)]
pub struct ClassLayout {
    pub fields: FxHashMap<Atom, TypeId>,
    pub instance_methods: FxHashMap<Atom, MethodSignature>,
    pub singleton_methods: FxHashMap<Atom, MethodSignature>,
}

/// The result of a method lookup: the resolved signature plus where it
/// came from, since built-in rules skip generic instantiation (they
/// already compute a concrete return type from the call-site argument
/// types instead of carrying type parameters).
pub enum ResolvedMethod<'a> {
    Declared(&'a MethodSignature),
    Builtin(&'a BuiltinMethod),
}

/// Method/class-layout storage and lookup, §4.3.
pub struct SignatureRegistry {
    classes: FxHashMap<Atom, ClassLayout>,
    hierarchy: ClassHierarchy,
    builtins: FxHashMap<(Atom, Atom), BuiltinMethod>,
    /// Top-level (module-less) method definitions, consulted as the
    /// final fallback in the resolution order (§4.3: "built-in rule
    /// table → class-hierarchy BFS → TopLevel fallback").
    top_level_methods: FxHashMap<Atom, MethodSignature>,
}

impl SignatureRegistry {
    /// Build a fresh registry with the built-in rule table populated
    /// for the core classes (§4.3). `strings` interns the class/method
    /// names the built-in table refers to.
    pub fn new(strings: &mut konpeito_common::Interner) -> Self {
        Self {
            classes: FxHashMap::default(),
            hierarchy: ClassHierarchy::new(),
            builtins: builtin_table(strings),
            top_level_methods: FxHashMap::default(),
        }
    }

    pub fn hierarchy(&self) -> &ClassHierarchy {
        &self.hierarchy
    }

    pub fn hierarchy_mut(&mut self) -> &mut ClassHierarchy {
        &mut self.hierarchy
    }

    pub fn declare_class(&mut self, name: Atom, superclass: Option<Atom>) {
        self.hierarchy.declare_class(name, superclass);
        self.classes.entry(name).or_default();
    }

    pub fn class_layout_mut(&mut self, name: Atom) -> &mut ClassLayout {
        self.classes.entry(name).or_default()
    }

    pub fn class_layout(&self, name: Atom) -> Option<&ClassLayout> {
        self.classes.get(&name)
    }

    pub fn define_top_level_method(&mut self, sig: MethodSignature) {
        self.top_level_methods.insert(sig.name, sig);
    }

    /// Resolve a method call per §4.3's order: built-in rule table,
    /// then a BFS up the receiver class's resolution order, then the
    /// top-level fallback (for calls with no explicit receiver that
    /// don't resolve to an instance method in scope).
    pub fn resolve_method(&self, receiver_class: Option<Atom>, method: Atom, is_singleton: bool) -> Option<ResolvedMethod<'_>> {
        if let Some(class) = receiver_class {
            if let Some(builtin) = self.builtins.get(&(class, method)) {
                return Some(ResolvedMethod::Builtin(builtin));
            }
            for ancestor in self.hierarchy.resolution_order(class) {
                if let Some(layout) = self.classes.get(&ancestor) {
                    let table = if is_singleton {
                        &layout.singleton_methods
                    } else {
                        &layout.instance_methods
                    };
                    if let Some(sig) = table.get(&method) {
                        return Some(ResolvedMethod::Declared(sig));
                    }
                }
            }
        }
        self.top_level_methods
            .get(&method)
            .map(ResolvedMethod::Declared)
    }

    /// Produce a fresh, alpha-renamed copy of a declared generic
    /// method's signature, substituting every one of its type
    /// parameters with a brand-new type variable (§4.3 "generic
    /// instantiation"). Non-generic signatures are returned unchanged
    /// (cloned, since callers own their copy either way).
    pub fn instantiate(
        &self,
        sig: &MethodSignature,
        interner: &mut TypeInterner,
        vars: &mut TypeVarTable,
    ) -> MethodSignature {
        if sig.type_params.is_empty() {
            return sig.clone();
        }
        let mut fresh_params = SmallVec::new();
        let mut mapping = FxHashMap::default();
        for &old_var in &sig.type_params {
            let new_var = vars.fresh();
            let new_ty = interner.fresh_var(new_var);
            mapping.insert(old_var, new_ty);
            fresh_params.push(new_var);
        }
        let params = sig
            .params
            .iter()
            .map(|p| ParamSig {
                ty: substitute(interner, p.ty, &mapping),
                ..p.clone()
            })
            .collect();
        let return_type = substitute(interner, sig.return_type, &mapping);
        MethodSignature {
            name: sig.name,
            params,
            return_type,
            type_params: fresh_params,
            is_singleton: sig.is_singleton,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_common::Interner;

    #[test]
    fn resolve_method_falls_back_through_superclass() {
        let mut strings = Interner::new();
        let animal = strings.intern("Animal");
        let dog = strings.intern("Dog");
        let speak = strings.intern("speak");

        let mut registry = SignatureRegistry::new(&mut strings);
        registry.declare_class(animal, None);
        registry.declare_class(dog, Some(animal));
        registry.class_layout_mut(animal).instance_methods.insert(
            speak,
            MethodSignature {
                name: speak,
                params: Vec::new(),
                return_type: TypeId::STRING,
                type_params: SmallVec::new(),
                is_singleton: false,
            },
        );

        let resolved = registry.resolve_method(Some(dog), speak, false);
        assert!(matches!(resolved, Some(ResolvedMethod::Declared(_))));
    }

    #[test]
    fn builtin_rule_takes_priority_over_declared_method() {
        let mut strings = Interner::new();
        let integer = strings.intern("Integer");
        let plus = strings.intern("+");
        let registry = SignatureRegistry::new(&mut strings);
        assert!(matches!(
            registry.resolve_method(Some(integer), plus, false),
            Some(ResolvedMethod::Builtin(_))
        ));
    }
}
