//! Ingesting a signature file's declaration tree into the registry
//! (§4.3, consuming the tree shapes from `konpeito-ast`'s
//! `signature` module).

use crate::registry::{ClassLayout, MethodSignature, ParamSig, SignatureRegistry};
use konpeito_ast::{
    AnnotationDirective, ModuleMemberDecl, SignatureArena, SignatureFile, SignatureKind, TypeExpr, TypeExprId,
};
use konpeito_common::{Atom, Interner};
use konpeito_types::{CallableShape, TypeId, TypeInterner, TypeKey, TypeVarTable};
use smallvec::SmallVec;

/// The class-name atoms for the handful of surface names that denote a
/// primitive `TypeId` constant rather than a `ClassInstance` (§3.1).
/// Built once from the shared string interner so `lower_type_expr` can
/// recognize them by cheap `Atom` comparison instead of re-resolving
/// text on every lookup.
pub struct PrimitiveAtoms {
    pub nil: Atom,
    pub bool_: Atom,
    pub integer: Atom,
    pub float: Atom,
    pub string: Atom,
    pub symbol: Atom,
}

impl PrimitiveAtoms {
    pub fn new(strings: &mut Interner) -> Self {
        Self {
            nil: strings.intern("NilClass"),
            bool_: strings.intern("Bool"),
            integer: strings.intern("Integer"),
            float: strings.intern("Float"),
            string: strings.intern("String"),
            symbol: strings.intern("Symbol"),
        }
    }

    fn primitive_for(&self, name: Atom) -> Option<TypeId> {
        if name == self.nil {
            Some(TypeId::NIL)
        } else if name == self.bool_ {
            Some(TypeId::BOOL)
        } else if name == self.integer {
            Some(TypeId::INTEGER)
        } else if name == self.float {
            Some(TypeId::FLOAT)
        } else if name == self.string {
            Some(TypeId::STRING)
        } else if name == self.symbol {
            Some(TypeId::SYMBOL)
        } else {
            None
        }
    }
}

/// Native/runtime-binding directives collected while ingesting one
/// class, handed back to the caller (dependency resolver / core
/// driver) rather than stored on `ClassLayout`, since they affect code
/// generation rather than type-checking.
#[derive(Default, Debug)]
pub struct NativeBindings {
    pub native_struct_classes: Vec<Atom>,
    /// (declaring class, native symbol) pairs contributed by
    /// `AnnotationDirective::NativeCall` members.
    pub native_calls: Vec<(Atom, Atom)>,
    pub linked_libraries: Vec<Atom>,
}

/// Lower a `TypeExpr` surface form into a lattice `TypeId`.
pub fn lower_type_expr(
    arena: &SignatureArena,
    id: TypeExprId,
    interner: &mut TypeInterner,
    vars: &mut TypeVarTable,
    self_type: TypeId,
    primitives: &PrimitiveAtoms,
) -> TypeId {
    match arena.type_expr(id).clone() {
        TypeExpr::Named(name) => named_type_id(name, interner, primitives),
        TypeExpr::Generic { name, args } => {
            let type_args: SmallVec<[TypeId; 2]> = args
                .iter()
                .map(|a| lower_type_expr(arena, *a, interner, vars, self_type, primitives))
                .collect();
            interner.intern(TypeKey::ClassInstance { class: name, type_args })
        }
        TypeExpr::Union(members) => {
            let lowered: Vec<TypeId> = members
                .iter()
                .map(|m| lower_type_expr(arena, *m, interner, vars, self_type, primitives))
                .collect();
            konpeito_types::make_union(interner, &lowered)
        }
        TypeExpr::Tuple(elements) => {
            let lowered: SmallVec<[TypeId; 4]> = elements
                .iter()
                .map(|e| lower_type_expr(arena, *e, interner, vars, self_type, primitives))
                .collect();
            interner.intern(TypeKey::Tuple(lowered))
        }
        TypeExpr::Nilable(inner) => {
            let lowered = lower_type_expr(arena, inner, interner, vars, self_type, primitives);
            konpeito_types::make_union(interner, &[lowered, TypeId::NIL])
        }
        TypeExpr::Proc { params, return_type } => {
            let params = params
                .iter()
                .map(|p| lower_type_expr(arena, *p, interner, vars, self_type, primitives))
                .collect();
            let return_type = lower_type_expr(arena, return_type, interner, vars, self_type, primitives);
            interner.intern(TypeKey::ProcType(CallableShape { params, return_type }))
        }
        TypeExpr::SelfType => self_type,
        TypeExpr::Untyped => TypeId::UNTYPED,
        TypeExpr::Void => TypeId::NIL,
    }
}

fn named_type_id(name: Atom, interner: &mut TypeInterner, primitives: &PrimitiveAtoms) -> TypeId {
    if let Some(primitive) = primitives.primitive_for(name) {
        return primitive;
    }
    // Everything else is a class-instance reference, resolved
    // structurally so forward references to not-yet-declared classes
    // work fine.
    interner.intern(TypeKey::ClassInstance {
        class: name,
        type_args: SmallVec::new(),
    })
}

/// Walk one loaded signature file's top-level declarations into the
/// registry.
pub fn ingest_signature_file(
    registry: &mut SignatureRegistry,
    arena: &SignatureArena,
    file: &SignatureFile,
    interner: &mut TypeInterner,
    vars: &mut TypeVarTable,
    bindings: &mut NativeBindings,
    primitives: &PrimitiveAtoms,
) {
    for &decl_id in &file.top_level {
        ingest_decl(registry, arena, decl_id, interner, vars, bindings, primitives);
    }
}

fn ingest_decl(
    registry: &mut SignatureRegistry,
    arena: &SignatureArena,
    decl_id: konpeito_ast::SignatureId,
    interner: &mut TypeInterner,
    vars: &mut TypeVarTable,
    bindings: &mut NativeBindings,
    primitives: &PrimitiveAtoms,
) {
    let decl = arena.decl(decl_id);
    match decl.kind.clone() {
        SignatureKind::Class { name, superclass, members } => {
            registry.declare_class(name, superclass);
            let self_type = interner.intern(TypeKey::ClassInstance {
                class: name,
                type_args: SmallVec::new(),
            });
            ingest_members(registry, arena, name, self_type, &members, interner, vars, bindings, primitives);
        }
        SignatureKind::Module { name, members } => {
            registry.declare_class(name, None);
            let self_type = interner.intern(TypeKey::ClassInstance {
                class: name,
                type_args: SmallVec::new(),
            });
            ingest_members(registry, arena, name, self_type, &members, interner, vars, bindings, primitives);
        }
    }
}

fn ingest_members(
    registry: &mut SignatureRegistry,
    arena: &SignatureArena,
    class: Atom,
    self_type: TypeId,
    members: &[ModuleMemberDecl],
    interner: &mut TypeInterner,
    vars: &mut TypeVarTable,
    bindings: &mut NativeBindings,
    primitives: &PrimitiveAtoms,
) {
    for member in members {
        match member {
            ModuleMemberDecl::Field(field) => {
                let ty = lower_type_expr(arena, field.type_expr, interner, vars, self_type, primitives);
                registry.class_layout_mut(class).fields.insert(field.name, ty);
            }
            ModuleMemberDecl::Method(method) => {
                let type_param_vars: SmallVec<[konpeito_types::TypeVar; 2]> =
                    method.type_params.iter().map(|_| vars.fresh()).collect();
                let params = method
                    .params
                    .iter()
                    .map(|p| ParamSig {
                        name: p.name,
                        ty: lower_type_expr(arena, p.type_expr, interner, vars, self_type, primitives),
                        is_optional: p.is_optional,
                        is_splat: p.is_splat,
                        is_keyword: p.is_keyword,
                        is_block: p.is_block,
                    })
                    .collect();
                let return_type = lower_type_expr(arena, method.return_type, interner, vars, self_type, primitives);
                let sig = MethodSignature {
                    name: method.name,
                    params,
                    return_type,
                    type_params: type_param_vars,
                    is_singleton: method.is_singleton,
                };
                let layout = registry.class_layout_mut(class);
                if method.is_singleton {
                    layout.singleton_methods.insert(method.name, sig);
                } else {
                    layout.instance_methods.insert(method.name, sig);
                }
            }
            ModuleMemberDecl::Annotation(directive) => match directive {
                AnnotationDirective::NativeStruct => bindings.native_struct_classes.push(class),
                AnnotationDirective::NativeCall { symbol } => {
                    bindings.native_calls.push((class, *symbol));
                }
                AnnotationDirective::LinksLibrary { name } => bindings.linked_libraries.push(*name),
            },
            ModuleMemberDecl::Nested(nested_id) => {
                ingest_decl(registry, arena, *nested_id, interner, vars, bindings, primitives);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_ast::FieldDecl;
    use konpeito_common::{Interner, Span};

    #[test]
    fn ingesting_a_class_declaration_registers_its_field() {
        let mut strings = Interner::new();
        let point = strings.intern("Point");
        let x = strings.intern("x");

        let mut arena = SignatureArena::new();
        let integer_expr = arena.alloc_type_expr(TypeExpr::Named(strings.intern("Integer")));
        let field = FieldDecl {
            name: x,
            type_expr: integer_expr,
            span: Span::new(0, 1),
        };
        let class_decl = arena.alloc_decl(
            SignatureKind::Class {
                name: point,
                superclass: None,
                members: vec![ModuleMemberDecl::Field(field)],
            },
            Span::new(0, 1),
        );
        let file = SignatureFile {
            path: "point.rbs".to_string(),
            top_level: vec![class_decl],
        };

        let primitives = PrimitiveAtoms::new(&mut strings);
        let mut registry = SignatureRegistry::new(&mut strings);
        let mut types = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let mut bindings = NativeBindings::default();
        ingest_signature_file(&mut registry, &arena, &file, &mut types, &mut vars, &mut bindings, &primitives);

        let layout = registry.class_layout(point).expect("class should be registered");
        assert!(layout.fields.contains_key(&x));
    }
}
