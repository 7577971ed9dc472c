//! Monomorphization (§4.8): specializing every function whose
//! signature still carries free type variables once the whole
//! program's call sites pin down what it was actually called with,
//! and rewriting those call sites to target the matching
//! specialization.
//!
//! Grounded directly in `konpeito_types::lattice`'s `free_vars` and
//! `substitute` — the former's own doc comment names this pass as its
//! intended caller ("Used by monomorphization to decide whether a
//! call site's argument types leave any parameter fully generic"),
//! and the latter is the "one-shot textual substitution" §4.3
//! describes generic instantiation in terms of.

use konpeito_common::{Atom, Diagnostic, DiagnosticCode, DiagnosticCollector, Interner, Span};
use konpeito_ir::{BasicBlock, Function, InstKind, Program, ValueId};
use konpeito_types::{free_vars, substitute, PrimitiveKind, TypeId, TypeInterner, TypeKey, TypeVar, TypeVarTable};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Default, Debug, Clone, Copy)]
pub struct MonomorphizeStats {
    pub specializations_created: usize,
    pub generics_removed: usize,
}

/// Runs the monomorphizer over every function in `program`, mutating
/// it in place.
pub fn monomorphize(
    program: &mut Program,
    types: &mut TypeInterner,
    vars: &mut TypeVarTable,
    strings: &mut Interner,
    diagnostics: &mut DiagnosticCollector,
) -> MonomorphizeStats {
    let mut stats = MonomorphizeStats::default();

    let polymorphic_names: Vec<Atom> = program
        .functions
        .iter()
        .filter(|f| !signature_free_vars(types, vars, f).is_empty())
        .map(|f| f.name)
        .collect();

    for target_name in polymorphic_names {
        let Some(target_index) = program.functions.iter().position(|f| f.name == target_name) else {
            continue;
        };

        let mut tuples = collect_call_tuples(program, types, target_name);
        dedup_tuples(&mut tuples);
        if tuples.is_empty() {
            // Nothing ever called it (§8 S6): leave it generic, still
            // Untyped-slotted, and let finalization's own diagnostic
            // cover the unresolved parameter/return positions.
            continue;
        }
        if tuples.iter().any(|t| t.len() != program.functions[target_index].params.len()) {
            continue;
        }

        let mut specializations: Vec<(Vec<TypeId>, Atom)> = Vec::with_capacity(tuples.len());
        for tuple in &tuples {
            let target = &program.functions[target_index];
            let mapping = bind_params(types, target, tuple);
            let specialized = specialize(types, strings, target, &mapping, tuple);
            specializations.push((tuple.clone(), specialized.name));
            program.functions.push(specialized);
            stats.specializations_created += 1;
        }

        for function in &mut program.functions {
            if function.name == target_name {
                continue;
            }
            retarget_calls(function, target_name, &specializations);
        }

        let still_called = program
            .functions
            .iter()
            .any(|f| f.name != target_name && calls_function(f, target_name));
        if !still_called {
            program.functions.retain(|f| f.name != target_name);
            stats.generics_removed += 1;
        } else {
            let target = program.functions.iter().find(|f| f.name == target_name).expect("just checked above");
            if !signature_free_vars(types, vars, target).is_empty() {
                diagnostics.push(Diagnostic::new(
                    DiagnosticCode::UnresolvedType,
                    String::new(),
                    Span::default(),
                    format!(
                        "'{}' retains unresolved type parameters after monomorphization; the generic version is kept",
                        strings.resolve(target_name)
                    ),
                ));
            }
        }
    }

    stats
}

fn signature_free_vars(types: &TypeInterner, vars: &mut TypeVarTable, f: &Function) -> FxHashSet<TypeVar> {
    let mut out = FxHashSet::default();
    for param in &f.params {
        free_vars(types, vars, param.ty, &mut out);
    }
    free_vars(types, vars, f.return_type, &mut out);
    out
}

/// Every `ValueId -> TypeId` this function produces, parameters
/// included (bound by the calling convention documented on
/// `builder::bind_params`, to `ValueId::from_usize(param_index)`).
fn value_type_map(function: &Function) -> FxHashMap<ValueId, TypeId> {
    let mut map = FxHashMap::default();
    for (i, param) in function.params.iter().enumerate() {
        map.insert(ValueId::from_usize(i), param.ty);
    }
    for block in &function.blocks {
        for inst in &block.instructions {
            map.insert(inst.result, inst.ty);
        }
    }
    map
}

fn collect_call_tuples(program: &Program, types: &TypeInterner, target: Atom) -> Vec<Vec<TypeId>> {
    let mut tuples = Vec::new();
    for caller in &program.functions {
        let value_types = value_type_map(caller);
        for block in &caller.blocks {
            for inst in &block.instructions {
                if let InstKind::MethodCall { method, args, .. } = &inst.kind {
                    if *method != target {
                        continue;
                    }
                    let arg_types: Vec<TypeId> =
                        args.iter().map(|v| value_types.get(v).copied().unwrap_or(TypeId::UNTYPED)).collect();
                    tuples.extend(expand_union_dispatch(types, &arg_types));
                }
            }
        }
    }
    tuples
}

/// Splits a tuple's first union-typed argument into one tuple per
/// member (§4.8 "Union dispatch... one specialization per union
/// member"). Only the first union argument found is split — call
/// sites with more than one union-typed argument are rare enough in
/// this subset that combinatorial expansion isn't worth the
/// complexity; the remaining union arguments stay as `TypeId::UNTYPED`
/// in the resulting tuples' specializations, which the backend's
/// dynamic-dispatch path already has to handle anyway.
fn expand_union_dispatch(types: &TypeInterner, arg_types: &[TypeId]) -> Vec<Vec<TypeId>> {
    for (i, &ty) in arg_types.iter().enumerate() {
        if let TypeKey::Union(members) = types.lookup(ty).clone() {
            return members
                .iter()
                .map(|&member| {
                    let mut tuple = arg_types.to_vec();
                    tuple[i] = member;
                    tuple
                })
                .collect();
        }
    }
    vec![arg_types.to_vec()]
}

fn dedup_tuples(tuples: &mut Vec<Vec<TypeId>>) {
    let mut seen = FxHashSet::default();
    tuples.retain(|t| seen.insert(t.clone()));
}

/// Builds the `TypeVar -> TypeId` substitution for one call-site
/// tuple by structurally matching each declared parameter type against
/// the concrete argument type observed at that position. Works
/// directly for the common case (a parameter typed as a bare
/// `TypeVar`, which is what `konpeito_infer::infer::declare_method_stub`
/// always produces) and recurses structurally for a parameter whose
/// declared type already has some concrete shape around an unresolved
/// part (e.g. a class instance with a generic type argument).
fn bind_params(types: &TypeInterner, target: &Function, tuple: &[TypeId]) -> FxHashMap<TypeVar, TypeId> {
    let mut mapping = FxHashMap::default();
    for (param, &concrete) in target.params.iter().zip(tuple) {
        bind_structurally(types, param.ty, concrete, &mut mapping);
    }
    mapping
}

fn bind_structurally(types: &TypeInterner, declared: TypeId, concrete: TypeId, out: &mut FxHashMap<TypeVar, TypeId>) {
    match types.lookup(declared).clone() {
        TypeKey::TypeVar(var) => {
            out.insert(var, concrete);
        }
        TypeKey::ClassInstance { type_args: declared_args, .. } => {
            if let TypeKey::ClassInstance { type_args: concrete_args, .. } = types.lookup(concrete).clone() {
                for (d, c) in declared_args.iter().zip(concrete_args.iter()) {
                    bind_structurally(types, *d, *c, out);
                }
            }
        }
        TypeKey::Tuple(declared_members) => {
            if let TypeKey::Tuple(concrete_members) = types.lookup(concrete).clone() {
                for (d, c) in declared_members.iter().zip(concrete_members.iter()) {
                    bind_structurally(types, *d, *c, out);
                }
            }
        }
        TypeKey::ProcType(shape) | TypeKey::FunctionType(shape) => {
            if let key @ (TypeKey::ProcType(_) | TypeKey::FunctionType(_)) = types.lookup(concrete).clone() {
                let concrete_shape = match key {
                    TypeKey::ProcType(s) | TypeKey::FunctionType(s) => s,
                    _ => unreachable!(),
                };
                for (d, c) in shape.params.iter().zip(concrete_shape.params.iter()) {
                    bind_structurally(types, *d, *c, out);
                }
                bind_structurally(types, shape.return_type, concrete_shape.return_type, out);
            }
        }
        _ => {}
    }
}

/// Clones `target`'s body, substituting every bound `TypeVar` with its
/// mapped concrete type throughout params, return type, and every
/// instruction/slot type, and renames it deterministically from the
/// original name and the argument-type tuple (§4.8 "name the
/// specialization deterministically from the original name and the
/// tuple").
fn specialize(
    types: &mut TypeInterner,
    strings: &mut Interner,
    target: &Function,
    mapping: &FxHashMap<TypeVar, TypeId>,
    tuple: &[TypeId],
) -> Function {
    let mut specialized = target.clone();
    specialized.name = strings.intern(&specialization_name(strings, types, target.name, tuple));

    for param in &mut specialized.params {
        param.ty = substitute(types, param.ty, mapping);
    }
    specialized.return_type = substitute(types, specialized.return_type, mapping);
    for slot_ty in &mut specialized.slot_types {
        *slot_ty = substitute(types, *slot_ty, mapping);
    }
    for block in &mut specialized.blocks {
        for inst in &mut block.instructions {
            inst.ty = substitute(types, inst.ty, mapping);
        }
    }
    specialized
}

fn specialization_name(strings: &Interner, types: &TypeInterner, original: Atom, tuple: &[TypeId]) -> String {
    let mut name = strings.resolve(original).to_string();
    for &ty in tuple {
        name.push('_');
        name.push_str(&type_label(strings, types, ty));
    }
    name
}

/// A deterministic, human-readable label for a concrete type, used to
/// build specialization names (§8 S2's `identity_Int64`/
/// `identity_String`). Primitive labels match the spec's external
/// naming (`Int64`/`Float64`) rather than this crate's internal
/// `PrimitiveKind` variant names.
fn type_label(strings: &Interner, types: &TypeInterner, ty: TypeId) -> String {
    match types.lookup(ty) {
        TypeKey::Primitive(PrimitiveKind::Integer) => "Int64".to_string(),
        TypeKey::Primitive(PrimitiveKind::Float) => "Float64".to_string(),
        TypeKey::Primitive(PrimitiveKind::Bool) => "Bool".to_string(),
        TypeKey::Primitive(PrimitiveKind::Nil) => "Nil".to_string(),
        TypeKey::Primitive(PrimitiveKind::String) => "String".to_string(),
        TypeKey::Primitive(PrimitiveKind::Symbol) => "Symbol".to_string(),
        TypeKey::ClassInstance { class, .. } | TypeKey::ClassSingleton { class } => strings.resolve(*class).to_string(),
        TypeKey::Union(members) => members.iter().map(|&m| type_label(strings, types, m)).collect::<Vec<_>>().join("Or"),
        TypeKey::Untyped => "Untyped".to_string(),
        _ => format!("T{}", ty.index()),
    }
}

fn calls_function(function: &Function, target: Atom) -> bool {
    function.blocks.iter().any(|block| {
        block
            .instructions
            .iter()
            .any(|inst| matches!(&inst.kind, InstKind::MethodCall { method, .. } if *method == target))
    })
}

/// Rewrites every call site in `function` that invokes `target` with
/// an argument-type tuple matching one of `specializations` exactly
/// (§4.8 step 3: "Rewrite call sites to target their specialization
/// when the argument types match exactly; leave them pointing at the
/// generic... otherwise").
fn retarget_calls(function: &mut Function, target: Atom, specializations: &[(Vec<TypeId>, Atom)]) {
    let value_types = value_type_map(function);
    for block in &mut function.blocks {
        retarget_block(block, target, specializations, &value_types);
    }
}

fn retarget_block(
    block: &mut BasicBlock,
    target: Atom,
    specializations: &[(Vec<TypeId>, Atom)],
    value_types: &FxHashMap<ValueId, TypeId>,
) {
    for inst in &mut block.instructions {
        if let InstKind::MethodCall { method, args, .. } = &mut inst.kind {
            if *method != target {
                continue;
            }
            let arg_types: Vec<TypeId> =
                args.iter().map(|v| value_types.get(v).copied().unwrap_or(TypeId::UNTYPED)).collect();
            if let Some((_, specialized_name)) =
                specializations.iter().find(|(tuple, _)| tuple.as_slice() == arg_types.as_slice())
            {
                *method = *specialized_name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konpeito_ir::{Instruction, ParamSlot, Terminator};

    /// §8 S2: `def identity(x); x; end; identity(42); identity("hi")`
    /// produces two specializations, and both call sites are retargeted
    /// to name them.
    #[test]
    fn identity_called_with_two_concrete_types_specializes_twice() {
        let mut strings = Interner::new();
        let mut types = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let mut diagnostics = DiagnosticCollector::new();

        let identity_name = strings.intern("identity");
        let var = vars.fresh();
        let var_ty = types.fresh_var(var);

        let mut identity = Function::new(identity_name);
        let slot = identity.alloc_slot(var_ty);
        identity.params.push(ParamSlot { name: strings.intern("x"), slot, ty: var_ty });
        identity.return_type = var_ty;
        identity.block_mut(konpeito_ir::BlockId::ENTRY).terminator =
            Some(Terminator::Return(Some(ValueId::from_usize(0))));

        let main_name = strings.intern("main");
        let self_value = ValueId::from_usize(0);
        let int_arg = ValueId::from_usize(1);
        let int_call = ValueId::from_usize(2);
        let string_arg = ValueId::from_usize(3);
        let string_call = ValueId::from_usize(4);

        let mut main = Function::new(main_name);
        let entry = main.block_mut(konpeito_ir::BlockId::ENTRY);
        entry.instructions.push(Instruction {
            result: self_value,
            ty: TypeId::UNTYPED,
            kind: InstKind::LoadSelf,
            span: Span::default(),
        });
        entry.instructions.push(Instruction {
            result: int_arg,
            ty: TypeId::INTEGER,
            kind: InstKind::ConstInt(42),
            span: Span::default(),
        });
        entry.instructions.push(Instruction {
            result: int_call,
            ty: var_ty,
            kind: InstKind::MethodCall {
                receiver: self_value,
                method: identity_name,
                args: vec![int_arg],
                block: None,
            },
            span: Span::default(),
        });
        let hi = strings.intern("hi");
        entry.instructions.push(Instruction {
            result: string_arg,
            ty: TypeId::STRING,
            kind: InstKind::ConstString(hi),
            span: Span::default(),
        });
        entry.instructions.push(Instruction {
            result: string_call,
            ty: var_ty,
            kind: InstKind::MethodCall {
                receiver: self_value,
                method: identity_name,
                args: vec![string_arg],
                block: None,
            },
            span: Span::default(),
        });
        entry.terminator = Some(Terminator::Return(None));

        let mut program = Program::new();
        program.functions.push(main);
        program.functions.push(identity);

        let stats = monomorphize(&mut program, &mut types, &mut vars, &mut strings, &mut diagnostics);
        assert_eq!(stats.specializations_created, 2);
        assert_eq!(stats.generics_removed, 1);
        assert!(program.function_named(identity_name).is_none(), "unused generic was removed");

        let int_specialized = strings.intern("identity_Int64");
        let string_specialized = strings.intern("identity_String");
        assert!(program.function_named(int_specialized).is_some());
        assert!(program.function_named(string_specialized).is_some());

        let main = program.function_named(main_name).expect("main survives");
        let targets: Vec<Atom> = main
            .blocks
            .iter()
            .flat_map(|b: &BasicBlock| &b.instructions)
            .filter_map(|i| match &i.kind {
                InstKind::MethodCall { method, .. } => Some(*method),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec![int_specialized, string_specialized]);
    }
}
