//! The compile pipeline driver (§5, §6, §7): wires dependency
//! resolution, signature ingestion, whole-program inference, IR
//! lowering, and the optimizer into one `compile` entry point.
//!
//! The source parser and the signature-file parser are external
//! collaborators (§6 "External Interfaces") — this crate never parses
//! Ruby source or a signature file's surface syntax itself. Callers
//! supply both as [`SourceParser`]/[`SignatureParser`] implementations;
//! `compile` drives them as new files are discovered while walking
//! `require`/`require_relative`.

use std::path::{Path, PathBuf};

use konpeito_ast::{NodeArena, NodeId, SignatureArena, SignatureFile};
use konpeito_common::{
    CoreOptions, Diagnostic, DiagnosticCode, DiagnosticCollector, Interner, Span,
};
use konpeito_infer::Inferrer;
use konpeito_ir::{promote_to_ssa, IRBuilder, Program};
use konpeito_opt::{inline_functions, monomorphize, run_licm};
use konpeito_resolve::{
    extract_requires, specifier_candidates, DependencyGraph, ImportClassifier, ImportKind,
    RequireAtoms,
};
use konpeito_signatures::{ingest_signature_file, NativeBindings, PrimitiveAtoms, SignatureRegistry};
use konpeito_types::{TypeInterner, TypeVarTable};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::merge::{merge_parsed_files, ParsedFile};

/// One already-parsed source file, handed back by a [`SourceParser`].
pub struct ParsedSource {
    pub arena: NodeArena,
    /// Top-level statements/definitions, in source order.
    pub roots: Vec<NodeId>,
}

/// One already-parsed signature file, handed back by a
/// [`SignatureParser`].
pub struct ParsedSignature {
    pub arena: SignatureArena,
    pub file: SignatureFile,
}

/// The source parser, supplied by the caller (§6: "Consumed from the
/// parser" — this crate has no parser of its own).
pub trait SourceParser {
    fn parse(&mut self, path: &Path, strings: &mut Interner) -> Result<ParsedSource, Diagnostic>;
}

/// The signature-file parser, supplied by the caller (§6: "Consumed
/// from the signature-file parser").
pub trait SignatureParser {
    fn parse(&mut self, path: &Path, strings: &mut Interner) -> Result<ParsedSignature, Diagnostic>;
}

/// Everything one `compile` run produced (§7 "User-visible behavior").
#[derive(Default)]
pub struct CompileOutput {
    /// `None` only when a fatal diagnostic (§7's Fatal family) stopped
    /// the compile before IR could be built.
    pub program: Option<Program>,
    pub diagnostics: Vec<Diagnostic>,
    /// §7: any Error-severity diagnostic fails the compile.
    pub succeeded: bool,
    /// Post-order list of source files (§4.4).
    pub file_order: Vec<PathBuf>,
    pub managed_stdlib_imports: Vec<String>,
    pub runtime_native_imports: Vec<String>,
    /// Signature files found alongside a source file rather than named
    /// explicitly in `CoreOptions::signature_files` (§4.4).
    pub auto_detected_signature_files: Vec<PathBuf>,
}

impl CompileOutput {
    fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics, succeeded: false, ..Self::default() }
    }
}

/// The sibling-signature-file convention §4.4's auto-detection step
/// uses: a source file `foo.rb` pairs with `foo.rbs` in the same
/// directory, if one exists. `.rbs` is the closed-world signature
/// format, distinct from a `.rb` source file but resolved the same way
/// a source-local `require_relative` target would be.
fn sibling_signature_file(source: &Path) -> Option<PathBuf> {
    let stem = source.file_stem()?;
    let mut candidate = source.to_path_buf();
    candidate.set_file_name(stem);
    candidate.set_extension("rbs");
    Some(candidate)
}

/// Drive one whole compile end to end.
pub fn compile<P, S>(options: &CoreOptions, source_parser: &mut P, signature_parser: &mut S) -> CompileOutput
where
    P: SourceParser,
    S: SignatureParser,
{
    let mut strings = Interner::new();
    let mut diagnostics = DiagnosticCollector::new();

    let (file_order, parsed, managed_stdlib, runtime_native, mut explicit_signatures, auto_detected) =
        match walk_dependencies(options, source_parser, &mut strings, &mut diagnostics) {
            Ok(result) => result,
            Err(()) => return CompileOutput::failed(diagnostics.into_vec()),
        };

    explicit_signatures.extend(auto_detected.iter().cloned());

    let mut registry = SignatureRegistry::new(&mut strings);
    let mut types = TypeInterner::new();
    let mut vars = TypeVarTable::new();
    let mut bindings = NativeBindings::default();
    let primitives = PrimitiveAtoms::new(&mut strings);

    for sig_path in &explicit_signatures {
        let parsed_sig = match signature_parser.parse(sig_path, &mut strings) {
            Ok(p) => p,
            Err(diag) => {
                diagnostics.push(diag);
                return CompileOutput::failed(diagnostics.into_vec());
            }
        };
        ingest_signature_file(
            &mut registry,
            &parsed_sig.arena,
            &parsed_sig.file,
            &mut types,
            &mut vars,
            &mut bindings,
            &primitives,
        );
    }

    let ordered_files: Vec<ParsedFile> = file_order
        .iter()
        .map(|path| {
            let entry = parsed.get(path).expect("every post-ordered file was parsed while walking dependencies");
            ParsedFile { arena: clone_arena(&entry.arena), roots: entry.roots.clone() }
        })
        .collect();
    let merged = merge_parsed_files(ordered_files);

    let mut inferrer = Inferrer::new(&mut strings, &mut registry, types, vars, display_path(&options.entry_source));
    inferrer.declare(&merged.arena, merged.inference_root);
    inferrer.infer(&merged.arena, merged.inference_root);
    let (typed_tree, mut types, mut vars, infer_diagnostics) = inferrer.into_typed_tree(&merged.arena);
    diagnostics.extend(infer_diagnostics);

    if diagnostics.has_errors() {
        return CompileOutput {
            program: None,
            diagnostics: diagnostics.into_vec(),
            succeeded: false,
            file_order,
            managed_stdlib_imports: managed_stdlib,
            runtime_native_imports: runtime_native,
            auto_detected_signature_files: auto_detected,
        };
    }

    let builder = IRBuilder::new(&mut strings, &typed_tree, &registry);
    let mut program = builder.build(&merged.arena, &merged.top_level_roots);

    for function in &mut program.functions {
        promote_to_ssa(function);
    }

    if options.optimize {
        let mut opt_diagnostics = DiagnosticCollector::new();
        monomorphize(&mut program, &mut types, &mut vars, &mut strings, &mut opt_diagnostics);
        inline_functions(&mut program);
        run_licm(&mut program, &strings);
        diagnostics.extend(opt_diagnostics.into_vec());
    }

    if options.emit_ir {
        for function in &program.functions {
            tracing::debug!(
                name = strings.resolve(function.name),
                blocks = function.blocks.len(),
                "lowered function ready for backend"
            );
        }
    }

    let succeeded = !diagnostics.has_errors();
    CompileOutput {
        program: Some(program),
        diagnostics: diagnostics.into_vec(),
        succeeded,
        file_order,
        managed_stdlib_imports: managed_stdlib,
        runtime_native_imports: runtime_native,
        auto_detected_signature_files: auto_detected,
    }
}

/// Walk `require`/`require_relative` outward from the entry file,
/// parsing every newly discovered internal file, until no more remain
/// (§4.4). Returns the dependency-ordered file list, every parsed file
/// keyed by path, the classified managed-stdlib/runtime-native import
/// names, the signature files named explicitly in `options`, and the
/// ones auto-detected alongside a source file. `Err(())` means a fatal
/// diagnostic (parse failure or circular dependency) was already pushed
/// and the compile must stop.
fn walk_dependencies<P: SourceParser>(
    options: &CoreOptions,
    source_parser: &mut P,
    strings: &mut Interner,
    diagnostics: &mut DiagnosticCollector,
) -> Result<
    (
        Vec<PathBuf>,
        FxHashMap<PathBuf, ParsedSource>,
        Vec<String>,
        Vec<String>,
        Vec<PathBuf>,
        Vec<PathBuf>,
    ),
    (),
> {
    let require_atoms = RequireAtoms::new(strings);
    let classifier = ImportClassifier::new();
    let mut graph = DependencyGraph::new();
    let mut parsed: FxHashMap<PathBuf, ParsedSource> = FxHashMap::default();
    let mut managed_stdlib: FxHashSet<String> = FxHashSet::default();
    let mut runtime_native: FxHashSet<String> = FxHashSet::default();
    let mut auto_detected = Vec::new();
    let mut seen_signatures: FxHashSet<PathBuf> = options.signature_files.iter().cloned().collect();

    let entry = options.entry_source.clone();
    let mut queue = vec![entry.clone()];
    let mut queued: FxHashSet<PathBuf> = std::iter::once(entry.clone()).collect();

    while let Some(file) = queue.pop() {
        let parsed_source = match source_parser.parse(&file, strings) {
            Ok(p) => p,
            Err(diag) => {
                diagnostics.push(diag);
                return Err(());
            }
        };

        if let Some(sig_path) = sibling_signature_file(&file) {
            if sig_path.is_file() && seen_signatures.insert(sig_path.clone()) {
                auto_detected.push(sig_path);
            }
        }

        for req in extract_requires(&parsed_source.arena, &require_atoms) {
            let candidates = specifier_candidates(&req.specifier);
            let resolved = candidates
                .iter()
                .find_map(|candidate| classifier.classify(&file, candidate, req.form, &options.search_roots));
            match resolved {
                Some(ImportKind::Internal(target)) => {
                    graph.add_edge(file.clone(), target.clone());
                    if queued.insert(target.clone()) {
                        queue.push(target);
                    }
                }
                Some(ImportKind::ManagedStdlib(name)) => {
                    managed_stdlib.insert(name);
                }
                Some(ImportKind::RuntimeNative(name)) => {
                    runtime_native.insert(name);
                }
                None => {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticCode::ImportNotFound,
                        display_path(&file),
                        req.span,
                        format!("cannot resolve import `{}`", req.specifier),
                    ));
                }
            }
        }

        parsed.insert(file, parsed_source);
    }

    if diagnostics.has_errors() {
        return Err(());
    }

    let file_order = match graph.post_order(&entry) {
        Ok(order) => order,
        Err(cycle) => {
            let trail = cycle
                .path
                .iter()
                .map(|p| display_path(p))
                .collect::<Vec<_>>()
                .join(" -> ");
            diagnostics.push(Diagnostic::new(
                DiagnosticCode::CircularDependency,
                display_path(&entry),
                Span::new(0, 0),
                format!("circular dependency: {trail}"),
            ));
            return Err(());
        }
    };

    let mut managed_stdlib: Vec<String> = managed_stdlib.into_iter().collect();
    managed_stdlib.sort();
    let mut runtime_native: Vec<String> = runtime_native.into_iter().collect();
    runtime_native.sort();
    let explicit_signatures = options.signature_files.clone();

    Ok((file_order, parsed, managed_stdlib, runtime_native, explicit_signatures, auto_detected))
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

/// Deep-copy a parsed file's arena (rather than draining the
/// `parsed` map) so `walk_dependencies`'s per-path cache can be
/// consulted by path more than once if a future caller needs it (e.g.
/// incremental re-resolution); merging always wants its own owned
/// copy regardless.
fn clone_arena(arena: &NodeArena) -> NodeArena {
    let mut copy = NodeArena::new();
    for (_, node) in arena.iter() {
        copy.alloc(node.kind.clone(), node.span);
    }
    copy
}
