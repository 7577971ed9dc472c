//! The compiler core's pipeline driver (§5, §6, §7).
//!
//! Owns the single compile-wide `Interner`, `SignatureRegistry`,
//! `TypeInterner`/`TypeVarTable`, and `DiagnosticCollector` every other
//! workspace crate is written to be handed, and drives them in order:
//! dependency resolution, signature ingestion, whole-program inference,
//! IR lowering, SSA promotion, and (when requested) monomorphization,
//! inlining, and loop-invariant code motion.
//!
//! The concrete source parser and signature-file parser are external
//! collaborators per §6 — this crate accepts them as [`SourceParser`]/
//! [`SignatureParser`] implementations rather than parsing anything
//! itself.

pub mod merge;
pub mod pipeline;

pub use merge::{merge_parsed_files, MergedTree, ParsedFile};
pub use pipeline::{compile, CompileOutput, ParsedSignature, ParsedSource, SignatureParser, SourceParser};
