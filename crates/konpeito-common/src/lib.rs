//! Common types and utilities for the Konpeito compiler core.
//!
//! This crate provides foundational types used across every pipeline
//! stage (§2):
//! - String interning (`Atom`, `Interner`, `ShardedInterner`)
//! - Source spans (`Span`, `Spanned`, `SpanBuilder`, `ByteSpan`)
//! - Line/column positions (`Position`, `Range`, `LineMap`)
//! - Structured diagnostics (`Diagnostic`, `DiagnosticCode`, `DiagnosticCollector`)
//! - Compiler options (`CoreOptions`)
//! - Shared limits and thresholds

pub mod interner;
pub use interner::{Atom, Interner, ShardedInterner};

pub mod span;
pub use span::{ByteSpan, Span, SpanBuilder, Spanned};

pub mod position;
pub use position::{LineMap, Location, Position, Range, SourceLocation};

pub mod diagnostics;
pub use diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCode, DiagnosticCollector, Label};

pub mod options;
pub use options::CoreOptions;

pub mod limits;
