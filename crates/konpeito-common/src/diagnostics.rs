//! Structured diagnostics (§4.11, §7).
//!
//! The core only produces structured records; rendering them to a
//! terminal, an LSP client, or anywhere else is a caller concern. Every
//! diagnostic carries a machine-readable [`DiagnosticCode`], a primary
//! message, a source span, and optional labels/notes for richer
//! rendering.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a diagnostic, per the §7 taxonomy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticCategory {
    Info,
    Warning,
    Error,
}

/// The closed set of diagnostic kinds the core can emit (§7 table).
///
/// `ParseError` is reported by the external parser and only represented
/// here so that a caller funneling parser diagnostics through the same
/// collector has somewhere to put them; the core itself never constructs
/// one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticCode {
    ImportNotFound,
    CircularDependency,
    ParseError,
    TypeMismatch,
    InfiniteType,
    ArityMismatch,
    UnresolvedType,
    UnsupportedConstruct,
    MethodNotFound,
}

impl DiagnosticCode {
    /// Severity mandated by §7 for this code. A handful of codes can be
    /// raised at more than one severity by callers (e.g. a `TypeMismatch`
    /// degraded to a note); this is the *default* severity used when the
    /// call site doesn't override it.
    #[must_use]
    pub const fn default_category(self) -> DiagnosticCategory {
        match self {
            Self::ImportNotFound | Self::CircularDependency | Self::ParseError => {
                DiagnosticCategory::Error
            }
            Self::TypeMismatch | Self::InfiniteType | Self::ArityMismatch => {
                DiagnosticCategory::Error
            }
            Self::UnresolvedType | Self::UnsupportedConstruct | Self::MethodNotFound => {
                DiagnosticCategory::Warning
            }
        }
    }

    /// Whether this code is in the §7 "Fatal" family (aborts the compile
    /// before IR generation rather than being collected and continued
    /// past).
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::ImportNotFound | Self::CircularDependency | Self::ParseError
        )
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ImportNotFound => "ImportNotFound",
            Self::CircularDependency => "CircularDependency",
            Self::ParseError => "ParseError",
            Self::TypeMismatch => "TypeMismatch",
            Self::InfiniteType => "InfiniteType",
            Self::ArityMismatch => "ArityMismatch",
            Self::UnresolvedType => "UnresolvedType",
            Self::UnsupportedConstruct => "UnsupportedConstruct",
            Self::MethodNotFound => "MethodNotFound",
        };
        f.write_str(name)
    }
}

/// A secondary location attached to a diagnostic (e.g. "parameter declared
/// here").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub file: String,
    pub span: Span,
    pub message: String,
}

/// A single diagnostic record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub category: DiagnosticCategory,
    pub code: DiagnosticCode,
    pub file: String,
    pub span: Span,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, file: impl Into<String>, span: Span, message: impl Into<String>) -> Self {
        Self {
            category: code.default_category(),
            code,
            file: file.into(),
            span,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: DiagnosticCategory) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub fn with_label(mut self, file: impl Into<String>, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label {
            file: file.into(),
            span,
            message: message.into(),
        });
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Append-only collector for the diagnostics produced by one compile
/// (§5: "Diagnostic collector: append-only during the run").
#[derive(Default, Debug, Clone)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(other);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// §7 "User-visible behavior": any Error-severity diagnostic fails the
    /// compile; Warning/Info-only compiles succeed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.category == DiagnosticCategory::Error)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes_match_section_7_table() {
        assert!(DiagnosticCode::ImportNotFound.is_fatal());
        assert!(DiagnosticCode::CircularDependency.is_fatal());
        assert!(!DiagnosticCode::TypeMismatch.is_fatal());
        assert!(!DiagnosticCode::UnresolvedType.is_fatal());
    }

    #[test]
    fn default_categories_match_section_7_table() {
        assert_eq!(
            DiagnosticCode::TypeMismatch.default_category(),
            DiagnosticCategory::Error
        );
        assert_eq!(
            DiagnosticCode::UnresolvedType.default_category(),
            DiagnosticCategory::Warning
        );
    }

    #[test]
    fn collector_reports_failure_only_with_errors() {
        let mut collector = DiagnosticCollector::new();
        collector.push(Diagnostic::new(
            DiagnosticCode::UnresolvedType,
            "a.rb",
            Span::new(0, 1),
            "x",
        ));
        assert!(!collector.has_errors());

        collector.push(Diagnostic::new(
            DiagnosticCode::TypeMismatch,
            "a.rb",
            Span::new(2, 3),
            "y",
        ));
        assert!(collector.has_errors());
    }
}
