//! Compiler options for a single compile (§6 configuration table).
//!
//! Lives in `konpeito-common`, mirroring how the teacher keeps
//! `CheckerOptions` in its common crate so every downstream stage can read
//! it without creating a dependency cycle back to the pipeline driver.

use std::path::PathBuf;

/// Configuration accepted by the compiler core, per §6.
#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// The file to begin dependency resolution at.
    pub entry_source: PathBuf,
    /// Additional roots for import resolution.
    pub search_roots: Vec<PathBuf>,
    /// Explicit signature files to load.
    pub signature_files: Vec<PathBuf>,
    /// Whether to extract in-source signature comments.
    pub inline_signatures: bool,
    /// Whether to run monomorphization, inlining, and LICM.
    pub optimize: bool,
    /// Whether to hand out the IR for inspection before backend.
    pub emit_ir: bool,
}

impl CoreOptions {
    #[must_use]
    pub fn new(entry_source: impl Into<PathBuf>) -> Self {
        Self {
            entry_source: entry_source.into(),
            search_roots: Vec::new(),
            signature_files: Vec::new(),
            inline_signatures: false,
            optimize: false,
            emit_ir: false,
        }
    }

    #[must_use]
    pub fn with_search_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_roots.push(root.into());
        self
    }

    #[must_use]
    pub fn with_signature_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.signature_files.push(file.into());
        self
    }

    #[must_use]
    pub fn with_inline_signatures(mut self, enabled: bool) -> Self {
        self.inline_signatures = enabled;
        self
    }

    #[must_use]
    pub fn with_optimize(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }

    #[must_use]
    pub fn with_emit_ir(mut self, enabled: bool) -> Self {
        self.emit_ir = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let opts = CoreOptions::new("main.rb")
            .with_search_root("lib")
            .with_optimize(true)
            .with_emit_ir(true);
        assert_eq!(opts.entry_source, PathBuf::from("main.rb"));
        assert_eq!(opts.search_roots, vec![PathBuf::from("lib")]);
        assert!(opts.optimize);
        assert!(opts.emit_ir);
        assert!(!opts.inline_signatures);
    }
}
