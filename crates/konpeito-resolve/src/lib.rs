//! Dependency resolution (§4.4): turning a source file's
//! `require`/`require_relative` calls into a whole-program import
//! graph, detecting cycles, classifying each specifier as internal,
//! managed-stdlib, or runtime-native, and producing the post-order
//! file list the inferrer consumes.

pub mod requires;
pub use requires::{extract_requires, RequireAtoms, RequireForm, RequireStatement};

pub mod resolver;
pub use resolver::{specifier_candidates, ImportClassifier, ImportKind};

pub mod graph;
pub use graph::{Cycle, DependencyGraph};
