//! Whole-program type inference (§4.5, §4.6).
//!
//! Consumes the merged executable tree a dependency-resolved compile
//! produces and the [`konpeito_signatures::SignatureRegistry`] built
//! from ingested signature files, and produces a [`typed_tree::TypedTree`]
//! ready for lowering — running Algorithm W with deferred constraints
//! and flow-sensitive narrowing along the way.

pub mod class_names;
pub mod constraints;
pub mod environment;
pub mod infer;
pub mod narrowing;
pub mod typed_tree;

pub use class_names::{class_name_of, ClassNameAtoms};
pub use constraints::{ConstraintStore, DeferredConstraint};
pub use environment::Environment;
pub use infer::Inferrer;
pub use narrowing::{compute_narrowing, Delta, NarrowingAtoms, NarrowingDelta};
pub use typed_tree::{build_typed_tree, TypedTree};
