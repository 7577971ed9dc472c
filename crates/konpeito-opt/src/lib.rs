//! IR-level optimizations that run after lowering and SSA promotion,
//! gated behind the `optimize` option (§6): monomorphization (§4.8),
//! inlining (§4.9), and loop-invariant code motion (§4.10).
//!
//! Every pass here takes a `&mut konpeito_ir::Program` (or `Function`)
//! and mutates it in place, the same ownership shape the rest of the
//! pipeline uses for the IR (§5: "owned by a single pass at a time").

pub mod inline;
pub mod licm;
pub mod monomorphize;

pub use inline::{inline_functions, InlineStats};
pub use licm::{run_licm, LicmStats};
pub use monomorphize::{monomorphize, MonomorphizeStats};
