//! The signature registry (§4.3): method and class-layout lookup,
//! populated from built-in rules and ingested signature-file
//! declarations, read by every later inference step.

pub mod builtin;
pub use builtin::BuiltinMethod;

pub mod registry;
pub use registry::{ClassLayout, MethodSignature, ParamSig, ResolvedMethod, SignatureRegistry};

pub mod ingest;
pub use ingest::{ingest_signature_file, lower_type_expr, NativeBindings, PrimitiveAtoms};
