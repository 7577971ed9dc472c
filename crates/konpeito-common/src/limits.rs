//! Centralized limits and thresholds for the compiler core.
//!
//! Small, named constants rather than magic numbers scattered across
//! passes — the values themselves come straight from spec-mandated
//! bounds (§4.5, §4.9) rather than tuning.

/// Cap on the deferred-constraint fixed-point loop (§4.5 "Deferred-constraint
/// resolution... capped at a small iteration count, e.g. 5").
pub const MAX_DEFERRED_CONSTRAINT_ITERATIONS: u32 = 5;

/// Maximum instruction count for an inlining candidate's body (§4.9).
pub const MAX_INLINE_BODY_INSTRUCTIONS: usize = 10;

/// Maximum inlining depth at a single call site (§4.9).
pub const MAX_INLINE_DEPTH: u32 = 3;

/// Guard against runaway scope-chain walks (defensive bound shared by
/// environment lookup and flow-narrowing restoration).
pub const MAX_SCOPE_WALK_ITERATIONS: usize = 10_000;
