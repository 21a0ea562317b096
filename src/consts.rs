//! Crate-wide constants.

/// Default cap on SCC fixed-point passes. A safety net, not a
/// correctness requirement — the type lattice guarantees convergence in at
/// most `|slots|` passes per SCC.
pub const DEFAULT_MAX_ITERATIONS: usize = 16;

/// The 8-byte magic that opens every NCS file: `NCS V1.0`.
pub const NCS_MAGIC: &[u8; 8] = b"NCS V1.0";

/// Prefix for synthesized function identifiers, keyed by defining offset.
pub const FN_PREFIX: &str = "fn_";
/// Prefix for synthesized local-variable identifiers.
pub const VAR_PREFIX: &str = "var_";
/// Prefix for synthesized global (static) identifiers.
pub const STA_PREFIX: &str = "sta_";
/// Prefix for synthesized label identifiers (unstructured-jump fallback).
pub const LOC_PREFIX: &str = "loc_";

/// Indentation unit used by the emitter.
pub const INDENT: &str = "    ";
