//! All error and diagnostic types produced by the pipeline.
//!
//! Fatal conditions are typed errors that short-circuit the driver. Non-fatal
//! conditions are [Diagnostic]s, accumulated and returned alongside a
//! successful result.

use crate::instruction::Offset;
use thiserror::Error;

/// Errors raised while decoding the raw NCS byte stream.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ReaderError {
    #[error("input does not start with the NCS V1.0 magic")]
    BadMagic,
    #[error("bytecode stream ended mid-instruction at offset {0:#x}")]
    TruncatedBytecode(Offset),
    #[error("unknown opcode {opcode:#04x} at offset {offset:#x}")]
    UnknownOpcode { opcode: u8, offset: Offset },
}

/// Errors raised while resolving jump/JSR targets and subroutine bounds
/// or looking up an action.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("jump at offset {at:#x} targets offset {target:#x}, which is not a valid instruction")]
    UnresolvedJump { at: Offset, target: Offset },
    #[error("action table has no entry for index {0}")]
    ActionTableMissing(u16),
}

/// Errors raised during symbolic stack interpretation. These
/// indicate either malformed input or an implementation bug; they are never expected conditions.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("stack underflow at offset {0:#x}")]
    StackUnderflow(Offset),
    #[error("type conflict at offset {offset:#x}: expected {expected}, found {found}")]
    TypeConflict {
        offset: Offset,
        expected: String,
        found: String,
    },
    #[error("JSR at offset {0:#x} targets a subroutine with no prototype; the prototype engine should have prevented this")]
    UnresolvedJsr(Offset),
}

/// Errors raised while lifting the instruction graph into structured control
/// flow. `UnstructuredJump` is recoverable (falls back to a labeled
/// jump and a diagnostic); the rest are not expected to occur for
/// well-formed input produced by a compliant compiler.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum StructureError {
    #[error("basic block at offset {0:#x} has divergent incoming stack depths")]
    DivergentStackDepth(Offset),
}

/// Strict-mode-only failure: a reachable subroutine retained `Any` at
/// a parameter or return slot.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("subroutine at {sub:#x} has an unresolved `Any` at slot {slot:?}")]
pub struct UnresolvedSignature {
    pub sub: Offset,
    /// `None` means the return slot; `Some(i)` means parameter `i`.
    pub slot: Option<usize>,
}

/// The top-level error returned by [crate::decompile] on fatal failure.
#[derive(Debug, Error)]
pub enum DecompileError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error(transparent)]
    UnresolvedSignature(#[from] UnresolvedSignature),
    #[error("decompilation was cancelled")]
    Cancelled,
}

/// A non-fatal finding surfaced alongside a successful [crate::Decompiled]
/// result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// A reachable subroutine's parameter `index` never narrowed past `Any`.
    AnyParameter { sub: Offset, index: usize },
    /// A reachable subroutine's return type never narrowed past `Any`.
    AnyReturn { sub: Offset },
    /// A `JMP` could not be structured as break/continue/if/loop and was
    /// emitted as a labeled jump instead.
    UnstructuredJump { at: Offset, target: Offset },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AnyParameter { sub, index } => write!(
                f,
                "subroutine {sub:#x}: parameter {index} never narrowed past `any`"
            ),
            Self::AnyReturn { sub } => {
                write!(f, "subroutine {sub:#x}: return type never narrowed past `any`")
            }
            Self::UnstructuredJump { at, target } => write!(
                f,
                "jump at {at:#x} -> {target:#x} could not be structured; emitted as a label"
            ),
        }
    }
}
