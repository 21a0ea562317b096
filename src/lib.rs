//! A decompiler for NWScript compiled bytecode (NCS) — the stack-based VM
//! format used by BioWare's Aurora/Odyssey engines (Neverwinter Nights,
//! KOTOR, KOTOR II). Given an `.ncs` byte stream and an engine-action table
//! extracted from a companion `nwscript.nss` source, [decompile]
//! reconstructs a semantically equivalent high-level `.nss` source text.
//!
//! The pipeline is a linear sequence of stages over a shared analysis
//! context, leaves first:
//!
//! 1. [action_table] — loads the engine-action catalogue.
//! 2. [reader] — decodes the raw byte stream into [instruction::Instruction]s.
//! 3. [linker] — resolves jump/JSR targets and discovers subroutines.
//! 4. [callgraph] — builds the call graph and its SCC condensation.
//! 5. [prototype] — infers every subroutine's signature by fixed point.
//! 6. [simulate] — symbolically interprets the stack into typed [ast::Expr]s.
//! 7. [structure] — lifts basic blocks into structured [ast::Stmt]s.
//! 8. [emit] — serializes the structured AST to NSS text.
//!
//! [driver] composes all of the above behind the single [decompile] entry
//! point. Compiling `.nss` back to `.ncs`, emulating runtime behavior, and
//! recovering original identifiers are explicitly out of scope — this crate
//! only goes from bytecode to a readable, recompilable source
//! reconstruction.
//!
//! ```ignore
//! use ncs_decompiler::{decompile, ActionTable, Config};
//!
//! let bytes: &[u8] = /* bytes read from an .ncs file */;
//! let table = ActionTable::default();
//! let config = Config::default();
//! let result = decompile(bytes, &table, &config)?;
//! println!("{}", result.nss);
//! ```

pub mod action_table;
pub mod ast;
pub mod callgraph;
pub mod consts;
mod driver;
pub mod emit;
pub mod error;
pub mod instruction;
pub mod linker;
pub mod prototype;
pub mod reader;
pub mod simulate;
pub mod structure;
pub mod types;

pub use action_table::{ActionEntry, ActionTable};
pub use driver::{
    decompile, decompile_cancellable, CancellationToken, Config, Decompiled, GameProfile,
};
pub use error::{DecompileError, Diagnostic, UnresolvedSignature};
