//! Pipeline Driver: composes the Action Table Loader through the
//! Emitter into the single entry point [decompile], and owns the
//! configuration surface.
//!
//! A decompilation is a pure function of `(bytecode, action table, config)`
//! — the driver holds no state of its own beyond local variables threaded
//! stage to stage.

use crate::action_table::ActionTable;
use crate::ast::FunctionDef;
use crate::callgraph::{self, CallGraph};
use crate::consts::{DEFAULT_MAX_ITERATIONS, FN_PREFIX};
use crate::error::{DecompileError, Diagnostic, UnresolvedSignature};
use crate::instruction::Offset;
use crate::linker::{self, Linked};
use crate::prototype::{self, Signature};
use crate::simulate;
use crate::structure;
use crate::types::Type;
use crate::{emit, reader};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, info_span};

/// Which engine-action catalogue the caller's [ActionTable] was loaded from.
/// The driver never loads `nwscript.nss` itself — this only travels
/// alongside the rest of [Config] so a caller can thread it through
/// diagnostics or logging without a side channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameProfile {
    K1,
    K2,
}

impl Default for GameProfile {
    fn default() -> Self {
        GameProfile::K1
    }
}

/// The pipeline's configuration surface.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Fail with [DecompileError::UnresolvedSignature] if any reachable
    /// subroutine retains `Any` at a parameter or return slot.
    pub strict_signatures: bool,
    /// Which action-table source the caller's [ActionTable] came from.
    pub game: GameProfile,
    /// Cap on Prototype Engine fixed-point passes per SCC.
    pub max_iterations: usize,
    /// When true (default), subroutines unreachable from the program entry
    /// are dropped from the emitted output.
    pub prune_dead: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            strict_signatures: false,
            game: GameProfile::K1,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            prune_dead: true,
        }
    }
}

/// A cooperative cancellation check, polled between stages and between SCCs.
/// No network or filesystem resource is held across a check, so cancelling
/// simply stops the driver early with [DecompileError::Cancelled] and no
/// partial output.
pub trait CancellationToken {
    fn is_cancelled(&self) -> bool;
}

impl<F: Fn() -> bool> CancellationToken for F {
    fn is_cancelled(&self) -> bool {
        self()
    }
}

/// The token used by [decompile], which never cancels.
struct NeverCancel;

impl CancellationToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// The successful result of a decompilation: the reconstructed NSS text
/// plus every non-fatal [Diagnostic] surfaced along the way.
#[derive(Clone, Debug, PartialEq)]
pub struct Decompiled {
    pub nss: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Decompile an NCS byte stream into NSS source text.
///
/// This is a pure function of its three arguments: identical inputs
/// yield byte-identical output, independent of wall-clock time or
/// identifier-allocation state.
pub fn decompile(
    bytes: &[u8],
    action_table: &ActionTable,
    config: &Config,
) -> Result<Decompiled, DecompileError> {
    decompile_cancellable(bytes, action_table, config, &NeverCancel)
}

/// As [decompile], but polling `cancel` between stages and between SCCs so a
/// long-running batch driver can abort early.
pub fn decompile_cancellable(
    bytes: &[u8],
    action_table: &ActionTable,
    config: &Config,
    cancel: &dyn CancellationToken,
) -> Result<Decompiled, DecompileError> {
    let _span = info_span!("decompile", game = ?config.game).entered();

    let instructions = reader::read(bytes)?;
    if cancel.is_cancelled() {
        return Err(DecompileError::Cancelled);
    }

    let linked = linker::link(instructions)?;
    if cancel.is_cancelled() {
        return Err(DecompileError::Cancelled);
    }

    let call_graph = callgraph::build(&linked);
    let entry_point = linked
        .instructions
        .first()
        .map(|instr| instr.offset)
        .unwrap_or(0);
    if cancel.is_cancelled() {
        return Err(DecompileError::Cancelled);
    }

    let (signatures, mut diagnostics) = prototype::infer(
        &linked,
        &call_graph,
        action_table,
        entry_point,
        config.max_iterations,
    );
    if config.strict_signatures {
        if let Some(unresolved) = first_unresolved_signature(&diagnostics) {
            return Err(unresolved.into());
        }
    }
    info!(
        subroutine_count = call_graph.nodes().count(),
        "prototype engine resolved all reachable signatures"
    );
    if cancel.is_cancelled() {
        return Err(DecompileError::Cancelled);
    }

    let reachable = call_graph.reachable_from(entry_point);
    let order = callgraph::scc_order(&call_graph)
        .into_iter()
        .flatten()
        .filter(|entry| !config.prune_dead || reachable.contains(entry));

    let mut functions = Vec::new();
    for entry in order {
        if cancel.is_cancelled() {
            return Err(DecompileError::Cancelled);
        }
        let function = build_function(&linked, &signatures, action_table, entry, &mut diagnostics)?;
        functions.push(function);
    }

    let nss = emit::emit(&functions);
    Ok(Decompiled { nss, diagnostics })
}

fn first_unresolved_signature(diagnostics: &[Diagnostic]) -> Option<UnresolvedSignature> {
    diagnostics.iter().find_map(|d| match d {
        Diagnostic::AnyParameter { sub, index } => Some(UnresolvedSignature {
            sub: *sub,
            slot: Some(*index),
        }),
        Diagnostic::AnyReturn { sub } => Some(UnresolvedSignature {
            sub: *sub,
            slot: None,
        }),
        Diagnostic::UnstructuredJump { .. } => None,
    })
}

fn build_function(
    linked: &Linked,
    signatures: &HashMap<Offset, Signature>,
    action_table: &ActionTable,
    entry: Offset,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<FunctionDef, DecompileError> {
    let signature = signatures.get(&entry).cloned().unwrap_or(Signature {
        param_types: Vec::new(),
        return_type: Type::Void,
    });

    let sim_result = simulate::simulate(linked, signatures, action_table, entry)?;
    let (body, structure_diagnostics) = structure::structure(sim_result.blocks, entry);
    diagnostics.extend(structure_diagnostics);

    let params = signature
        .param_types
        .iter()
        .enumerate()
        .map(|(index, ty)| (ty.clone(), simulate::param_name(entry, index)))
        .collect();

    Ok(FunctionDef {
        entry,
        name: format!("{FN_PREFIX}{entry:x}"),
        params,
        return_type: signature.return_type,
        body,
    })
}
