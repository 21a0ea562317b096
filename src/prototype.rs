//! Prototype Engine: fixed-point inference of every subroutine's
//! signature (parameter count, parameter types, return type).
//!
//! A legacy two-pass approach would interleave prototyping with
//! decompilation, making a `JSR` into an unprototyped callee a fatal
//! condition mid-stream. Here every signature is resolved in a single
//! globally-ordered pass (SCCs leaves first, fixed point within each SCC)
//! before stack simulation ever begins.

use crate::action_table::ActionTable;
use crate::callgraph::{self, CallGraph};
use crate::error::Diagnostic;
use crate::instruction::{Instruction, Offset, Opcode, Operand};
use crate::linker::Linked;
use crate::types::Type;
use std::collections::HashMap;
use tracing::{debug, info};

/// A subroutine's inferred calling convention.
#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub param_types: Vec<Type>,
    pub return_type: Type,
}

impl Signature {
    fn bottom() -> Self {
        Signature {
            param_types: Vec::new(),
            return_type: Type::Void,
        }
    }

    /// Widen `self` by joining in everything observed in `other`. Returns
    /// whether anything actually changed, so the fixed-point loop can
    /// detect convergence.
    fn widen(&mut self, other: &Observed) -> bool {
        let mut changed = false;
        if other.param_types.len() > self.param_types.len() {
            self.param_types.resize(other.param_types.len(), Type::Any);
            changed = true;
        }
        for (slot, observed) in self.param_types.iter_mut().zip(&other.param_types) {
            let joined = slot.join(observed);
            if &joined != slot {
                *slot = joined;
                changed = true;
            }
        }
        let joined_return = self.return_type.join(&other.return_type);
        if joined_return != self.return_type {
            self.return_type = joined_return;
            changed = true;
        }
        changed
    }
}

/// What one pass of the lightweight abstract interpretation observed about a
/// single subroutine body, before being folded into its [Signature].
struct Observed {
    param_types: Vec<Type>,
    return_type: Type,
}

/// A value on the mini interpreter's abstract stack. Unlike the full Stack
/// Simulator, this only tracks enough to widen parameter/return
/// types — it never builds expression trees.
#[derive(Clone, Debug)]
enum Slot {
    /// A value loaded straight from parameter `index` via `CPTOPBP`.
    Param(usize),
    /// Anything else: a local, a constant, or a computed value, carrying
    /// whatever type could be determined for it (`Any` if none).
    Value(Type),
}

/// Parameter slots are accessed via `CPDOWNBP`/`CPTOPBP` with a negative
/// offset; slot index counts 4-byte words back from the base
/// pointer, so offset -4 is parameter 0, -8 is parameter 1, and so on.
fn param_index(offset: i32) -> Option<usize> {
    crate::instruction::negative_word_index(offset)
}

/// Run the lightweight interpretation over one subroutine body, using the
/// current (possibly still-converging) `signatures` table for callee
/// lookups.
fn interpret_prologue(
    body: &[Instruction],
    signatures: &HashMap<Offset, Signature>,
    action_table: &ActionTable,
) -> Observed {
    let mut stack: Vec<Slot> = Vec::new();
    let mut param_types: Vec<Type> = Vec::new();
    let mut return_type = Type::Void;

    fn widen_param(param_types: &mut Vec<Type>, index: usize, ty: Type) {
        if index >= param_types.len() {
            param_types.resize(index + 1, Type::Any);
        }
        param_types[index] = param_types[index].join(&ty);
    }

    fn slot_type(param_types: &[Type], slot: &Slot) -> Type {
        match slot {
            Slot::Param(i) => param_types.get(*i).cloned().unwrap_or(Type::Any),
            Slot::Value(ty) => ty.clone(),
        }
    }

    fn pop(stack: &mut Vec<Slot>) -> Slot {
        stack.pop().unwrap_or(Slot::Value(Type::Any))
    }

    for instr in body {
        match instr.opcode {
            Opcode::Const => {
                let ty = match &instr.operand {
                    Operand::Constant(crate::instruction::Constant::Int(_)) => Type::Int,
                    Operand::Constant(crate::instruction::Constant::Float(_)) => Type::Float,
                    Operand::Constant(crate::instruction::Constant::String(_)) => Type::String,
                    Operand::Constant(crate::instruction::Constant::Object(_)) => Type::Object,
                    _ => Type::Any,
                };
                stack.push(Slot::Value(ty));
            }
            Opcode::Rsadd => stack.push(Slot::Value(Type::Any)),
            Opcode::CpTopBp => {
                if let Operand::StackSlot { offset, size } = instr.operand {
                    let words = (size as usize / 4).max(1);
                    match param_index(offset) {
                        Some(index) => {
                            // `index` names the farthest (highest-index)
                            // word of the read; a struct/vector-width read
                            // spans `words` consecutive parameter word-slots
                            // running from `index_low` up through `index`.
                            // Merely being read marks them as parameters;
                            // usage below may narrow their types further.
                            let index_low = index.saturating_sub(words.saturating_sub(1));
                            for i in index_low..index_low + words {
                                widen_param(&mut param_types, i, Type::Any);
                            }
                            if words == 1 {
                                stack.push(Slot::Param(index));
                            } else {
                                let field_types: Vec<Type> = (index_low..index_low + words)
                                    .map(|i| param_types.get(i).cloned().unwrap_or(Type::Any))
                                    .collect();
                                stack.push(Slot::Value(Type::Struct(field_types)));
                            }
                        }
                        None => stack.push(Slot::Value(Type::Any)),
                    }
                }
            }
            Opcode::CpTopSp => stack.push(Slot::Value(Type::Any)),
            Opcode::CpDownBp | Opcode::CpDownSp => {
                // Copy-down doesn't pop; it leaves the source value on top.
                if stack.is_empty() {
                    stack.push(Slot::Value(Type::Any));
                }
            }
            Opcode::Movsp => {
                if let Operand::Size(size) = instr.operand {
                    let n = (-size / 4).max(0) as usize;
                    for _ in 0..n {
                        pop(&mut stack);
                    }
                }
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Eq
            | Opcode::Neq
            | Opcode::Geq
            | Opcode::Gt
            | Opcode::Lt
            | Opcode::Leq
            | Opcode::LogAnd
            | Opcode::LogOr
            | Opcode::IncOr
            | Opcode::ExcOr
            | Opcode::BoolAnd
            | Opcode::Shleft
            | Opcode::Shright
            | Opcode::Ushright => {
                let rhs = pop(&mut stack);
                let lhs = pop(&mut stack);
                // The concrete operand-type pair lives in the type byte in
                // the real format; a full decode belongs to the Stack
                // Simulator. Here we only widen using whatever type
                // each operand already carries, defaulting to `int` for the
                // common numeric case — enough for signature inference
                // without claiming more precision than this lightweight
                // pass can justify.
                let operand_ty =
                    slot_type(&param_types, &lhs).join(&slot_type(&param_types, &rhs));
                let result_ty = if operand_ty == Type::Any {
                    Type::Int
                } else {
                    operand_ty.clone()
                };
                if let Slot::Param(i) = lhs {
                    widen_param(&mut param_types, i, operand_ty.clone());
                }
                if let Slot::Param(i) = rhs {
                    widen_param(&mut param_types, i, operand_ty);
                }
                let is_compare = matches!(
                    instr.opcode,
                    Opcode::Eq
                        | Opcode::Neq
                        | Opcode::Geq
                        | Opcode::Gt
                        | Opcode::Lt
                        | Opcode::Leq
                );
                stack.push(Slot::Value(if is_compare { Type::Int } else { result_ty }));
            }
            Opcode::Neg | Opcode::Not | Opcode::Comp => {
                let v = pop(&mut stack);
                let ty = slot_type(&param_types, &v);
                stack.push(Slot::Value(if ty == Type::Any { Type::Int } else { ty }));
            }
            Opcode::Action => {
                if let Operand::Action { index, arg_count } = instr.operand {
                    if let Ok(action) = action_table.action(index) {
                        for j in (0..arg_count as usize).rev() {
                            let arg = pop(&mut stack);
                            if let Slot::Param(i) = arg {
                                let ty = action
                                    .param_types
                                    .get(j)
                                    .cloned()
                                    .unwrap_or(Type::Any);
                                widen_param(&mut param_types, i, ty);
                            }
                        }
                        if action.return_type != Type::Void {
                            stack.push(Slot::Value(action.return_type.clone()));
                        }
                    }
                }
            }
            Opcode::Jsr => {
                if let Some(target) = instr.relative_target() {
                    if let Some(callee) = signatures.get(&target) {
                        let n = callee.param_types.len();
                        for j in (0..n).rev() {
                            let arg = pop(&mut stack);
                            if let Slot::Param(i) = arg {
                                let ty = callee.param_types[j].clone();
                                widen_param(&mut param_types, i, ty);
                            }
                        }
                        if callee.return_type != Type::Void {
                            stack.push(Slot::Value(callee.return_type.clone()));
                        }
                    }
                }
            }
            Opcode::Retn => {
                let observed_ty = match stack.last() {
                    None => Type::Void,
                    Some(slot) => slot_type(&param_types, slot),
                };
                return_type = return_type.join(&observed_ty);
            }
            _ => {}
        }
    }

    Observed {
        param_types,
        return_type,
    }
}

/// Infer a [Signature] for every subroutine in `linked`. Returns the
/// signature table plus any `Any`-parameter/`Any`-return diagnostics for
/// subroutines reachable from `entry_point`.
pub fn infer(
    linked: &Linked,
    call_graph: &CallGraph,
    action_table: &ActionTable,
    entry_point: Offset,
    max_iterations: usize,
) -> (HashMap<Offset, Signature>, Vec<Diagnostic>) {
    let sccs = callgraph::scc_order(call_graph);
    let mut signatures: HashMap<Offset, Signature> = HashMap::new();

    for scc in &sccs {
        for &entry in scc {
            signatures.insert(entry, Signature::bottom());
        }

        let mut converged = false;
        for pass in 0..max_iterations {
            let mut changed = false;
            for &entry in scc {
                let body = linked.subroutine_body(entry);
                let observed = interpret_prologue(body, &signatures, action_table);
                if let Some(sig) = signatures.get_mut(&entry) {
                    if sig.widen(&observed) {
                        changed = true;
                    }
                }
            }
            debug!(scc = ?scc, pass, changed, "prototype engine pass");
            if !changed {
                converged = true;
                break;
            }
        }
        info!(scc = ?scc, converged, "prototype engine SCC resolved");
    }

    let reachable = call_graph.reachable_from(entry_point);
    let mut diagnostics = Vec::new();
    for &sub in &reachable {
        if let Some(sig) = signatures.get(&sub) {
            for (index, ty) in sig.param_types.iter().enumerate() {
                if *ty == Type::Any {
                    diagnostics.push(Diagnostic::AnyParameter { sub, index });
                }
            }
            if sig.return_type == Type::Any {
                diagnostics.push(Diagnostic::AnyReturn { sub });
            }
        }
    }

    (signatures, diagnostics)
}
