//! Stack Simulator: per-subroutine symbolic interpretation of the
//! abstract stack, producing typed [Expr] trees rooted at each observable
//! effect, split into the [BasicBlock]s the Control-Flow Structurer
//! lifts into nested statements.
//!
//! The pass walks a subroutine's instructions exactly once, in program
//! order.

use crate::action_table::ActionTable;
use crate::ast::{BinOp, Expr, Literal, Stmt, UnOp};
use crate::consts::{STA_PREFIX, VAR_PREFIX};
use crate::error::SimError;
use crate::instruction::{negative_word_index, Constant, Instruction, Offset, Opcode, Operand};
use crate::linker::Linked;
use crate::prototype::Signature;
use crate::types::Type;
use std::collections::HashMap;

/// How a [BasicBlock] hands control to its successor(s).
#[derive(Clone, Debug, PartialEq)]
pub enum Terminator {
    /// Falls into the next block with no jump instruction.
    Fallthrough(Offset),
    /// Unconditional `JMP`.
    Jump(Offset),
    /// A `JZ`/`JNZ`, normalized so `cond` reads naturally as an `if`
    /// condition: control goes to `if_true` when `cond` is nonzero, to
    /// `if_false` otherwise.
    Branch {
        cond: Expr,
        if_true: Offset,
        if_false: Offset,
    },
    /// `RETN`, carrying the returned value if the subroutine's signature is
    /// non-void.
    Return(Option<Expr>),
}

/// One maximal straight-line run of statements between control-flow
/// decisions.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicBlock {
    pub start: Offset,
    pub stmts: Vec<Stmt>,
    pub terminator: Terminator,
}

/// Every basic block belonging to one subroutine, in program order.
#[derive(Clone, Debug, PartialEq)]
pub struct SimResult {
    pub blocks: Vec<BasicBlock>,
}

fn var_name(offset: Offset) -> String {
    format!("{VAR_PREFIX}{offset:x}")
}

fn static_name(offset: Offset) -> String {
    format!("{STA_PREFIX}{offset:x}")
}

pub(crate) fn param_name(entry: Offset, index: usize) -> String {
    format!("{VAR_PREFIX}{entry:x}_{index}")
}

/// One slot of the abstract stack: the expression
/// currently occupying it, plus whether a `VarDecl` has already been
/// emitted for it. A slot stays undeclared while it is purely an
/// intermediate value consumed later in the same expression; it becomes a
/// declared local the first time it survives a statement boundary.
#[derive(Clone, Debug)]
struct Slot {
    expr: Expr,
    declared: bool,
    origin: Offset,
}

struct Interp<'a> {
    signatures: &'a HashMap<Offset, Signature>,
    action_table: &'a ActionTable,
    entry: Offset,
    return_type: Type,
    stack: Vec<Slot>,
    stmts: Vec<Stmt>,
    blocks: Vec<BasicBlock>,
    block_start: Offset,
}

impl<'a> Interp<'a> {
    fn push(&mut self, expr: Expr, origin: Offset) {
        self.stack.push(Slot {
            expr,
            declared: false,
            origin,
        });
    }

    fn pop(&mut self, at: Offset) -> Result<Expr, SimError> {
        self.stack
            .pop()
            .map(|slot| slot.expr)
            .ok_or(SimError::StackUnderflow(at))
    }

    fn pop_n(&mut self, n: usize, at: Offset) -> Result<Vec<Expr>, SimError> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.pop(at)?);
        }
        out.reverse();
        Ok(out)
    }

    /// Every stack slot still undeclared at a statement boundary is, by
    /// construction, a local variable that outlives its creating
    /// expression — emit its `VarDecl` now.
    fn flush_undeclared(&mut self) {
        for slot in &mut self.stack {
            if !slot.declared {
                let name = var_name(slot.origin);
                self.stmts.push(Stmt::VarDecl {
                    ty: slot.expr.ty(),
                    name: name.clone(),
                    init: Some(slot.expr.clone()),
                });
                slot.expr = Expr::Ident {
                    name,
                    ty: slot.expr.ty(),
                };
                slot.declared = true;
            }
        }
    }

    /// Groups `n` consecutive popped words into a single value: a bare
    /// scalar, a 3-float vector literal, or a
    /// generic flattened aggregate for wider structs.
    fn coalesce(words: Vec<Expr>) -> Expr {
        match words.len() {
            1 => words.into_iter().next().unwrap(),
            3 if words.iter().all(|w| w.ty() == Type::Float) => {
                let mut it = words.into_iter();
                Expr::Vector {
                    x: Box::new(it.next().unwrap()),
                    y: Box::new(it.next().unwrap()),
                    z: Box::new(it.next().unwrap()),
                }
            }
            _ => Expr::Aggregate(words),
        }
    }

    /// Splits a value being copied down into `words` per-slot
    /// sub-expressions, preserving field order. A literal [Expr::Aggregate]
    /// of matching width is unpacked directly; anything else (a call result,
    /// an identifier already typed as a struct, ...) is addressed
    /// field-by-field through [Expr::FieldAccess].
    fn split_fields(value: &Expr, words: usize) -> Vec<Expr> {
        if words <= 1 {
            return vec![value.clone()];
        }
        match value {
            Expr::Aggregate(fields) if fields.len() == words => fields.clone(),
            _ => (0..words)
                .map(|index| Expr::FieldAccess {
                    base: Box::new(value.clone()),
                    index,
                    ty: Type::Any,
                })
                .collect(),
        }
    }

    fn close_block(&mut self, terminator: Terminator, next_start: Offset) {
        self.flush_undeclared();
        let stmts = std::mem::take(&mut self.stmts);
        self.blocks.push(BasicBlock {
            start: self.block_start,
            stmts,
            terminator,
        });
        self.block_start = next_start;
    }

    fn run(&mut self, body: &[Instruction], leaders: &[Offset]) -> Result<(), SimError> {
        self.block_start = body.first().map(|i| i.offset).unwrap_or(0);
        for instr in body {
            if leaders.contains(&instr.offset) && instr.offset != self.block_start {
                self.close_block(Terminator::Fallthrough(instr.offset), instr.offset);
            }
            self.step(instr)?;
        }
        Ok(())
    }

    fn step(&mut self, instr: &Instruction) -> Result<(), SimError> {
        match instr.opcode {
            Opcode::Const => {
                let expr = match &instr.operand {
                    Operand::Constant(Constant::Int(v)) => Expr::Literal(Literal::Int(*v)),
                    Operand::Constant(Constant::Float(v)) => {
                        let v = if *v == 0.0 { 0.0 } else { *v };
                        Expr::Literal(Literal::Float(v))
                    }
                    Operand::Constant(Constant::String(v)) => {
                        Expr::Literal(Literal::String(v.clone()))
                    }
                    Operand::Constant(Constant::Object(v)) => Expr::Literal(Literal::Object(*v)),
                    _ => return Err(SimError::StackUnderflow(instr.offset)),
                };
                self.push(expr, instr.offset);
            }
            Opcode::Rsadd => {
                // Reserves a fresh, zero-valued local of the declared type
                // (an uninitialized `int x;`-style declaration).
                let ty = type_from_byte(instr.type_byte);
                let zero = zero_literal(&ty);
                self.stmts.push(Stmt::VarDecl {
                    ty: ty.clone(),
                    name: var_name(instr.offset),
                    init: Some(zero),
                });
                self.stack.push(Slot {
                    expr: Expr::Ident {
                        name: var_name(instr.offset),
                        ty,
                    },
                    declared: true,
                    origin: instr.offset,
                });
            }
            Opcode::CpTopSp => {
                if let Operand::StackSlot { offset, size } = instr.operand {
                    let words = (size as usize / 4).max(1);
                    let base = self.stack.len();
                    let idx =
                        base.saturating_sub(negative_word_index(offset).unwrap_or(0) + words);
                    let slice: Vec<Expr> = self.stack[idx..idx + words]
                        .iter()
                        .map(|s| s.expr.clone())
                        .collect();
                    self.push(Self::coalesce(slice), instr.offset);
                }
            }
            Opcode::CpTopBp => {
                if let Operand::StackSlot { offset, size } = instr.operand {
                    let words = (size as usize / 4).max(1);
                    // Parameters are seeded onto the bottom of the stack at
                    // subroutine entry (see `simulate`), so BP-relative
                    // reads resolve through the same stack the SP-relative
                    // ops use.
                    if let Some(index) = negative_word_index(offset) {
                        let len = self.stack.len();
                        // `index` names the farthest (highest-index) word of
                        // a multi-word read; the struct's words run from
                        // `index_low` up through `index` inclusive.
                        let index_low = index.saturating_sub(words.saturating_sub(1));
                        if words > 1 && index_low + words <= len {
                            let slice: Vec<Expr> = self.stack[index_low..index_low + words]
                                .iter()
                                .map(|s| s.expr.clone())
                                .collect();
                            self.push(Self::coalesce(slice), instr.offset);
                        } else {
                            let idx = index.min(len.saturating_sub(1));
                            let expr = self
                                .stack
                                .get(idx)
                                .map(|s| s.expr.clone())
                                .unwrap_or(Expr::Ident {
                                    name: param_name(self.entry, index),
                                    ty: Type::Any,
                                });
                            self.push(expr, instr.offset);
                        }
                    } else {
                        // Non-negative BP offsets address file-scope
                        // globals established before entry into `main`.
                        let name = static_name(instr.offset);
                        self.push(
                            Expr::Ident {
                                name,
                                ty: Type::Any,
                            },
                            instr.offset,
                        );
                    }
                }
            }
            Opcode::CpDownSp | Opcode::CpDownBp => {
                if let Operand::StackSlot { offset, size } = instr.operand {
                    let words = (size as usize / 4).max(1);
                    let value = self.stack.last().map(|s| s.expr.clone()).ok_or(
                        SimError::StackUnderflow(instr.offset),
                    )?;
                    if let Some(index) = negative_word_index(offset) {
                        let len = self.stack.len();
                        let target_base = len.saturating_sub(index + words);
                        // A struct/vector-width copy-down writes `words`
                        // consecutive slots in field order, splitting the
                        // source value so later reads of each field resolve
                        // independently.
                        for (i, field) in Self::split_fields(&value, words).into_iter().enumerate()
                        {
                            let target_idx = (target_base + i).min(len.saturating_sub(1));
                            let name = self
                                .stack
                                .get(target_idx)
                                .and_then(|s| match &s.expr {
                                    Expr::Ident { name, .. } => Some(name.clone()),
                                    _ => None,
                                })
                                .unwrap_or_else(|| {
                                    if words > 1 {
                                        format!("{}_{i}", var_name(instr.offset))
                                    } else {
                                        var_name(instr.offset)
                                    }
                                });
                            let ty = field.ty();
                            self.stmts.push(Stmt::Expr(Expr::Assign {
                                target: Box::new(Expr::Ident {
                                    name: name.clone(),
                                    ty: ty.clone(),
                                }),
                                value: Box::new(field),
                                ty: ty.clone(),
                            }));
                            if let Some(slot) = self.stack.get_mut(target_idx) {
                                slot.expr = Expr::Ident { name, ty };
                                slot.declared = true;
                            }
                        }
                    }
                    // The duplicate stays on top of the stack until a
                    // later `MOVSP` discards it.
                }
            }
            Opcode::Movsp => {
                if let Operand::Size(size) = instr.operand {
                    let n = (-size / 4).max(0) as usize;
                    self.flush_undeclared();
                    for _ in 0..n {
                        let slot = self.stack.pop();
                        // A discarded call result that was never consumed
                        // or assigned still needs to surface as a statement.
                        if let Some(slot) = slot {
                            if matches!(slot.expr, Expr::UserCall { .. } | Expr::ActionCall { .. })
                            {
                                self.stmts.push(Stmt::Expr(slot.expr));
                            }
                        }
                    }
                }
            }
            Opcode::Destruct => {
                if let Operand::Destruct {
                    size,
                    keep_offset,
                    keep_size,
                } = instr.operand
                {
                    let total_words = size as usize / 4;
                    let removed = self.pop_n(total_words, instr.offset)?;
                    let keep_start = keep_offset as usize / 4;
                    let keep_words = keep_size as usize / 4;
                    for expr in removed
                        .into_iter()
                        .skip(keep_start)
                        .take(keep_words.min(total_words.saturating_sub(keep_start)))
                    {
                        self.push(expr, instr.offset);
                    }
                }
            }
            Opcode::Savebp | Opcode::Restorebp => {
                // Struct/vector-argument scoping bracket; the unified stack
                // model already addresses every slot relative to its own
                // position, so these are no-ops here.
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::LogAnd
            | Opcode::LogOr
            | Opcode::IncOr
            | Opcode::ExcOr
            | Opcode::BoolAnd
            | Opcode::Shleft
            | Opcode::Shright
            | Opcode::Ushright
            | Opcode::Eq
            | Opcode::Neq
            | Opcode::Geq
            | Opcode::Gt
            | Opcode::Lt
            | Opcode::Leq => {
                let rhs = self.pop(instr.offset)?;
                let lhs = self.pop(instr.offset)?;
                let (op, is_compare) = bin_op(instr.opcode);
                let ty = if is_compare {
                    Type::Int
                } else {
                    let joined = lhs.ty().join(&rhs.ty());
                    if joined == Type::Any {
                        Type::Int
                    } else {
                        joined
                    }
                };
                self.push(
                    Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        ty,
                    },
                    instr.offset,
                );
            }
            Opcode::Neg | Opcode::Not | Opcode::Comp => {
                let operand = self.pop(instr.offset)?;
                let op = match instr.opcode {
                    Opcode::Neg => UnOp::Neg,
                    Opcode::Not => UnOp::Not,
                    _ => UnOp::BitNot,
                };
                let ty = if operand.ty() == Type::Any {
                    Type::Int
                } else {
                    operand.ty()
                };
                self.push(
                    Expr::Unary {
                        op,
                        operand: Box::new(operand),
                        ty,
                    },
                    instr.offset,
                );
            }
            Opcode::Action => {
                if let Operand::Action { index, arg_count } = instr.operand {
                    let (name, return_type, param_size) = match self.action_table.action(index) {
                        Ok(action) => (
                            action.name.clone(),
                            action.return_type.clone(),
                            action.param_size().max(arg_count as usize),
                        ),
                        Err(_) => (format!("Action{index}"), Type::Any, arg_count as usize),
                    };
                    let args = self.pop_n(param_size, instr.offset)?;
                    let call = Expr::ActionCall {
                        name,
                        args,
                        ty: return_type.clone(),
                    };
                    if return_type == Type::Void {
                        self.stmts.push(Stmt::Expr(call));
                    } else {
                        self.push(call, instr.offset);
                    }
                }
            }
            Opcode::Jsr => {
                if let Some(target) = instr.relative_target() {
                    let (name, return_type, param_count) = match self.signatures.get(&target) {
                        Some(sig) => (
                            format!("fn_{target:x}"),
                            sig.return_type.clone(),
                            sig.param_types.len(),
                        ),
                        None => return Err(SimError::UnresolvedJsr(instr.offset)),
                    };
                    let args = self.pop_n(param_count, instr.offset)?;
                    let call = Expr::UserCall {
                        callee: target,
                        name,
                        args,
                        ty: return_type.clone(),
                    };
                    if return_type == Type::Void {
                        self.stmts.push(Stmt::Expr(call));
                    } else {
                        self.push(call, instr.offset);
                    }
                }
            }
            Opcode::Retn => {
                self.flush_undeclared();
                let value = if self.return_type != Type::Void {
                    let words = self.return_type.slot_width().max(1);
                    if words == 1 {
                        Some(self.pop(instr.offset)?)
                    } else {
                        Some(Self::coalesce(self.pop_n(words, instr.offset)?))
                    }
                } else {
                    None
                };
                self.close_block(Terminator::Return(value), instr.next_offset);
            }
            Opcode::Jmp => {
                let target = instr
                    .relative_target()
                    .ok_or(SimError::StackUnderflow(instr.offset))?;
                self.close_block(Terminator::Jump(target), instr.next_offset);
            }
            Opcode::Jz | Opcode::Jnz => {
                let target = instr
                    .relative_target()
                    .ok_or(SimError::StackUnderflow(instr.offset))?;
                let cond = self.pop(instr.offset)?;
                let (if_true, if_false) = if instr.opcode == Opcode::Jz {
                    (instr.next_offset, target)
                } else {
                    (target, instr.next_offset)
                };
                self.close_block(
                    Terminator::Branch {
                        cond,
                        if_true,
                        if_false,
                    },
                    instr.next_offset,
                );
            }
            Opcode::StoreState | Opcode::StoreStateAll => {
                if let Operand::StoreState { bp_size, sp_size } = instr.operand {
                    // Snapshot the live BP/SP ranges as a closure expression
                    // over a synthesized delayed-action subroutine. The closure body itself is decompiled
                    // like any other subroutine reachable from the call
                    // graph; here we only need a placeholder reference.
                    let bp_words = (bp_size / 4).max(0) as usize;
                    let sp_words = (sp_size / 4).max(0) as usize;
                    let captured = bp_words + sp_words;
                    let _ = self.pop_n(captured.min(self.stack.len()), instr.offset)?;
                    self.push(
                        Expr::Ident {
                            name: format!("{VAR_PREFIX}{:x}_closure", instr.offset),
                            ty: Type::Action,
                        },
                        instr.offset,
                    );
                }
            }
            Opcode::Decisp | Opcode::Incisp | Opcode::Decibp | Opcode::Incibp | Opcode::Nop => {
                // In-place increment/decrement of a stack slot; no
                // observable value is produced or consumed at this node.
            }
        }
        Ok(())
    }
}

fn bin_op(opcode: Opcode) -> (BinOp, bool) {
    use Opcode::*;
    match opcode {
        Add => (BinOp::Add, false),
        Sub => (BinOp::Sub, false),
        Mul => (BinOp::Mul, false),
        Div => (BinOp::Div, false),
        Mod => (BinOp::Mod, false),
        Eq => (BinOp::Eq, true),
        Neq => (BinOp::Neq, true),
        Geq => (BinOp::Geq, true),
        Gt => (BinOp::Gt, true),
        Lt => (BinOp::Lt, true),
        Leq => (BinOp::Leq, true),
        LogAnd => (BinOp::LogAnd, false),
        LogOr => (BinOp::LogOr, false),
        IncOr => (BinOp::BitOr, false),
        ExcOr => (BinOp::BitXor, false),
        BoolAnd => (BinOp::BitAnd, false),
        Shleft => (BinOp::Shl, false),
        Shright => (BinOp::Shr, false),
        Ushright => (BinOp::Ushr, false),
        _ => unreachable!("not a binary opcode"),
    }
}

fn type_from_byte(type_byte: u8) -> Type {
    match type_byte {
        0x03 => Type::Int,
        0x04 => Type::Float,
        0x05 => Type::String,
        0x06 => Type::Object,
        _ => Type::Any,
    }
}

fn zero_literal(ty: &Type) -> Expr {
    match ty {
        Type::Float => Expr::Literal(Literal::Float(0.0)),
        Type::String => Expr::Literal(Literal::String(String::new())),
        Type::Object => Expr::Literal(Literal::Object(0)),
        _ => Expr::Literal(Literal::Int(0)),
    }
}

/// Leader offsets for basic-block splitting: the subroutine's own entry,
/// every in-subroutine jump target, and every instruction immediately
/// following a `JMP`/`JZ`/`JNZ`/`RETN`.
fn find_leaders(body: &[Instruction]) -> Vec<Offset> {
    let in_body = |offset: Offset| body.iter().any(|i| i.offset == offset);
    let mut leaders = Vec::new();
    if let Some(first) = body.first() {
        leaders.push(first.offset);
    }
    for instr in body {
        match instr.opcode {
            Opcode::Jmp | Opcode::Jz | Opcode::Jnz => {
                if let Some(target) = instr.relative_target() {
                    if in_body(target) {
                        leaders.push(target);
                    }
                }
                if in_body(instr.next_offset) {
                    leaders.push(instr.next_offset);
                }
            }
            Opcode::Retn => {
                if in_body(instr.next_offset) {
                    leaders.push(instr.next_offset);
                }
            }
            _ => {}
        }
    }
    leaders.sort_unstable();
    leaders.dedup();
    leaders
}

/// Simulate one subroutine's body, producing its basic blocks.
pub fn simulate(
    linked: &Linked,
    signatures: &HashMap<Offset, Signature>,
    action_table: &ActionTable,
    entry: Offset,
) -> Result<SimResult, SimError> {
    let body: Vec<Instruction> = linked
        .subroutine_body(entry)
        .iter()
        .filter(|instr| !linked.dead.contains(&instr.offset))
        .cloned()
        .collect();
    let signature = signatures.get(&entry).cloned().unwrap_or(Signature {
        param_types: Vec::new(),
        return_type: Type::Void,
    });

    let mut interp = Interp {
        signatures,
        action_table,
        entry,
        return_type: signature.return_type.clone(),
        stack: Vec::new(),
        stmts: Vec::new(),
        blocks: Vec::new(),
        block_start: entry,
    };
    for (index, ty) in signature.param_types.iter().enumerate() {
        interp.stack.push(Slot {
            expr: Expr::Ident {
                name: param_name(entry, index),
                ty: ty.clone(),
            },
            declared: true,
            origin: entry,
        });
    }

    let leaders = find_leaders(&body);
    interp.run(&body, &leaders)?;

    // A body that falls off the end without an explicit `RETN` (malformed,
    // but tolerated) closes as an implicit void return.
    if !interp.stmts.is_empty() || interp.blocks.is_empty() {
        let end = body.last().map(|i| i.next_offset).unwrap_or(entry);
        interp.close_block(Terminator::Return(None), end);
    }

    Ok(SimResult {
        blocks: interp.blocks,
    })
}
