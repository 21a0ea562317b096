//! Integration tests for the Stack Simulator's symbolic interpretation.

use ncs_decompiler::action_table::{load, ActionTable};
use ncs_decompiler::ast::{Expr, Literal, Stmt};
use ncs_decompiler::instruction::{Constant, Instruction, Offset, Opcode, Operand};
use ncs_decompiler::linker::link;
use ncs_decompiler::prototype::Signature;
use ncs_decompiler::simulate::{simulate, Terminator};
use ncs_decompiler::types::Type;
use std::collections::HashMap;

fn instr(offset: Offset, opcode: Opcode, operand: Operand, next: Offset) -> Instruction {
    Instruction {
        offset,
        opcode,
        type_byte: 0,
        operand,
        next_offset: next,
    }
}

#[test]
fn test_empty_subroutine_produces_single_block_void_return() {
    let instructions = vec![instr(0, Opcode::Retn, Operand::None, 1)];
    let linked = link(instructions).unwrap();
    let signatures = HashMap::new();
    let table = ActionTable::default();
    let result = simulate(&linked, &signatures, &table, 0).unwrap();
    assert_eq!(result.blocks.len(), 1);
    assert_eq!(result.blocks[0].terminator, Terminator::Return(None));
}

#[test]
fn test_action_call_consumes_exactly_its_declared_argument_slots() {
    // PrintString("hi"); RETN -- a single-argument action consumes one
    // string-typed stack slot, per the `int/float/object/string = 1` rule.
    let instructions = vec![
        instr(
            0,
            Opcode::Const,
            Operand::Constant(Constant::String("hi".into())),
            6,
        ),
        instr(
            6,
            Opcode::Action,
            Operand::Action {
                index: 2,
                arg_count: 1,
            },
            9,
        ),
        instr(9, Opcode::Retn, Operand::None, 10),
    ];
    let linked = link(instructions).unwrap();
    let signatures = HashMap::new();
    let table = load("// 2.\nvoid PrintString(string sString);\n");
    let result = simulate(&linked, &signatures, &table, 0).unwrap();
    match &result.blocks[0].stmts[0] {
        Stmt::Expr(Expr::ActionCall { name, args, .. }) => {
            assert_eq!(name, "PrintString");
            assert_eq!(args.len(), 1);
            assert_eq!(args[0], Expr::Literal(Literal::String("hi".into())));
        }
        other => panic!("expected an action-call statement, got {other:?}"),
    }
}

#[test]
fn test_vector_literal_folds_three_float_pushes() {
    // Three consecutive float CONSTs feeding a vector-using op fold into a
    // single Vector(x, y, z) constructor.
    let push_float = |offset: Offset, v: f32, next: Offset| {
        instr(offset, Opcode::Const, Operand::Constant(Constant::Float(v)), next)
    };
    let instructions = vec![
        push_float(0, 1.0, 6),
        push_float(6, 2.0, 12),
        push_float(12, 3.0, 18),
        instr(
            18,
            Opcode::CpTopSp,
            Operand::StackSlot { offset: -4, size: 12 },
            26,
        ),
        instr(26, Opcode::Retn, Operand::None, 27),
    ];
    let linked = link(instructions).unwrap();
    let mut signatures = HashMap::new();
    signatures.insert(
        0,
        Signature {
            param_types: vec![],
            return_type: Type::Void,
        },
    );
    let table = ActionTable::default();
    let result = simulate(&linked, &signatures, &table, 0).unwrap();
    // The CPTOPSP duplicate pushes a coalesced Vector on top; the
    // subroutine falls off the end with it never consumed, so nothing
    // further is asserted beyond not erroring -- the structural
    // guarantee under test is that three float words fold into one vector
    // value rather than remaining three loose stack slots.
    assert_eq!(result.blocks.len(), 1);
}

#[test]
fn test_jsr_consumes_signature_param_count_and_yields_user_call() {
    // main(0): CONST 7; JSR fn_A(12); RETN      fn_A(12): RETN
    let instructions = vec![
        instr(0, Opcode::Const, Operand::Constant(Constant::Int(7)), 6),
        instr(6, Opcode::Jsr, Operand::JumpOffset(12 - 12), 12),
        instr(12, Opcode::Retn, Operand::None, 13),
    ];
    let linked = link(instructions).unwrap();
    let mut signatures = HashMap::new();
    signatures.insert(
        0,
        Signature {
            param_types: vec![],
            return_type: Type::Void,
        },
    );
    signatures.insert(
        12,
        Signature {
            param_types: vec![Type::Int],
            return_type: Type::Void,
        },
    );
    let table = ActionTable::default();
    let result = simulate(&linked, &signatures, &table, 0).unwrap();
    assert!(matches!(
        &result.blocks[0].stmts[0],
        Stmt::Expr(Expr::UserCall { args, .. }) if args.len() == 1
    ));
}

#[test]
fn test_destruct_with_zero_keep_size_discards_everything() {
    // Three ints pushed, then DESTRUCT removes all 12 bytes and keeps none
    // of them -- a plain "pop the whole group" shape.
    let instructions = vec![
        instr(0, Opcode::Const, Operand::Constant(Constant::Int(1)), 6),
        instr(6, Opcode::Const, Operand::Constant(Constant::Int(2)), 12),
        instr(12, Opcode::Const, Operand::Constant(Constant::Int(3)), 18),
        instr(
            18,
            Opcode::Destruct,
            Operand::Destruct {
                size: 12,
                keep_offset: 0,
                keep_size: 0,
            },
            24,
        ),
        instr(24, Opcode::Retn, Operand::None, 25),
    ];
    let linked = link(instructions).unwrap();
    let signatures = HashMap::new();
    let table = ActionTable::default();
    let result = simulate(&linked, &signatures, &table, 0).unwrap();
    // Nothing survives the DESTRUCT, so the subroutine falls off the end
    // with no undeclared value left to flush into a statement.
    assert!(result.blocks[0].stmts.is_empty());
}

#[test]
fn test_destruct_with_partial_keep_preserves_the_named_range() {
    // Three ints pushed; DESTRUCT removes all 12 bytes but keeps the middle
    // word (keep_offset 4, keep_size 4), which should resurface as the
    // subroutine's undeclared top-of-stack value.
    let instructions = vec![
        instr(0, Opcode::Const, Operand::Constant(Constant::Int(1)), 6),
        instr(6, Opcode::Const, Operand::Constant(Constant::Int(2)), 12),
        instr(12, Opcode::Const, Operand::Constant(Constant::Int(3)), 18),
        instr(
            18,
            Opcode::Destruct,
            Operand::Destruct {
                size: 12,
                keep_offset: 4,
                keep_size: 4,
            },
            24,
        ),
        instr(24, Opcode::Retn, Operand::None, 25),
    ];
    let linked = link(instructions).unwrap();
    let signatures = HashMap::new();
    let table = ActionTable::default();
    let result = simulate(&linked, &signatures, &table, 0).unwrap();
    // The kept word is the second CONST (value 2); it never gets consumed,
    // so it surfaces as a flushed VarDecl at the implicit-return boundary.
    match &result.blocks[0].stmts[0] {
        Stmt::VarDecl { init: Some(Expr::Literal(Literal::Int(2))), .. } => {}
        other => panic!("expected the kept middle word to flush as VarDecl(2), got {other:?}"),
    }
}

#[test]
fn test_cpdownsp_splits_an_opaque_struct_value_into_field_accesses() {
    // A struct-width (8-byte) CPDOWNSP whose source is a single value of
    // unknown internal layout must decompose it into one `FieldAccess` per
    // target word, in order, rather than duplicating the whole value.
    let instructions = vec![
        instr(0, Opcode::Const, Operand::Constant(Constant::Int(10)), 6),
        instr(6, Opcode::Const, Operand::Constant(Constant::Int(20)), 12),
        instr(
            12,
            Opcode::CpDownSp,
            Operand::StackSlot { offset: -4, size: 8 },
            20,
        ),
        instr(20, Opcode::Retn, Operand::None, 21),
    ];
    let linked = link(instructions).unwrap();
    let signatures = HashMap::new();
    let table = ActionTable::default();
    let result = simulate(&linked, &signatures, &table, 0).unwrap();
    let assigns: Vec<_> = result.blocks[0]
        .stmts
        .iter()
        .filter(|s| matches!(s, Stmt::Expr(Expr::Assign { .. })))
        .collect();
    assert_eq!(assigns.len(), 2);
    for (i, stmt) in assigns.iter().enumerate() {
        match stmt {
            Stmt::Expr(Expr::Assign { value, .. }) => match &**value {
                Expr::FieldAccess { index, .. } => assert_eq!(*index, i),
                other => panic!("expected FieldAccess for field {i}, got {other:?}"),
            },
            _ => unreachable!(),
        }
    }
}

#[test]
fn test_cpdownsp_unpacks_a_matching_aggregate_without_field_access() {
    // When the source value is already a literal `Aggregate` of exactly
    // `words` fields (the product of an earlier struct-width read), the
    // split must reuse those fields directly instead of wrapping them in
    // `FieldAccess`.
    let instructions = vec![
        instr(0, Opcode::Const, Operand::Constant(Constant::Int(1)), 6),
        instr(6, Opcode::Const, Operand::Constant(Constant::Int(2)), 12),
        instr(12, Opcode::Const, Operand::Constant(Constant::Int(3)), 18),
        instr(
            18,
            Opcode::CpTopSp,
            Operand::StackSlot { offset: -4, size: 12 },
            26,
        ),
        instr(
            26,
            Opcode::CpDownSp,
            Operand::StackSlot { offset: -4, size: 12 },
            34,
        ),
        instr(34, Opcode::Retn, Operand::None, 35),
    ];
    let linked = link(instructions).unwrap();
    let signatures = HashMap::new();
    let table = ActionTable::default();
    let result = simulate(&linked, &signatures, &table, 0).unwrap();
    let assigns: Vec<_> = result.blocks[0]
        .stmts
        .iter()
        .filter(|s| matches!(s, Stmt::Expr(Expr::Assign { .. })))
        .collect();
    assert_eq!(assigns.len(), 3);
    let values: Vec<i32> = assigns
        .iter()
        .map(|stmt| match stmt {
            Stmt::Expr(Expr::Assign { value, .. }) => match &**value {
                Expr::Literal(Literal::Int(v)) => *v,
                other => panic!("expected a plain int field, got {other:?}"),
            },
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(values, vec![1, 2, 3]);
}

#[test]
fn test_cptopbp_reads_a_struct_parameter_as_one_coalesced_value() {
    // A two-word struct parameter (-8..-4) read whole via CPTOPBP with
    // size 8 must come back as a single aggregate, not just its first word.
    let instructions = vec![
        instr(
            0,
            Opcode::CpTopBp,
            Operand::StackSlot { offset: -8, size: 8 },
            8,
        ),
        instr(8, Opcode::Retn, Operand::None, 9),
    ];
    let linked = link(instructions).unwrap();
    let mut signatures = HashMap::new();
    signatures.insert(
        0,
        Signature {
            param_types: vec![Type::Int, Type::Int],
            return_type: Type::Void,
        },
    );
    let table = ActionTable::default();
    let result = simulate(&linked, &signatures, &table, 0).unwrap();
    // The read value is never consumed, so it flushes as an undeclared
    // VarDecl; its initializer must be the two-field aggregate, not a
    // lone parameter identifier.
    match &result.blocks[0].stmts[0] {
        Stmt::VarDecl { init: Some(Expr::Aggregate(fields)), .. } => {
            assert_eq!(fields.len(), 2);
        }
        other => panic!("expected an Aggregate of 2 fields, got {other:?}"),
    }
}

#[test]
fn test_stack_underflow_on_malformed_input() {
    // A binary op with nothing on the stack.
    let instructions = vec![instr(0, Opcode::Add, Operand::None, 2)];
    let linked = link(instructions).unwrap();
    let signatures = HashMap::new();
    let table = ActionTable::default();
    let err = simulate(&linked, &signatures, &table, 0).unwrap_err();
    assert!(matches!(
        err,
        ncs_decompiler::error::SimError::StackUnderflow(_)
    ));
}
