//! Emitter: pure tree-to-text serialization of a [FunctionDef] list
//! into NSS source.
//!
//! Output accumulates into a `String` with an explicit indent counter
//! rather than a templating engine, following the accumulation style of
//! `r3e-network-neo-decompiler`'s `emitter` module.

use crate::ast::{BinOp, Case, CaseLabel, Expr, FunctionDef, Literal, Stmt, UnOp};
use crate::consts::INDENT;

/// Render every function in `functions`, in the order given — the driver is
/// responsible for topological (callees-first) ordering so that no forward
/// declaration is ever required.
pub fn emit(functions: &[FunctionDef]) -> String {
    let mut out = String::new();
    for (index, function) in functions.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        emit_function(&mut out, function);
    }
    out
}

fn emit_function(out: &mut String, function: &FunctionDef) {
    out.push_str(&function.return_type.to_string());
    out.push(' ');
    out.push_str(&function.name);
    out.push('(');
    for (i, (ty, name)) in function.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&ty.to_string());
        out.push(' ');
        out.push_str(name);
    }
    out.push_str(")\n{\n");
    emit_block(out, &function.body, 1);
    out.push_str("}\n");
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn emit_block(out: &mut String, stmts: &[Stmt], depth: usize) {
    for stmt in stmts {
        emit_stmt(out, stmt, depth);
    }
}

fn emit_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    match stmt {
        Stmt::Block(body) => {
            indent(out, depth);
            out.push_str("{\n");
            emit_block(out, body, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => {
            indent(out, depth);
            out.push_str("if (");
            emit_expr(out, cond, 0);
            out.push_str(")\n");
            indent(out, depth);
            out.push_str("{\n");
            emit_block(out, then_block, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
            if let Some(else_stmts) = else_block {
                // Collapse `else { if (...) ... }` to `else if (...) ...`
                if else_stmts.len() == 1 {
                    if let Stmt::If { .. } = &else_stmts[0] {
                        indent(out, depth);
                        out.push_str("else ");
                        let rendered = {
                            let mut nested = String::new();
                            emit_stmt(&mut nested, &else_stmts[0], depth);
                            nested
                        };
                        out.push_str(rendered.trim_start());
                        return;
                    }
                }
                indent(out, depth);
                out.push_str("else\n");
                indent(out, depth);
                out.push_str("{\n");
                emit_block(out, else_stmts, depth + 1);
                indent(out, depth);
                out.push_str("}\n");
            }
        }
        Stmt::While { cond, body } => {
            indent(out, depth);
            out.push_str("while (");
            emit_expr(out, cond, 0);
            out.push_str(")\n");
            indent(out, depth);
            out.push_str("{\n");
            emit_block(out, body, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        Stmt::DoWhile { body, cond } => {
            indent(out, depth);
            out.push_str("do\n");
            indent(out, depth);
            out.push_str("{\n");
            emit_block(out, body, depth + 1);
            indent(out, depth);
            out.push_str("} while (");
            emit_expr(out, cond, 0);
            out.push_str(");\n");
        }
        Stmt::For {
            init,
            cond,
            step,
            body,
        } => {
            indent(out, depth);
            out.push_str("for (");
            if let Some(init) = init {
                emit_inline(out, init);
            }
            out.push_str("; ");
            if let Some(cond) = cond {
                emit_expr(out, cond, 0);
            }
            out.push_str("; ");
            if let Some(step) = step {
                emit_inline(out, step);
            }
            out.push_str(")\n");
            indent(out, depth);
            out.push_str("{\n");
            emit_block(out, body, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        Stmt::Switch {
            discriminant,
            cases,
        } => {
            indent(out, depth);
            out.push_str("switch (");
            emit_expr(out, discriminant, 0);
            out.push_str(")\n");
            indent(out, depth);
            out.push_str("{\n");
            for case in cases {
                emit_case(out, case, depth + 1);
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        Stmt::Break => {
            indent(out, depth);
            out.push_str("break;\n");
        }
        Stmt::Continue => {
            indent(out, depth);
            out.push_str("continue;\n");
        }
        Stmt::Return(value) => {
            indent(out, depth);
            out.push_str("return");
            if let Some(value) = value {
                out.push(' ');
                emit_expr(out, value, 0);
            }
            out.push_str(";\n");
        }
        Stmt::Expr(expr) => {
            indent(out, depth);
            emit_expr(out, expr, 0);
            out.push_str(";\n");
        }
        Stmt::VarDecl { ty, name, init } => {
            indent(out, depth);
            out.push_str(&ty.to_string());
            out.push(' ');
            out.push_str(name);
            if let Some(init) = init {
                out.push_str(" = ");
                emit_expr(out, init, 0);
            }
            out.push_str(";\n");
        }
        Stmt::Label(name) => {
            out.push_str(name);
            out.push_str(":\n");
        }
        Stmt::Goto(name) => {
            indent(out, depth);
            out.push_str("goto ");
            out.push_str(name);
            out.push_str(";\n");
        }
    }
}

/// Render a `for`-clause statement (`VarDecl` or `ExpressionStatement`)
/// without its own indentation or trailing newline.
fn emit_inline(out: &mut String, stmt: &Stmt) {
    match stmt {
        Stmt::Expr(expr) => emit_expr(out, expr, 0),
        Stmt::VarDecl { ty, name, init } => {
            out.push_str(&ty.to_string());
            out.push(' ');
            out.push_str(name);
            if let Some(init) = init {
                out.push_str(" = ");
                emit_expr(out, init, 0);
            }
        }
        other => emit_stmt(out, other, 0),
    }
}

fn emit_case(out: &mut String, case: &Case, depth: usize) {
    indent(out, depth);
    match &case.label {
        CaseLabel::Value(v) => out.push_str(&format!("case {v}:\n")),
        CaseLabel::Default => out.push_str("default:\n"),
    }
    if !case.fall_through {
        emit_block(out, &case.body, depth + 1);
    }
}

fn emit_expr(out: &mut String, expr: &Expr, parent_precedence: u8) {
    match expr {
        Expr::Literal(lit) => emit_literal(out, lit),
        Expr::Ident { name, .. } => out.push_str(name),
        Expr::Unary { op, operand, .. } => {
            out.push_str(op.symbol());
            emit_operand(out, operand, 11);
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            let precedence = op.precedence();
            let needs_parens = precedence < parent_precedence;
            if needs_parens {
                out.push('(');
            }
            emit_operand(out, lhs, precedence);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            // Parenthesize an equal-precedence right operand: our AST
            // always groups left-associatively, so a right child at the
            // same precedence level only appears when it is genuinely a
            // separate sub-expression that must not be reassociated.
            emit_operand(out, rhs, precedence + 1);
            if needs_parens {
                out.push(')');
            }
        }
        Expr::ActionCall { name, args, .. } | Expr::UserCall { name, args, .. } => {
            out.push_str(name);
            emit_args(out, args);
        }
        Expr::Assign { target, value, .. } => {
            emit_expr(out, target, 0);
            out.push_str(" = ");
            emit_expr(out, value, 0);
        }
        Expr::Vector { x, y, z } => {
            out.push('[');
            emit_expr(out, x, 0);
            out.push_str(", ");
            emit_expr(out, y, 0);
            out.push_str(", ");
            emit_expr(out, z, 0);
            out.push(']');
        }
        Expr::FieldAccess { base, index, .. } => {
            emit_expr(out, base, 12);
            out.push('.');
            out.push_str(&format!("f{index}"));
        }
        Expr::Aggregate(fields) => {
            out.push('(');
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                emit_expr(out, field, 0);
            }
            out.push(')');
        }
    }
}

fn emit_operand(out: &mut String, expr: &Expr, min_precedence: u8) {
    if let Expr::Binary { op, .. } = expr {
        emit_expr(out, expr, min_precedence.max(op.precedence().min(min_precedence)));
        return;
    }
    emit_expr(out, expr, 0);
}

fn emit_args(out: &mut String, args: &[Expr]) {
    out.push('(');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        emit_expr(out, arg, 0);
    }
    out.push(')');
}

fn emit_literal(out: &mut String, literal: &Literal) {
    match literal {
        Literal::Int(v) => out.push_str(&v.to_string()),
        Literal::Float(v) => out.push_str(&format_float(*v)),
        Literal::String(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
        Literal::Object(v) => out.push_str(&v.to_string()),
    }
}

/// Shortest round-trippable decimal, negative zero folded to `0.0`.
/// Rust's `f32` `Display` already produces the shortest string that
/// round-trips; this only has to guarantee a decimal point survives so the
/// literal reads as a float rather than an int.
fn format_float(value: f32) -> String {
    let value = if value == 0.0 { 0.0 } else { value };
    let mut s = format!("{value}");
    if !s.contains('.') && !s.contains('e') && !s.contains("inf") && !s.contains("NaN") {
        s.push_str(".0");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn empty_function_round_trips() {
        let function = FunctionDef {
            entry: 0,
            name: "main".into(),
            params: vec![],
            return_type: Type::Void,
            body: vec![],
        };
        assert_eq!(emit(&[function]), "void main()\n{\n}\n");
    }

    #[test]
    fn call_with_args_and_params() {
        let function = FunctionDef {
            entry: 4,
            name: "fn_4".into(),
            params: vec![(Type::Int, "var_4_0".into())],
            return_type: Type::Void,
            body: vec![Stmt::Expr(Expr::ActionCall {
                name: "PrintInteger".into(),
                args: vec![Expr::Ident {
                    name: "var_4_0".into(),
                    ty: Type::Int,
                }],
                ty: Type::Void,
            })],
        };
        let text = emit(&[function]);
        assert_eq!(
            text,
            "void fn_4(int var_4_0)\n{\n    PrintInteger(var_4_0);\n}\n"
        );
    }

    #[test]
    fn binary_expression_parenthesizes_by_precedence() {
        let expr = Expr::Binary {
            op: BinOp::Mul,
            lhs: Box::new(Expr::Binary {
                op: BinOp::Add,
                lhs: Box::new(Expr::Literal(Literal::Int(1))),
                rhs: Box::new(Expr::Literal(Literal::Int(2))),
                ty: Type::Int,
            }),
            rhs: Box::new(Expr::Literal(Literal::Int(3))),
            ty: Type::Int,
        };
        let mut out = String::new();
        emit_expr(&mut out, &expr, 0);
        assert_eq!(out, "(1 + 2) * 3");
    }

    #[test]
    fn float_literal_keeps_decimal_point() {
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(-0.0), "0.0");
        assert_eq!(format_float(1.5), "1.5");
    }

    #[test]
    fn if_else_if_collapses() {
        let stmt = Stmt::If {
            cond: Expr::Literal(Literal::Int(1)),
            then_block: vec![Stmt::Break],
            else_block: Some(vec![Stmt::If {
                cond: Expr::Literal(Literal::Int(2)),
                then_block: vec![Stmt::Continue],
                else_block: None,
            }]),
        };
        let mut out = String::new();
        emit_stmt(&mut out, &stmt, 0);
        assert_eq!(
            out,
            "if (1)\n{\n    break;\n}\nelse if (2)\n{\n    continue;\n}\n"
        );
    }
}
