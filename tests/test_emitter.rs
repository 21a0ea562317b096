//! Integration tests for the Emitter's text serialization.

use ncs_decompiler::ast::{BinOp, Case, CaseLabel, Expr, FunctionDef, Literal, Stmt};
use ncs_decompiler::emit::emit;
use ncs_decompiler::types::Type;

fn int(v: i32) -> Expr {
    Expr::Literal(Literal::Int(v))
}

#[test]
fn test_four_space_indent_and_trailing_newline() {
    let function = FunctionDef {
        entry: 0,
        name: "fn_0".into(),
        params: vec![],
        return_type: Type::Void,
        body: vec![Stmt::Expr(int(1))],
    };
    let text = emit(&[function]);
    assert!(text.starts_with("void fn_0()\n{\n    1;\n}\n"));
    assert!(text.ends_with('\n'));
    assert!(!text.lines().any(|l| l.ends_with(' ')));
}

#[test]
fn test_identifier_synthesis_uses_offset_prefixes() {
    let function = FunctionDef {
        entry: 0x1a,
        name: "fn_1a".into(),
        params: vec![(Type::Int, "var_1a_0".into())],
        return_type: Type::Int,
        body: vec![Stmt::Return(Some(Expr::Ident {
            name: "var_1a_0".into(),
            ty: Type::Int,
        }))],
    };
    let text = emit(&[function]);
    assert_eq!(text, "int fn_1a(int var_1a_0)\n{\n    return var_1a_0;\n}\n");
}

#[test]
fn test_multiple_functions_separated_by_blank_line() {
    let a = FunctionDef {
        entry: 0,
        name: "fn_0".into(),
        params: vec![],
        return_type: Type::Void,
        body: vec![],
    };
    let b = FunctionDef {
        entry: 4,
        name: "fn_4".into(),
        params: vec![],
        return_type: Type::Void,
        body: vec![],
    };
    let text = emit(&[a, b]);
    assert_eq!(text, "void fn_0()\n{\n}\n\nvoid fn_4()\n{\n}\n");
}

#[test]
fn test_switch_emits_cases_with_default_last() {
    let function = FunctionDef {
        entry: 0,
        name: "fn_0".into(),
        params: vec![(Type::Int, "var_0_0".into())],
        return_type: Type::Void,
        body: vec![Stmt::Switch {
            discriminant: Expr::Ident {
                name: "var_0_0".into(),
                ty: Type::Int,
            },
            cases: vec![
                Case {
                    label: CaseLabel::Value(1),
                    body: vec![Stmt::Break],
                    fall_through: false,
                },
                Case {
                    label: CaseLabel::Value(2),
                    body: vec![Stmt::Break],
                    fall_through: false,
                },
                Case {
                    label: CaseLabel::Default,
                    body: vec![Stmt::Break],
                    fall_through: false,
                },
            ],
        }],
    };
    let text = emit(&[function]);
    assert!(text.contains("case 1:\n"));
    assert!(text.contains("case 2:\n"));
    assert!(text.contains("default:\n"));
    // `default` must be the last case emitted.
    assert!(text.find("default:").unwrap() > text.find("case 2:").unwrap());
}

#[test]
fn test_negative_zero_float_normalizes_to_zero() {
    let function = FunctionDef {
        entry: 0,
        name: "fn_0".into(),
        params: vec![],
        return_type: Type::Void,
        body: vec![Stmt::VarDecl {
            ty: Type::Float,
            name: "var_0".into(),
            init: Some(Expr::Literal(Literal::Float(-0.0))),
        }],
    };
    let text = emit(&[function]);
    assert!(text.contains("float var_0 = 0.0;"));
}

#[test]
fn test_precedence_avoids_unnecessary_parens() {
    // a + b * c should not parenthesize the multiplication.
    let expr = Expr::Binary {
        op: BinOp::Add,
        lhs: Box::new(Expr::Ident {
            name: "a".into(),
            ty: Type::Int,
        }),
        rhs: Box::new(Expr::Binary {
            op: BinOp::Mul,
            lhs: Box::new(Expr::Ident {
                name: "b".into(),
                ty: Type::Int,
            }),
            rhs: Box::new(Expr::Ident {
                name: "c".into(),
                ty: Type::Int,
            }),
            ty: Type::Int,
        }),
        ty: Type::Int,
    };
    let function = FunctionDef {
        entry: 0,
        name: "fn_0".into(),
        params: vec![],
        return_type: Type::Void,
        body: vec![Stmt::Expr(expr)],
    };
    let text = emit(&[function]);
    assert!(text.contains("a + b * c;"));
    assert!(!text.contains('('));
}
