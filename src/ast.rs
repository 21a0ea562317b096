//! The Expression and Statement AST.
//!
//! Nodes are built bottom-up by the Stack Simulator and the Control-
//! Flow Structurer, then treated as immutable during emission. Nothing
//! downstream of this pipeline has source text to quote — the input is
//! bytecode — so nodes here carry only what the Emitter needs: the
//! originating instruction [Offset], for identifier synthesis.

use crate::instruction::Offset;
use crate::types::Type;
use std::fmt;

/// Binary operator, carrying the precedence level the Emitter uses to
/// decide when parenthesization is required.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
    LogAnd,
    LogOr,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Ushr,
}

impl BinOp {
    /// Higher binds tighter, mirroring C/NSS operator precedence.
    pub fn precedence(self) -> u8 {
        use BinOp::*;
        match self {
            Mul | Div | Mod => 10,
            Add | Sub => 9,
            Shl | Shr | Ushr => 8,
            Lt | Leq | Gt | Geq => 7,
            Eq | Neq => 6,
            BitAnd => 5,
            BitXor => 4,
            BitOr => 3,
            LogAnd => 2,
            LogOr => 1,
        }
    }

    pub fn symbol(self) -> &'static str {
        use BinOp::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            Eq => "==",
            Neq => "!=",
            Lt => "<",
            Leq => "<=",
            Gt => ">",
            Geq => ">=",
            LogAnd => "&&",
            LogOr => "||",
            BitAnd => "&",
            BitOr => "|",
            BitXor => "^",
            Shl => "<<",
            Shr => ">>",
            Ushr => ">>>",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
            UnOp::BitNot => "~",
        }
    }
}

/// A literal value, already formatted per the Emitter's normalization rules.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i32),
    Float(f32),
    String(String),
    Object(i32),
}

/// An expression node. Parenthesization is not represented explicitly — it
/// is a pure formatting concern the Emitter derives from [BinOp::precedence].
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// A synthesized identifier reference: a local variable or global,
    /// named from its defining offset.
    Ident { name: String, ty: Type },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        ty: Type,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        ty: Type,
    },
    /// An engine-action call.
    ActionCall {
        name: String,
        args: Vec<Expr>,
        ty: Type,
    },
    /// A call to another subroutine in the same file.
    UserCall {
        callee: Offset,
        name: String,
        args: Vec<Expr>,
        ty: Type,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        ty: Type,
    },
    Vector {
        x: Box<Expr>,
        y: Box<Expr>,
        z: Box<Expr>,
    },
    /// Access to field `index` of a struct-typed expression.
    FieldAccess {
        base: Box<Expr>,
        index: usize,
        ty: Type,
    },
    /// A flattened struct value with no recoverable user-defined type name.
    /// Emitted as a parenthesized field list.
    Aggregate(Vec<Expr>),
}

impl Expr {
    pub fn ty(&self) -> Type {
        match self {
            Expr::Literal(Literal::Int(_)) => Type::Int,
            Expr::Literal(Literal::Float(_)) => Type::Float,
            Expr::Literal(Literal::String(_)) => Type::String,
            Expr::Literal(Literal::Object(_)) => Type::Object,
            Expr::Ident { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::ActionCall { ty, .. }
            | Expr::UserCall { ty, .. }
            | Expr::Assign { ty, .. }
            | Expr::FieldAccess { ty, .. } => ty.clone(),
            Expr::Vector { .. } => Type::Vector,
            Expr::Aggregate(fields) => {
                Type::Struct(fields.iter().map(Expr::ty).collect())
            }
        }
    }
}

/// A `switch` case: a concrete value, or the `default:` arm.
#[derive(Clone, Debug, PartialEq)]
pub enum CaseLabel {
    Value(i32),
    Default,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Case {
    pub label: CaseLabel,
    pub body: Vec<Stmt>,
    /// True when this case falls through into the next without a `break`.
    pub fall_through: bool,
}

/// A statement node.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Vec<Stmt>,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<Case>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Expr(Expr),
    VarDecl {
        ty: Type,
        name: String,
        init: Option<Expr>,
    },
    /// Fallback for a jump the Structurer could not express as break/
    /// continue/if/loop.
    Label(String),
    Goto(String),
}

/// A fully reconstructed subroutine definition.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub entry: Offset,
    pub name: String,
    pub params: Vec<(Type, String)>,
    pub return_type: Type,
    pub body: Vec<Stmt>,
}

impl fmt::Display for CaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseLabel::Value(v) => write!(f, "{v}"),
            CaseLabel::Default => write!(f, "default"),
        }
    }
}
