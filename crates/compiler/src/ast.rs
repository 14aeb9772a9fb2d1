//! Syntax tree produced by the parser.
//!
//! The tree is what the VM executes, and it is also the transport format for
//! functions crossing an interpreter boundary, hence the serde derives.

use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub type Block = Vec<Stmt>;

/// A compiled function body together with everything needed to instantiate
/// a closure from it in any interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionProto {
    pub name: String,
    pub source_path: String,
    pub line: u32,
    pub params: Vec<String>,
    pub is_vararg: bool,
    /// Names of enclosing-function locals this function refers to, in order
    /// of first use.
    pub upvalues: Vec<String>,
    pub body: Block,
}

impl FunctionProto {
    pub fn is_main_chunk(&self) -> bool {
        self.line == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub line: u32,
    pub node: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Local {
        names: Vec<String>,
        values: Vec<Expr>,
    },
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
    },
    Expr(Expr),
    LocalFunction {
        name: String,
        func: Rc<FunctionProto>,
    },
    If {
        branches: Vec<(Expr, Block)>,
        orelse: Option<Block>,
    },
    While {
        test: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        test: Expr,
    },
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        names: Vec<String>,
        exprs: Vec<Expr>,
        body: Block,
    },
    Do(Block),
    Return(Vec<Expr>),
    Break,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub line: u32,
    pub node: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    Vararg,
    Function(Rc<FunctionProto>),
    Name(String),
    Index {
        object: Box<Expr>,
        key: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Method {
        object: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Table(Vec<TableField>),
    /// Parenthesized expression, truncates multiple results to one.
    Paren(Box<Expr>),
}

impl ExprKind {
    /// Calls and `...` may produce any number of values.
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Call { .. } | Self::Method { .. } | Self::Vararg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableField {
    Positional(Expr),
    Named(String, Expr),
    Keyed(Expr, Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "^",
            Self::Concat => "..",
            Self::Eq => "==",
            Self::NotEq => "~=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    Len,
}
