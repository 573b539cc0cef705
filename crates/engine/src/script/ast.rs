//! Syntax tree for assertion scripts

use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VarDecl {
        kind: DeclKind,
        declarations: Vec<(Pattern, Option<Expr>)>,
    },
    /// Hoisted to the top of its block
    Function(Rc<FunctionDef>),
    If {
        test: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    ForOf {
        pattern: Pattern,
        iterable: Expr,
        body: Box<Stmt>,
    },
    /// `for (k in obj)`, iterating own keys
    ForIn {
        pattern: Pattern,
        object: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Expr(Expr),
    Return(Option<Expr>),
    Throw(Expr),
    Break,
    Continue,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

/// Binding target of a declaration, parameter or loop variable
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Ident(String),
    /// `{ a, b: alias }`
    Object(Vec<(String, Pattern)>),
    /// `[first, , third]`
    Array(Vec<Option<Pattern>>),
}

impl Pattern {
    pub fn names(&self, out: &mut Vec<String>) {
        match self {
            Pattern::Ident(name) => out.push(name.clone()),
            Pattern::Object(props) => props.iter().for_each(|(_, p)| p.names(out)),
            Pattern::Array(items) => items.iter().flatten().for_each(|p| p.names(out)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<Pattern>,
    pub body: FunctionBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Arrow function with an expression body
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Shared with every value the literal evaluates to
    Str(Rc<str>),
    Bool(bool),
    Null,
    Undefined,
    Template(Vec<TemplatePart>),
    Regex {
        pattern: String,
        flags: String,
    },
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    /// Only `new Error(...)` and friends are meaningful
    New {
        constructor: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Function(Rc<FunctionDef>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    Le,
    Ge,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
}
