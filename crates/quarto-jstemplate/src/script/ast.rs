/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Syntax tree for render programs.
//!
//! The tree holds only owned data and shares function bodies through `Arc`,
//! so a parsed [`Program`] is `Send + Sync` and can be rendered from any
//! thread.

use std::sync::Arc;

/// A parsed program: the `function(<params>){ ... }` wrapper and its body.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<Stmt>,
}

/// A function literal or declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    /// `...name`: the arguments past `params`, as an array.
    pub rest: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
}

/// The per-iteration target of `for (... of ...)` and `for (... in ...)`.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopBinding {
    /// `for (let x of ...)`
    Declare(DeclKind, String),
    /// `for (x of ...)`
    Assign(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    Declaration(DeclKind, Vec<Declarator>),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declaration(DeclKind, Vec<Declarator>),
    Function(Arc<FunctionDef>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        binding: LoopBinding,
        iterable: Expr,
        body: Box<Stmt>,
    },
    ForIn {
        binding: LoopBinding,
        object: Expr,
        body: Box<Stmt>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    With {
        object: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Empty,
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// `=` or a compound assignment; compound forms carry their binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Compound(BinaryOp),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberKey {
    /// `object.name`
    Named(String),
    /// `object[expr]`
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Array(Vec<Expr>),
    Object(Vec<Property>),
    Function(Arc<FunctionDef>),
    Ident(String),
    Member {
        object: Box<Expr>,
        key: MemberKey,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        target: Box<Expr>,
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
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Sequence(Vec<Expr>),
}

impl Expr {
    /// Whether the expression can appear on the left of an assignment.
    pub fn is_assignment_target(&self) -> bool {
        matches!(self, Expr::Ident(_) | Expr::Member { .. })
    }

    /// Short source-like description used in runtime error messages.
    pub fn describe(&self) -> String {
        match self {
            Expr::Ident(name) => name.clone(),
            Expr::Member {
                object,
                key: MemberKey::Named(name),
            } => format!("{}.{name}", object.describe()),
            Expr::Member {
                object,
                key: MemberKey::Computed(_),
            } => format!("{}[...]", object.describe()),
            Expr::Call { callee, .. } => format!("{}(...)", callee.describe()),
            _ => "expression".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Program>();
    }

    #[test]
    fn test_describe() {
        let expr = Expr::Call {
            callee: Box::new(Expr::Member {
                object: Box::new(Expr::Ident("items".to_string())),
                key: MemberKey::Named("each".to_string()),
            }),
            args: vec![],
        };
        assert_eq!(expr.describe(), "items.each(...)");
    }
}
