/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Recursive-descent parser for render programs.
//!
//! The accepted text is a single function expression,
//! `function [name](params){ statements }`, followed by the end of input.
//! Statement terminators follow a simplified automatic semicolon insertion:
//! a statement ends at `;`, before `}`, at the end of input, or where the
//! next token starts a new line.

use std::sync::Arc;

use super::ast::{
    AssignOp, BinaryOp, DeclKind, Declarator, Expr, ForInit, FunctionDef, LogicalOp, LoopBinding,
    MemberKey, Program, Property, Stmt, UnaryOp, UpdateOp,
};
use super::lexer::{Keyword, Punct, Spanned, Token, tokenize};
use crate::error::SyntaxError;

/// Maximum nesting of expressions and statements.
const MAX_NESTING: usize = 128;

/// Parse the text of a complete program.
pub fn parse_program(source: &str) -> Result<Program, SyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        loop_depth: 0,
        nesting: 0,
    };
    let function = parser.function(true)?;
    parser.expect_eof()?;
    Ok(Program {
        name: function.name,
        params: function.params,
        rest: function.rest,
        body: function.body,
    })
}

type ParseResult<T> = Result<T, SyntaxError>;

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    loop_depth: usize,
    nesting: usize,
}

impl Parser<'_> {
    // Token access

    fn current(&self) -> &Spanned {
        // The token list always ends with Eof and the parser never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn advance(&mut self) -> Spanned {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, punct: Punct) -> bool {
        *self.peek() == Token::Punct(punct)
    }

    fn is_keyword(&self, keyword: Keyword) -> bool {
        *self.peek() == Token::Keyword(keyword)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_at(&self, message: impl Into<String>, offset: usize) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            offset,
            program: self.source.to_string(),
        }
    }

    fn unexpected(&self) -> SyntaxError {
        let current = self.current();
        self.error_at(format!("unexpected {}", current.token), current.offset)
    }

    fn expect_punct(&mut self, punct: Punct) -> ParseResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            let current = self.current();
            Err(self.error_at(
                format!("expected `{}` but found {}", punct.as_str(), current.token),
                current.offset,
            ))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error_at(
                format!("expected identifier but found {other}"),
                self.current().offset,
            )),
        }
    }

    fn expect_eof(&self) -> ParseResult<()> {
        match self.peek() {
            Token::Eof => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    /// Statement terminator with automatic semicolon insertion.
    fn terminator(&mut self) -> ParseResult<()> {
        if self.eat_punct(Punct::Semicolon) {
            return Ok(());
        }
        let current = self.current();
        if current.newline_before || matches!(current.token, Token::Punct(Punct::RBrace) | Token::Eof)
        {
            return Ok(());
        }
        Err(self.error_at(
            format!("expected `;` but found {}", current.token),
            current.offset,
        ))
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error_at("program is nested too deeply", self.current().offset));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    // Functions

    /// `function [name](params) { body }`, with the `function` keyword
    /// still to be consumed.
    fn function(&mut self, name_optional: bool) -> ParseResult<FunctionDef> {
        if !self.eat_keyword(Keyword::Function) {
            return Err(self.error_at(
                format!("expected `function` but found {}", self.peek()),
                self.current().offset,
            ));
        }
        let name = match self.peek() {
            Token::Ident(_) => Some(self.expect_ident()?),
            _ if name_optional => None,
            _ => return Err(self.unexpected()),
        };

        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        let mut rest = None;
        while !self.is_punct(Punct::RParen) {
            if self.eat_punct(Punct::Ellipsis) {
                // The rest parameter must come last.
                rest = Some(self.expect_ident()?);
                break;
            }
            params.push(self.expect_ident()?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;

        // Loops do not extend into nested functions.
        let outer_loop_depth = std::mem::take(&mut self.loop_depth);
        let body = self.block_body();
        self.loop_depth = outer_loop_depth;

        Ok(FunctionDef {
            name,
            params,
            rest,
            body: body?,
        })
    }

    // Statements

    /// `{ statements }`
    fn block_body(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect_punct(Punct::LBrace)?;
        let mut body = Vec::new();
        while !self.is_punct(Punct::RBrace) {
            if *self.peek() == Token::Eof {
                return Err(self.unexpected());
            }
            body.push(self.statement()?);
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(body)
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        stmt
    }

    fn statement_inner(&mut self) -> ParseResult<Stmt> {
        let start = self.current().offset;
        match self.peek().clone() {
            Token::Punct(Punct::LBrace) => Ok(Stmt::Block(self.block_body()?)),
            Token::Punct(Punct::Semicolon) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            Token::Keyword(Keyword::Var) => self.declaration_statement(DeclKind::Var),
            Token::Keyword(Keyword::Let) => self.declaration_statement(DeclKind::Let),
            Token::Keyword(Keyword::Const) => self.declaration_statement(DeclKind::Const),
            Token::Keyword(Keyword::Function) => {
                let function = self.function(false)?;
                Ok(Stmt::Function(Arc::new(function)))
            }
            Token::Keyword(Keyword::If) => self.if_statement(),
            Token::Keyword(Keyword::For) => self.for_statement(),
            Token::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let test = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                let body = self.loop_body()?;
                Ok(Stmt::While { test, body })
            }
            Token::Keyword(Keyword::Break) => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(self.error_at("illegal break statement", start));
                }
                self.terminator()?;
                Ok(Stmt::Break)
            }
            Token::Keyword(Keyword::Continue) => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(self.error_at("illegal continue statement", start));
                }
                self.terminator()?;
                Ok(Stmt::Continue)
            }
            Token::Keyword(Keyword::Return) => {
                self.advance();
                let current = self.current();
                let bare = current.newline_before
                    || matches!(
                        current.token,
                        Token::Punct(Punct::Semicolon | Punct::RBrace) | Token::Eof
                    );
                let value = if bare { None } else { Some(self.expression()?) };
                self.terminator()?;
                Ok(Stmt::Return(value))
            }
            Token::Keyword(Keyword::With) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let object = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::With { object, body })
            }
            _ => {
                let expr = self.expression()?;
                self.terminator()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn declaration_statement(&mut self, kind: DeclKind) -> ParseResult<Stmt> {
        self.advance();
        let declarators = self.declarators(kind, None)?;
        self.terminator()?;
        Ok(Stmt::Declaration(kind, declarators))
    }

    /// Comma-separated declarators. `first` is a name that has already been
    /// consumed.
    fn declarators(&mut self, kind: DeclKind, first: Option<String>) -> ParseResult<Vec<Declarator>> {
        let mut declarators = Vec::new();
        let mut pending = first;
        loop {
            let offset = self.current().offset;
            let name = match pending.take() {
                Some(name) => name,
                None => self.expect_ident()?,
            };
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(self.error_at("missing initializer in const declaration", offset));
            }
            declarators.push(Declarator { name, init });
            if !self.eat_punct(Punct::Comma) {
                return Ok(declarators);
            }
        }
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        self.advance();
        self.expect_punct(Punct::LParen)?;
        let test = self.expression()?;
        self.expect_punct(Punct::RParen)?;
        let consequent = Box::new(self.statement()?);
        let alternate = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn loop_body(&mut self) -> ParseResult<Box<Stmt>> {
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        Ok(Box::new(body?))
    }

    fn is_of(&self) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == "of")
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        self.advance();
        self.expect_punct(Punct::LParen)?;

        let kind = match self.peek() {
            Token::Keyword(Keyword::Var) => Some(DeclKind::Var),
            Token::Keyword(Keyword::Let) => Some(DeclKind::Let),
            Token::Keyword(Keyword::Const) => Some(DeclKind::Const),
            _ => None,
        };

        let init = if let Some(kind) = kind {
            self.advance();
            let name = self.expect_ident()?;
            if let Some(stmt) = self.for_each_tail(LoopBinding::Declare(kind, name.clone()))? {
                return Ok(stmt);
            }
            Some(ForInit::Declaration(kind, self.declarators(kind, Some(name))?))
        } else if self.is_punct(Punct::Semicolon) {
            None
        } else {
            let expr = self.expression()?;
            if let Expr::Ident(name) = &expr {
                if let Some(stmt) = self.for_each_tail(LoopBinding::Assign(name.clone()))? {
                    return Ok(stmt);
                }
            }
            Some(ForInit::Expr(expr))
        };

        self.expect_punct(Punct::Semicolon)?;
        let test = if self.is_punct(Punct::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::Semicolon)?;
        let update = if self.is_punct(Punct::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::RParen)?;
        let body = self.loop_body()?;
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    /// The rest of `for (<binding> of|in <expr>) <body>`, if the next token
    /// is `of` or `in`.
    fn for_each_tail(&mut self, binding: LoopBinding) -> ParseResult<Option<Stmt>> {
        let is_of = self.is_of();
        if !is_of && !self.is_keyword(Keyword::In) {
            return Ok(None);
        }
        self.advance();
        let subject = if is_of {
            self.assignment()?
        } else {
            self.expression()?
        };
        self.expect_punct(Punct::RParen)?;
        let body = self.loop_body()?;
        Ok(Some(if is_of {
            Stmt::ForOf {
                binding,
                iterable: subject,
                body,
            }
        } else {
            Stmt::ForIn {
                binding,
                object: subject,
                body,
            }
        }))
    }

    // Expressions, lowest precedence first

    fn expression(&mut self) -> ParseResult<Expr> {
        let first = self.assignment()?;
        if !self.is_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat_punct(Punct::Comma) {
            exprs.push(self.assignment()?);
        }
        Ok(Expr::Sequence(exprs))
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.assignment_inner();
        self.leave();
        expr
    }

    fn assignment_inner(&mut self) -> ParseResult<Expr> {
        let start = self.current().offset;
        let target = self.conditional()?;
        let op = match self.peek() {
            Token::Punct(Punct::Assign) => AssignOp::Assign,
            Token::Punct(Punct::PlusAssign) => AssignOp::Compound(BinaryOp::Add),
            Token::Punct(Punct::MinusAssign) => AssignOp::Compound(BinaryOp::Sub),
            Token::Punct(Punct::StarAssign) => AssignOp::Compound(BinaryOp::Mul),
            Token::Punct(Punct::SlashAssign) => AssignOp::Compound(BinaryOp::Div),
            Token::Punct(Punct::PercentAssign) => AssignOp::Compound(BinaryOp::Rem),
            _ => return Ok(target),
        };
        if !target.is_assignment_target() {
            return Err(self.error_at("invalid assignment target", start));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let test = self.nullish()?;
        if !self.eat_punct(Punct::Question) {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(Punct::Colon)?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn nullish(&mut self) -> ParseResult<Expr> {
        let mut left = self.logical_or()?;
        while self.eat_punct(Punct::QuestionQuestion) {
            let right = self.logical_or()?;
            left = logical(LogicalOp::Nullish, left, right);
        }
        Ok(left)
    }

    fn logical_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.logical_and()?;
        while self.eat_punct(Punct::OrOr) {
            let right = self.logical_and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.equality()?;
        while self.eat_punct(Punct::AndAnd) {
            let right = self.equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek() {
                Token::Punct(Punct::Eq) => BinaryOp::Eq,
                Token::Punct(Punct::NotEq) => BinaryOp::NotEq,
                Token::Punct(Punct::StrictEq) => BinaryOp::StrictEq,
                Token::Punct(Punct::StrictNotEq) => BinaryOp::StrictNotEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.relational()?;
            left = binary(op, left, right);
        }
    }

    fn relational(&mut self) -> ParseResult<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Punct(Punct::Lt) => BinaryOp::Lt,
                Token::Punct(Punct::LtEq) => BinaryOp::LtEq,
                Token::Punct(Punct::Gt) => BinaryOp::Gt,
                Token::Punct(Punct::GtEq) => BinaryOp::GtEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.additive()?;
            left = binary(op, left, right);
        }
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Punct(Punct::Plus) => BinaryOp::Add,
                Token::Punct(Punct::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Punct(Punct::Star) => BinaryOp::Mul,
                Token::Punct(Punct::Slash) => BinaryOp::Div,
                Token::Punct(Punct::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let start = self.current().offset;
        let op = match self.peek() {
            Token::Punct(Punct::Bang) => UnaryOp::Not,
            Token::Punct(Punct::Minus) => UnaryOp::Neg,
            Token::Punct(Punct::Plus) => UnaryOp::Plus,
            Token::Keyword(Keyword::Typeof) => UnaryOp::Typeof,
            Token::Punct(punct @ (Punct::PlusPlus | Punct::MinusMinus)) => {
                let op = update_op(*punct);
                self.advance();
                let target = self.nested(Self::unary)?;
                if !target.is_assignment_target() {
                    return Err(self.error_at("invalid update target", start));
                }
                return Ok(Expr::Update {
                    op,
                    prefix: true,
                    target: Box::new(target),
                });
            }
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn nested(&mut self, parse: fn(&mut Self) -> ParseResult<Expr>) -> ParseResult<Expr> {
        self.enter()?;
        let expr = parse(self);
        self.leave();
        expr
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let start = self.current().offset;
        let expr = self.call_member()?;
        let current = self.current();
        if current.newline_before {
            return Ok(expr);
        }
        let Token::Punct(punct @ (Punct::PlusPlus | Punct::MinusMinus)) = current.token else {
            return Ok(expr);
        };
        if !expr.is_assignment_target() {
            return Err(self.error_at("invalid update target", start));
        }
        self.advance();
        Ok(Expr::Update {
            op: update_op(punct),
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call_member(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(Punct::Dot) {
                let name = match self.advance() {
                    Spanned {
                        token: Token::Ident(name),
                        ..
                    } => name,
                    Spanned {
                        token: Token::Keyword(keyword),
                        ..
                    } => keyword.as_str().to_string(),
                    other => {
                        return Err(self.error_at(
                            format!("expected property name but found {}", other.token),
                            other.offset,
                        ));
                    }
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    key: MemberKey::Named(name),
                };
            } else if self.eat_punct(Punct::LBracket) {
                let key = self.expression()?;
                self.expect_punct(Punct::RBracket)?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    key: MemberKey::Computed(Box::new(key)),
                };
            } else if self.eat_punct(Punct::LParen) {
                let args = self.list(Punct::RParen)?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated assignment expressions up to `close`, which is
    /// consumed. A trailing comma is allowed.
    fn list(&mut self, close: Punct) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat_punct(close) {
            items.push(self.assignment()?);
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let current = self.current().clone();
        match current.token {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            Token::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(name))
            }
            Token::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Token::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Token::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Null)
            }
            Token::Keyword(Keyword::Function) => {
                let function = self.function(true)?;
                Ok(Expr::Function(Arc::new(function)))
            }
            Token::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                Ok(expr)
            }
            Token::Punct(Punct::LBracket) => {
                self.advance();
                Ok(Expr::Array(self.list(Punct::RBracket)?))
            }
            Token::Punct(Punct::LBrace) => {
                self.advance();
                self.object_literal()
            }
            _ => Err(self.unexpected()),
        }
    }

    fn object_literal(&mut self) -> ParseResult<Expr> {
        let mut properties = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            let current = self.advance();
            let (key, shorthand) = match current.token {
                Token::Ident(name) => (name, true),
                Token::Keyword(keyword) => (keyword.as_str().to_string(), false),
                Token::String(s) => (s, false),
                Token::Number(n) => (super::value::format_number(n), false),
                other => {
                    return Err(self.error_at(
                        format!("expected property name but found {other}"),
                        current.offset,
                    ));
                }
            };
            let value = if self.eat_punct(Punct::Colon) {
                self.assignment()?
            } else if shorthand {
                Expr::Ident(key.clone())
            } else {
                return Err(self.error_at("expected `:` after property name", current.offset));
            };
            properties.push(Property { key, value });
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RBrace)?;
                break;
            }
        }
        Ok(Expr::Object(properties))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn update_op(punct: Punct) -> UpdateOp {
    if punct == Punct::PlusPlus {
        UpdateOp::Increment
    } else {
        UpdateOp::Decrement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn body(statements: &str) -> Vec<Stmt> {
        parse_program(&format!("function(obj){{\n{statements}\n}}"))
            .unwrap()
            .body
    }

    fn expr(source: &str) -> Expr {
        match body(source).remove(0) {
            Stmt::Expr(expr) => expr,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    fn syntax_error(source: &str) -> SyntaxError {
        parse_program(source).unwrap_err()
    }

    #[test]
    fn test_program_header() {
        let program = parse_program("function(obj){\nreturn 1;\n}").unwrap();
        assert_eq!(program.name, None);
        assert_eq!(program.params, vec!["obj".to_string()]);
        assert_eq!(program.body, vec![Stmt::Return(Some(Expr::Number(1.0)))]);

        let named = parse_program("function render(a, b) {}").unwrap();
        assert_eq!(named.name.as_deref(), Some("render"));
        assert_eq!(named.params.len(), 2);
        assert_eq!(named.rest, None);
    }

    #[test]
    fn test_rest_parameter() {
        let program = parse_program("function(obj, ...more){}").unwrap();
        assert_eq!(program.params, vec!["obj".to_string()]);
        assert_eq!(program.rest.as_deref(), Some("more"));

        let err = syntax_error("function(...a, b){}");
        assert!(err.message.contains("expected `)`"), "{}", err.message);
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            expr("a + b * c"),
            Expr::Binary {
                op: BinaryOp::Add,
                left: ident("a"),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: ident("b"),
                    right: ident("c"),
                }),
            }
        );
    }

    #[test]
    fn test_conditional_and_nullish() {
        assert_eq!(
            expr("(__t = x) == null ? '' : __t ?? y"),
            Expr::Conditional {
                test: Box::new(Expr::Binary {
                    op: BinaryOp::Eq,
                    left: Box::new(Expr::Assign {
                        op: AssignOp::Assign,
                        target: ident("__t"),
                        value: ident("x"),
                    }),
                    right: Box::new(Expr::Null),
                }),
                consequent: Box::new(Expr::String(String::new())),
                alternate: Box::new(Expr::Logical {
                    op: LogicalOp::Nullish,
                    left: ident("__t"),
                    right: ident("y"),
                }),
            }
        );
    }

    #[test]
    fn test_compound_assignment() {
        assert_eq!(
            expr("__p += 'a'"),
            Expr::Assign {
                op: AssignOp::Compound(BinaryOp::Add),
                target: ident("__p"),
                value: Box::new(Expr::String("a".to_string())),
            }
        );
    }

    #[test]
    fn test_member_calls_and_keyword_property() {
        assert_eq!(
            expr("obj.items[0].default(1,)"),
            Expr::Call {
                callee: Box::new(Expr::Member {
                    object: Box::new(Expr::Member {
                        object: Box::new(Expr::Member {
                            object: ident("obj"),
                            key: MemberKey::Named("items".to_string()),
                        }),
                        key: MemberKey::Computed(Box::new(Expr::Number(0.0))),
                    }),
                    key: MemberKey::Named("default".to_string()),
                }),
                args: vec![Expr::Number(1.0)],
            }
        );
    }

    #[test]
    fn test_object_literal_keys() {
        let Stmt::Declaration(DeclKind::Var, declarators) =
            body("var o = { a: 1, 'b c': 2, 3: x, d, if: 4 };").remove(0)
        else {
            panic!("expected declaration");
        };
        let Some(Expr::Object(properties)) = &declarators[0].init else {
            panic!("expected object literal");
        };
        let keys: Vec<&str> = properties.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b c", "3", "d", "if"]);
        assert_eq!(properties[3].value, Expr::Ident("d".to_string()));
    }

    #[test]
    fn test_asi_on_newline() {
        let statements = body("var a = 1\nvar b = 2\na\n++b");
        assert_eq!(statements.len(), 4);
        assert_eq!(
            statements[3],
            Stmt::Expr(Expr::Update {
                op: UpdateOp::Increment,
                prefix: true,
                target: ident("b"),
            })
        );
    }

    #[test]
    fn test_return_without_value_before_newline() {
        let statements = body("return\nx");
        assert_eq!(statements[0], Stmt::Return(None));
        assert_eq!(statements[1], Stmt::Expr(Expr::Ident("x".to_string())));
    }

    #[test]
    fn test_missing_semicolon_on_same_line() {
        let err = syntax_error("function(obj){ a b }");
        assert_eq!(err.message, "expected `;` but found identifier `b`");
        assert_eq!(err.offset, 17);
    }

    #[test]
    fn test_for_variants() {
        let statements = body(
            "for (var i = 0, n = 3; i < n; i++) {}\n\
             for (const item of items) {}\n\
             for (key in obj) {}",
        );
        assert!(matches!(
            &statements[0],
            Stmt::For { init: Some(ForInit::Declaration(DeclKind::Var, declarators)), .. }
                if declarators.len() == 2
        ));
        assert!(matches!(
            &statements[1],
            Stmt::ForOf { binding: LoopBinding::Declare(DeclKind::Const, name), .. } if name == "item"
        ));
        assert!(matches!(
            &statements[2],
            Stmt::ForIn { binding: LoopBinding::Assign(name), .. } if name == "key"
        ));
    }

    #[test]
    fn test_statements_split_across_regions() {
        // The shape produced by `<% if (ok) { %>yes<% } else { %>no<% } %>`.
        let statements = body(
            "__p+='';\n if (ok) { \n__p+='yes';\n } else { \n__p+='no';\n } \n__p+='';",
        );
        assert_eq!(statements.len(), 3);
        assert!(matches!(&statements[1], Stmt::If { alternate: Some(_), .. }));
    }

    #[test]
    fn test_with_block() {
        let statements = body("with(obj||{}){\n__p+='x';\n}");
        assert!(matches!(&statements[0], Stmt::With { .. }));
    }

    #[test]
    fn test_break_outside_loop() {
        let err = syntax_error("function(obj){ break; }");
        assert_eq!(err.message, "illegal break statement");
    }

    #[test]
    fn test_break_does_not_cross_function_boundary() {
        let err = syntax_error("function(obj){ while (x) { var f = function() { break; }; } }");
        assert_eq!(err.message, "illegal break statement");
    }

    #[test]
    fn test_unbalanced_brace_reports_end_of_input() {
        let source = "function(obj){\nif (x) {\n__p+='a';\n}";
        let err = syntax_error(source);
        assert_eq!(err.message, "unexpected end of input");
        assert_eq!(err.offset, source.len());
        assert_eq!(err.program, source);
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = syntax_error("function(obj){} x");
        assert_eq!(err.message, "unexpected identifier `x`");
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = syntax_error("function(obj){ 1 = 2; }");
        assert_eq!(err.message, "invalid assignment target");
    }

    #[test]
    fn test_const_requires_initializer() {
        let err = syntax_error("function(obj){ const x; }");
        assert_eq!(err.message, "missing initializer in const declaration");
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("function(obj){{ {}1{} }}", "(".repeat(500), ")".repeat(500));
        let err = syntax_error(&source);
        assert_eq!(err.message, "program is nested too deeply");
    }
}
