/*
 * mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The script host for render programs.
//!
//! Program text produced by [`crate::codegen`] has the form
//! `function(<param>){ ... }`. [`compile_program_text`] parses it once into a
//! [`Program`], an immutable AST that can be shared between threads;
//! [`Program::call`] interprets it against a data context, building a fresh
//! environment for every call.
//!
//! The language is a small JavaScript subset: enough for the statements and
//! expressions templates embed (conditionals, loops, closures, member
//! access, the usual operators) plus `print`, `_.escape`, `_.each` and a
//! handful of string, array and number methods.

pub mod ast;
mod builtins;
mod interpreter;
mod lexer;
mod operators;
mod parser;
mod value;

pub use ast::Program;

use crate::error::SyntaxError;

/// Parse the text of a render program.
///
/// Errors carry the byte offset of the offending token within `source`.
pub fn compile_program_text(source: &str) -> Result<Program, SyntaxError> {
    parser::parse_program(source)
}
