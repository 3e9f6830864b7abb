/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Underscore-style micro-templates for Quarto.
//!
//! This crate compiles templates in the style of underscore.js / jQuery
//! micro-templating into reusable render functions. Three kinds of region
//! are recognized:
//!
//! - Evaluate: `<% if (ok) { %>...<% } %>` runs script statements
//! - Interpolate: `<%= value %>` inserts the value as-is
//! - Escape: `<%- value %>` inserts the value HTML-escaped
//!
//! `null` and `undefined` results of either interpolation form render as the
//! empty string. Inside evaluate regions, `print(...)` appends text directly.
//!
//! # Architecture
//!
//! Compilation is an explicit two-stage pipeline:
//!
//! 1. [`matcher`] scans the template with one combined delimiter pattern,
//!    and [`codegen`] turns the matches into an instruction list and the
//!    text of a render program (`function(obj){ ... }`).
//! 2. [`script`] parses that program text into a small JavaScript-flavoured
//!    AST which is interpreted for every render.
//!
//! Because the second stage only ever sees program text, the
//! [`CompiledTemplate::source`] of a template can be stored and compiled again
//! later with [`CompiledTemplate::from_source`].
//!
//! # Example
//!
//! ```ignore
//! use quarto_jstemplate::CompiledTemplate;
//! use serde_json::json;
//!
//! let template = CompiledTemplate::compile("Hello, <%= name %>!")?;
//! let output = template.render(&json!({ "name": "World" }))?;
//! assert_eq!(output, "Hello, World!");
//! ```

pub mod codegen;
pub mod error;
pub mod escape;
pub mod matcher;
pub mod script;
pub mod settings;
pub mod template;

// Re-export main types at crate root
pub use codegen::{GeneratedProgram, Instruction, generate};
pub use error::{RenderError, RenderResult, SyntaxError, TemplateError, TemplateResult};
pub use escape::escape_html;
pub use matcher::{Match, MatchKind, Matcher};
pub use settings::{Pattern, Region, SettingsOverrides, TemplateSettings};
pub use template::{CompiledTemplate, compile};
