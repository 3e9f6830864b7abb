/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template compilation and rendering.
//!
//! Compile-time failures are [`TemplateError`]s. Failures raised while a
//! compiled template runs are [`RenderError`]s and are returned from
//! [`crate::CompiledTemplate::render`] exactly as the script host produced
//! them.

use thiserror::Error;

use crate::settings::Region;

/// Errors that can occur while compiling a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A delimiter pattern cannot be used to scan templates.
    #[error("Invalid {} pattern `{pattern}`: {message}", region_label(.region))]
    InvalidPattern {
        /// The region the pattern was configured for, when known.
        region: Option<Region>,
        pattern: String,
        message: String,
    },

    /// The generated program is not valid script source.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// I/O error (e.g., reading a template file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn region_label(region: &Option<Region>) -> &'static str {
    region.map_or("delimiter", Region::as_str)
}

impl TemplateError {
    pub(crate) fn invalid_pattern(
        region: Option<Region>,
        pattern: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        TemplateError::InvalidPattern {
            region,
            pattern: pattern.into(),
            message: message.into(),
        }
    }
}

/// The assembled program could not be parsed.
///
/// Carries the complete program text so callers can show what was generated
/// from the template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Template syntax error: {message} (offset {offset} of the generated program)")]
pub struct SyntaxError {
    /// What the parser expected or found.
    pub message: String,
    /// Byte offset into [`SyntaxError::program`].
    pub offset: usize,
    /// The full generated program text.
    pub program: String,
}

impl SyntaxError {
    /// 1-based line and column of the error inside the program text.
    pub fn line_col(&self) -> (usize, usize) {
        let offset = self.offset.min(self.program.len());
        let before = &self.program[..floor_char_boundary(&self.program, offset)];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rfind('\n')
            .map_or(before, |newline| &before[newline + 1..])
            .chars()
            .count()
            + 1;
        (line, column)
    }

    /// Render an annotated report over the generated program.
    pub fn report(&self) -> String {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let id = "<generated program>".to_string();
        let mut start = floor_char_boundary(&self.program, self.offset.min(self.program.len()));
        if start == self.program.len() && start > 0 {
            // Errors at end of input point at the last character.
            start = floor_char_boundary(&self.program, start - 1);
        }
        let end = self.program[start..]
            .chars()
            .next()
            .map_or(start, |c| start + c.len_utf8());

        let report = Report::build(ReportKind::Error, id.clone(), start)
            .with_message(format!("Template syntax error: {}", self.message))
            .with_label(
                Label::new((id.clone(), start..end))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            )
            .with_note("evaluate regions are spliced into the program verbatim")
            .finish();

        let mut output = Vec::new();
        match report.write((id, Source::from(self.program.as_str())), &mut output) {
            Ok(()) => String::from_utf8_lossy(&output).into_owned(),
            Err(_) => self.to_string(),
        }
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Errors raised by injected code while a template renders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// A name that is neither declared nor a field of the data context.
    #[error("ReferenceError: {name} is not defined")]
    Reference { name: String },

    /// An operation applied to a value of the wrong kind.
    #[error("TypeError: {message}")]
    Type { message: String },

    /// A value outside the range an operation accepts (including call depth).
    #[error("RangeError: {message}")]
    Range { message: String },

    /// The data context could not be converted into script values.
    #[error("Invalid data context: {message}")]
    Data { message: String },
}

impl RenderError {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        RenderError::Type {
            message: message.into(),
        }
    }

    pub(crate) fn range_error(message: impl Into<String>) -> Self {
        RenderError::Range {
            message: message.into(),
        }
    }
}

/// Result type for template compilation.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Result type for template rendering.
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn syntax_error(program: &str, offset: usize) -> SyntaxError {
        SyntaxError {
            message: "unexpected end of input".to_string(),
            offset,
            program: program.to_string(),
        }
    }

    #[test]
    fn test_invalid_pattern_message_names_region() {
        let err = TemplateError::invalid_pattern(Some(Region::Escape), "<%-x%>", "no group");
        assert_eq!(
            err.to_string(),
            "Invalid escape pattern `<%-x%>`: no group"
        );

        let err = TemplateError::invalid_pattern(None, "(", "unclosed group");
        assert_eq!(
            err.to_string(),
            "Invalid delimiter pattern `(`: unclosed group"
        );
    }

    #[test]
    fn test_line_col() {
        let err = syntax_error("function(obj){\nif (x) {\n", 24);
        assert_eq!(err.line_col(), (3, 1));

        let err = syntax_error("abc", 1);
        assert_eq!(err.line_col(), (1, 2));
    }

    #[test]
    fn test_line_col_clamps_past_end() {
        let err = syntax_error("ab\ncd", 100);
        assert_eq!(err.line_col(), (2, 3));
    }

    #[test]
    fn test_report_mentions_message() {
        let err = syntax_error("function(obj){\nif (x) {\n", 24);
        let report = err.report();
        assert!(report.contains("unexpected end of input"));
        assert!(report.contains("generated program"));
    }

    #[test]
    fn test_render_error_display() {
        let err = RenderError::Reference {
            name: "title".to_string(),
        };
        assert_eq!(err.to_string(), "ReferenceError: title is not defined");
        assert_eq!(
            RenderError::type_error("x is not a function").to_string(),
            "TypeError: x is not a function"
        );
    }
}
