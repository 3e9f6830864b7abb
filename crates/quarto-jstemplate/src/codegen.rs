/*
 * codegen.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Render program generation.
//!
//! The generator walks the match sequence once, recording an [`Instruction`]
//! per literal gap and per region, and then renders the instructions as the
//! text of a single render program:
//!
//! ```text
//! function(obj){
//! var __t,__p='',print=function(...__a){__p+=__a.join('');};
//! with(obj||{}){
//! __p+='Hello, '+
//! ((__t=( name ))==null?'':__t)+
//! '!';
//! }
//! return __p;
//! }
//! ```
//!
//! Evaluate regions are spliced in as statements, which is what lets a
//! conditional or loop opened in one region be closed in a later one.

use crate::matcher::{Match, MatchKind};
use crate::settings::{DEFAULT_VARIABLE, TemplateSettings};

/// Name of the output buffer inside generated programs.
pub const OUTPUT_BUFFER: &str = "__p";

/// Name of the scratch variable holding an interpolated value.
pub const SCRATCH: &str = "__t";

/// Name of the program-local `print` function.
pub const PRINT: &str = "print";

/// The escaping helper called by escape instructions.
pub const ESCAPE_HELPER: &str = "_.escape";

/// One step of a render program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Append template text verbatim.
    AppendLiteral(String),
    /// Evaluate an expression and append its HTML-escaped value.
    AppendEscaped(String),
    /// Evaluate an expression and append its value unchanged.
    AppendRaw(String),
    /// Run statements; they append only through `print` or by choosing
    /// which later instructions execute.
    ExecuteRaw(String),
}

/// The output of [`generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedProgram {
    instructions: Vec<Instruction>,
    body: String,
    bound_variable: String,
}

impl GeneratedProgram {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The program body (everything between the outer braces).
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parameter name the data context is bound to.
    pub fn bound_variable(&self) -> &str {
        &self.bound_variable
    }

    /// The complete program text: `function(<bound variable>){ ... }`.
    pub fn source(&self) -> String {
        format!("function({}){{\n{}}}", self.bound_variable, self.body)
    }
}

/// Generate the render program for `text` from its match sequence.
///
/// `matches` must be in document order and end with a [`MatchKind::End`]
/// match, as produced by [`crate::Matcher::matches`]; text after the last
/// match is only emitted through that `End` match.
pub fn generate<'t>(
    text: &'t str,
    matches: impl IntoIterator<Item = Match<'t>>,
    settings: &TemplateSettings,
) -> GeneratedProgram {
    let mut instructions = Vec::new();
    let mut cursor = 0;

    for m in matches {
        if let Some(literal) = text.get(cursor..m.start) {
            if !literal.is_empty() {
                instructions.push(Instruction::AppendLiteral(literal.to_string()));
            }
        }
        cursor = m.end();

        // A region with an empty capture is skipped entirely.
        let Some(inner) = m.inner.filter(|inner| !inner.is_empty()) else {
            continue;
        };
        let instruction = match m.kind {
            MatchKind::Escape => Instruction::AppendEscaped(inner.to_string()),
            MatchKind::Interpolate => Instruction::AppendRaw(inner.to_string()),
            MatchKind::Evaluate => Instruction::ExecuteRaw(inner.to_string()),
            MatchKind::End => continue,
        };
        instructions.push(instruction);
    }

    let body = render_body(&instructions, settings.variable());
    GeneratedProgram {
        instructions,
        body,
        bound_variable: settings.bound_variable().to_string(),
    }
}

/// Render instructions as program text.
///
/// Without a `variable`, the statements run inside `with(obj||{})` so the
/// fields of the data context resolve as bare names.
pub fn render_body(instructions: &[Instruction], variable: Option<&str>) -> String {
    let mut source = format!("{OUTPUT_BUFFER}+='");
    for instruction in instructions {
        match instruction {
            Instruction::AppendLiteral(text) => source.push_str(&escape_literal(text)),
            Instruction::AppendEscaped(expr) => source.push_str(&format!(
                "'+\n(({SCRATCH}=({expr}))==null?'':{ESCAPE_HELPER}({SCRATCH}))+\n'"
            )),
            Instruction::AppendRaw(expr) => source.push_str(&format!(
                "'+\n(({SCRATCH}=({expr}))==null?'':{SCRATCH})+\n'"
            )),
            Instruction::ExecuteRaw(statements) => {
                source.push_str(&format!("';\n{statements}\n{OUTPUT_BUFFER}+='"));
            }
        }
    }
    source.push_str("';\n");

    if variable.is_none() {
        source = format!("with({DEFAULT_VARIABLE}||{{}}){{\n{source}}}\n");
    }

    format!(
        "var {SCRATCH},{OUTPUT_BUFFER}='',\
         {PRINT}=function(...__a){{{OUTPUT_BUFFER}+=__a.join('');}};\n\
         {source}return {OUTPUT_BUFFER};\n"
    )
}

/// Escape text for embedding in a single-quoted string literal.
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use crate::settings::SettingsOverrides;
    use pretty_assertions::assert_eq;

    fn generate_with(text: &str, settings: &TemplateSettings) -> GeneratedProgram {
        let matcher = Matcher::new(settings).unwrap();
        generate(text, matcher.matches(text), settings)
    }

    fn generate_default(text: &str) -> GeneratedProgram {
        generate_with(text, &TemplateSettings::default())
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("it's"), "it\\'s");
        assert_eq!(escape_literal("a\\b"), "a\\\\b");
        assert_eq!(escape_literal("1\r\n2"), "1\\r\\n2");
        assert_eq!(escape_literal("\u{2028}\u{2029}"), "\\u2028\\u2029");
        assert_eq!(escape_literal("\"plain\" <b>"), "\"plain\" <b>");
    }

    #[test]
    fn test_instructions_in_order() {
        let program = generate_default("a<%- x %>b<%= y %>c<% z() %>d");
        assert_eq!(
            program.instructions(),
            &[
                Instruction::AppendLiteral("a".to_string()),
                Instruction::AppendEscaped(" x ".to_string()),
                Instruction::AppendLiteral("b".to_string()),
                Instruction::AppendRaw(" y ".to_string()),
                Instruction::AppendLiteral("c".to_string()),
                Instruction::ExecuteRaw(" z() ".to_string()),
                Instruction::AppendLiteral("d".to_string()),
            ]
        );
    }

    #[test]
    fn test_end_contributes_only_tail() {
        let program = generate_default("<%= x %>");
        assert_eq!(
            program.instructions(),
            &[Instruction::AppendRaw(" x ".to_string())]
        );
    }

    #[test]
    fn test_source_for_interpolation() {
        let program = generate_default("a<%= x %>b");
        assert_eq!(
            program.source(),
            "function(obj){\n\
             var __t,__p='',print=function(...__a){__p+=__a.join('');};\n\
             with(obj||{}){\n\
             __p+='a'+\n\
             ((__t=( x ))==null?'':__t)+\n\
             'b';\n\
             }\n\
             return __p;\n\
             }"
        );
    }

    #[test]
    fn test_source_for_escape_and_evaluate() {
        let program = generate_default("<% if (ok) { %><%- v %><% } %>");
        assert_eq!(
            program.body(),
            concat!(
                "var __t,__p='',print=function(...__a){__p+=__a.join('');};\n",
                "with(obj||{}){\n",
                "__p+='';\n",
                " if (ok) { \n",
                "__p+=''+\n",
                "((__t=( v ))==null?'':_.escape(__t))+\n",
                "'';\n",
                " } \n",
                "__p+='';\n",
                "}\n",
                "return __p;\n",
            )
        );
    }

    #[test]
    fn test_variable_mode_has_no_with_block() {
        let settings =
            TemplateSettings::default().merge(&SettingsOverrides::new().with_variable("data"));
        let program = generate_with("<%= data.x %>", &settings);
        assert_eq!(program.bound_variable(), "data");
        assert!(!program.body().contains("with("));
        assert!(program.source().starts_with("function(data){\n"));
    }

    #[test]
    fn test_print_is_defined_by_the_program() {
        let program = generate_default("<% print('a', 1); %>");
        let compiled = crate::script::compile_program_text(&program.source()).unwrap();
        assert_eq!(compiled.call(&serde_json::json!({})).unwrap(), "a1");
        assert!(
            program
                .body()
                .starts_with("var __t,__p='',print=function(...__a){")
        );
    }

    #[test]
    fn test_literal_text_is_escaped_in_source() {
        let program = generate_default("it's\n");
        assert!(program.body().contains("__p+='it\\'s\\n';"));
    }

    #[test]
    fn test_empty_capture_is_skipped() {
        let settings = TemplateSettings::default().with_pattern(
            crate::Region::Interpolate,
            Some(crate::Pattern::new(r"\{\{(.*?)\}\}").unwrap()),
        );
        let program = generate_with("a{{}}b", &settings);
        assert_eq!(
            program.instructions(),
            &[
                Instruction::AppendLiteral("a".to_string()),
                Instruction::AppendLiteral("b".to_string()),
            ]
        );
    }
}
