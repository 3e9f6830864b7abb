/*
 * template.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled templates.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::codegen::generate;
use crate::error::{RenderError, RenderResult, TemplateResult};
use crate::matcher::Matcher;
use crate::script::{Program, compile_program_text};
use crate::settings::{DEFAULT_VARIABLE, SettingsOverrides, TemplateSettings};

/// A template compiled into a reusable render function.
///
/// Compilation does all delimiter and syntax checking, so [`render`] can only
/// fail on errors raised by the template's own code. The parsed program is
/// immutable and shared, which makes templates cheap to clone and safe to
/// render from several threads at once.
///
/// [`render`]: CompiledTemplate::render
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    program: Arc<Program>,
    source: String,
}

impl CompiledTemplate {
    /// Compile `text` with the default settings.
    pub fn compile(text: &str) -> TemplateResult<Self> {
        Self::compile_with(text, &TemplateSettings::default())
    }

    /// Compile `text` with `overrides` merged over the default settings.
    pub fn compile_with_settings(text: &str, overrides: &SettingsOverrides) -> TemplateResult<Self> {
        Self::compile_with(text, &TemplateSettings::default().merge(overrides))
    }

    /// Compile `text` with fully resolved settings.
    pub fn compile_with(text: &str, settings: &TemplateSettings) -> TemplateResult<Self> {
        let matcher = Matcher::new(settings)?;
        let generated = generate(text, matcher.matches(text), settings);
        debug!(
            instructions = generated.instructions().len(),
            variable = generated.bound_variable(),
            "generated render program"
        );
        Ok(Self::from_source(&generated.source())?)
    }

    /// Read and compile a template file.
    pub fn compile_from_file(
        path: &Path,
        overrides: Option<&SettingsOverrides>,
    ) -> TemplateResult<Self> {
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "compiling template file");
        compile(&text, overrides)
    }

    /// Compile program text previously obtained from [`source`].
    ///
    /// [`source`]: CompiledTemplate::source
    pub fn from_source(source: &str) -> Result<Self, crate::error::SyntaxError> {
        let program = compile_program_text(source)?;
        Ok(Self {
            program: Arc::new(program),
            source: source.to_string(),
        })
    }

    /// The generated program text: `function(<variable>){\n...}`.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name the data context is bound to inside the program.
    pub fn bound_variable(&self) -> &str {
        self.program
            .params
            .first()
            .map_or(DEFAULT_VARIABLE, String::as_str)
    }

    /// Render the template against a data context.
    pub fn render(&self, data: &serde_json::Value) -> RenderResult<String> {
        self.program.call(data)
    }

    /// Render against any serializable data context.
    pub fn render_serialize<T: Serialize + ?Sized>(&self, data: &T) -> RenderResult<String> {
        let data = serde_json::to_value(data).map_err(|e| RenderError::Data {
            message: e.to_string(),
        })?;
        self.render(&data)
    }
}

/// Compile `text`, merging `overrides` over the defaults when given.
pub fn compile(text: &str, overrides: Option<&SettingsOverrides>) -> TemplateResult<CompiledTemplate> {
    match overrides {
        Some(overrides) => CompiledTemplate::compile_with_settings(text, overrides),
        None => CompiledTemplate::compile(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;
    use crate::settings::{Pattern, Region};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn render(text: &str, data: serde_json::Value) -> String {
        CompiledTemplate::compile(text).unwrap().render(&data).unwrap()
    }

    #[test]
    fn test_literal_pass_through() {
        let text = "no delimiters here: 'quotes', \\backslash\\\r\nnext line";
        assert_eq!(render(text, json!({})), text);
        assert_eq!(render("", json!(null)), "");
    }

    #[test]
    fn test_interpolate_and_escape() {
        assert_eq!(render("a<%= x %>b", json!({ "x": "M" })), "aMb");
        assert_eq!(render("a<%- x %>b", json!({ "x": "<i>" })), "a&lt;i&gt;b");
        assert_eq!(render("<%= x %>", json!({ "x": "<i>" })), "<i>");
    }

    #[test]
    fn test_null_and_undefined_render_empty() {
        assert_eq!(render("[<%= x %>]", json!({ "x": null })), "[]");
        assert_eq!(render("[<%- obj.missing %>]", json!({})), "[]");
        assert_eq!(render("[<%= 0 %><%= false %>]", json!({})), "[0false]");
    }

    #[test]
    fn test_evaluate_controls_output() {
        let template =
            CompiledTemplate::compile("<% if (ok) { %>yes<% } else { %>no<% } %>").unwrap();
        assert_eq!(template.render(&json!({ "ok": true })).unwrap(), "yes");
        assert_eq!(template.render(&json!({ "ok": false })).unwrap(), "no");
    }

    #[test]
    fn test_source_shape() {
        let template = CompiledTemplate::compile("a<%= x %>b").unwrap();
        assert!(template.source().starts_with("function(obj){\n"));
        assert!(template.source().ends_with("}"));
        assert_eq!(template.bound_variable(), "obj");

        let overrides = SettingsOverrides::new().with_variable("data");
        let template = CompiledTemplate::compile_with_settings("x", &overrides).unwrap();
        assert!(template.source().starts_with("function(data){\n"));
        assert_eq!(template.bound_variable(), "data");
    }

    #[test]
    fn test_from_source_round_trip() {
        let template = CompiledTemplate::compile("<% _.each(items, function(i) { %><%- i %>;<% }) %>")
            .unwrap();
        let copy = CompiledTemplate::from_source(template.source()).unwrap();
        let data = json!({ "items": ["<a>", 1, null] });
        assert_eq!(copy.render(&data).unwrap(), template.render(&data).unwrap());
        assert_eq!(template.render(&data).unwrap(), "&lt;a&gt;;1;;");
    }

    #[test]
    fn test_variable_mode_requires_qualified_names() {
        let data = json!({ "name": "Ada" });
        let overrides = SettingsOverrides::new().with_variable("data");

        let qualified = CompiledTemplate::compile_with_settings("<%= data.name %>", &overrides).unwrap();
        assert_eq!(qualified.render(&data).unwrap(), "Ada");

        let bare = CompiledTemplate::compile_with_settings("<%= name %>", &overrides).unwrap();
        assert_eq!(
            bare.render(&data).unwrap_err(),
            RenderError::Reference {
                name: "name".to_string()
            }
        );
        assert_eq!(render("<%= name %>", data), "Ada");
    }

    #[test]
    fn test_invalid_pattern_fails_at_compile_time() {
        let overrides = SettingsOverrides::new()
            .with_pattern(Region::Interpolate, Pattern::new(r"\{\{.+?\}\}").unwrap());
        let err = CompiledTemplate::compile_with_settings("{{ x }}", &overrides).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::InvalidPattern {
                region: Some(Region::Interpolate),
                ..
            }
        ));
    }

    #[test]
    fn test_broken_evaluate_region_fails_at_compile_time() {
        let err = CompiledTemplate::compile("<% if (ok) { %>unclosed").unwrap_err();
        let TemplateError::Syntax(syntax) = err else {
            panic!("expected a syntax error, got {err:?}");
        };
        assert!(syntax.program.starts_with("function(obj){"));
        assert!(!syntax.message.is_empty());
    }

    #[test]
    fn test_render_error_leaves_template_reusable() {
        let template = CompiledTemplate::compile("<%= obj.a.b %>").unwrap();
        assert!(matches!(
            template.render(&json!({})),
            Err(RenderError::Type { .. })
        ));
        assert_eq!(template.render(&json!({ "a": { "b": 2 } })).unwrap(), "2");
    }

    #[test]
    fn test_render_is_idempotent() {
        let template = CompiledTemplate::compile("<% var n = count + 1; %><%= n %>").unwrap();
        let data = json!({ "count": 1 });
        assert_eq!(template.render(&data).unwrap(), "2");
        assert_eq!(template.render(&data).unwrap(), "2");
    }

    #[test]
    fn test_self_containing_array_interpolates() {
        let template =
            CompiledTemplate::compile("<% var a = []; a.push(a); %>[<%= a %>]").unwrap();
        assert_eq!(template.render(&json!({})).unwrap(), "[]");
    }

    #[test]
    fn test_render_limits_are_range_errors() {
        for text in ["<%= 'ab'.repeat(1e19) %>", "<% var a = []; a[4000000000] = 1; %>"] {
            let template = CompiledTemplate::compile(text).unwrap();
            assert!(matches!(
                template.render(&json!({})),
                Err(RenderError::Range { .. })
            ));
        }
    }

    #[test]
    fn test_print_from_round_tripped_source() {
        let template = CompiledTemplate::compile("<% print(a, '-', 2); %>!").unwrap();
        let restored = CompiledTemplate::from_source(template.source()).unwrap();
        assert_eq!(restored.render(&json!({ "a": "x" })).unwrap(), "x-2!");
    }

    #[test]
    fn test_render_serialize() {
        let mut data = BTreeMap::new();
        data.insert("who", "world");
        let template = CompiledTemplate::compile("hello <%= who %>").unwrap();
        assert_eq!(template.render_serialize(&data).unwrap(), "hello world");
    }

    #[test]
    fn test_render_serialize_reports_data_errors() {
        let mut data = BTreeMap::new();
        data.insert((1, 2), "tuple keys are not JSON");
        let template = CompiledTemplate::compile("x").unwrap();
        assert!(matches!(
            template.render_serialize(&data),
            Err(RenderError::Data { .. })
        ));
    }

    #[test]
    fn test_compile_free_function() {
        let overrides = SettingsOverrides::new().without(Region::Evaluate);
        assert_eq!(
            compile("<% x %>", Some(&overrides))
                .unwrap()
                .render(&json!({}))
                .unwrap(),
            "<% x %>"
        );
        assert_eq!(
            compile("<%= 1 + 1 %>", None).unwrap().render(&json!({})).unwrap(),
            "2"
        );
    }

    #[test]
    fn test_template_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledTemplate>();
    }
}
