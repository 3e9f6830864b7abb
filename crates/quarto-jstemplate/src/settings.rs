/*
 * settings.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Delimiter settings for template compilation.
//!
//! [`TemplateSettings`] is an immutable value. The ERB-style defaults are
//! available through [`TemplateSettings::default`]; callers customize them by
//! merging a [`SettingsOverrides`] value, which never touches the defaults
//! themselves.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::error::{TemplateError, TemplateResult};

/// Default pattern for escaped interpolation: `<%- value %>`.
pub const DEFAULT_ESCAPE: &str = r"<%-([\s\S]+?)%>";

/// Default pattern for raw interpolation: `<%= value %>`.
pub const DEFAULT_INTERPOLATE: &str = r"<%=([\s\S]+?)%>";

/// Default pattern for evaluate regions: `<% statements %>`.
pub const DEFAULT_EVALUATE: &str = r"<%([\s\S]+?)%>";

/// Name of the program parameter when no variable is configured.
pub const DEFAULT_VARIABLE: &str = "obj";

static DEFAULTS: Lazy<TemplateSettings> = Lazy::new(|| TemplateSettings {
    escape: Some(Pattern::new(DEFAULT_ESCAPE).unwrap()),
    interpolate: Some(Pattern::new(DEFAULT_INTERPOLATE).unwrap()),
    evaluate: Some(Pattern::new(DEFAULT_EVALUATE).unwrap()),
    variable: None,
});

/// The three kinds of delimited region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// `<%- … %>`: HTML-escaped interpolation.
    Escape,
    /// `<%= … %>`: raw interpolation.
    Interpolate,
    /// `<% … %>`: statements spliced into the program.
    Evaluate,
}

impl Region {
    /// All regions, in the order their patterns are combined.
    pub const ALL: [Region; 3] = [Region::Escape, Region::Interpolate, Region::Evaluate];

    pub fn as_str(self) -> &'static str {
        match self {
            Region::Escape => "escape",
            Region::Interpolate => "interpolate",
            Region::Evaluate => "evaluate",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delimiter pattern.
///
/// Patterns are written either as bare regular expressions
/// (`<%=([\s\S]+?)%>`) or as JavaScript-style literals
/// (`/<%=([\s\S]+?)%>/g`). Bare patterns always scan for every match; a
/// literal scans for every match only when it carries the `g` flag, and the
/// matcher rejects literals without it. The `i`, `m` and `s` flags become
/// inline regex flags.
///
/// The number of capture groups is not checked here: that is a property of
/// how the pattern is used, and is validated when a template is compiled.
#[derive(Debug, Clone)]
pub struct Pattern {
    text: String,
    regex: Regex,
    global: bool,
}

impl Pattern {
    /// Create a multi-match pattern from bare regular expression source.
    pub fn new(source: &str) -> TemplateResult<Self> {
        Self::build(source.to_string(), source, true)
    }

    /// Parse either a `/source/flags` literal or a bare regular expression.
    pub fn parse(text: &str) -> TemplateResult<Self> {
        match split_literal(text) {
            Some((body, flags)) => {
                let mut global = false;
                let mut inline = String::new();
                for flag in flags.chars() {
                    match flag {
                        'g' => global = true,
                        'i' | 'm' | 's' => inline.push(flag),
                        // Unicode-aware matching is always on.
                        'u' => {}
                        other => {
                            return Err(TemplateError::invalid_pattern(
                                None,
                                text,
                                format!("unsupported flag `{other}`"),
                            ));
                        }
                    }
                }
                let body = unescape_slashes(body);
                let source = if inline.is_empty() {
                    body
                } else {
                    format!("(?{inline}){body}")
                };
                Self::build(text.to_string(), &source, global)
            }
            None => Self::new(text),
        }
    }

    fn build(text: String, source: &str, global: bool) -> TemplateResult<Self> {
        let regex = Regex::new(source)
            .map_err(|e| TemplateError::invalid_pattern(None, &text, e.to_string()))?;
        Ok(Self {
            text,
            regex,
            global,
        })
    }

    /// The pattern as it was written.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The compiled regular expression.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Whether scanning continues past the first match.
    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Number of explicit capture groups (the implicit whole-match group is
    /// not counted).
    pub fn capture_groups(&self) -> usize {
        self.regex.captures_len() - 1
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.global == other.global && self.regex.as_str() == other.regex.as_str()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Pattern {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pattern::parse(s)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Pattern::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Split `/body/flags` into body and flags.
///
/// Only text that starts with `/` and whose final `/` is followed by ASCII
/// letters alone counts as a literal.
fn split_literal(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('/')?;
    let close = rest.rfind('/')?;
    let flags = &rest[close + 1..];
    if !flags.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((&rest[..close], flags))
}

/// `\/` inside a literal body stands for `/`.
fn unescape_slashes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('/') => out.push('/'),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Settings used to compile one template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSettings {
    escape: Option<Pattern>,
    interpolate: Option<Pattern>,
    evaluate: Option<Pattern>,
    variable: Option<String>,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        DEFAULTS.clone()
    }
}

impl TemplateSettings {
    /// Settings in which no region is recognized: every template is literal
    /// text.
    pub fn literal() -> Self {
        Self {
            escape: None,
            interpolate: None,
            evaluate: None,
            variable: None,
        }
    }

    /// The pattern configured for a region, if any.
    pub fn pattern(&self, region: Region) -> Option<&Pattern> {
        match region {
            Region::Escape => self.escape.as_ref(),
            Region::Interpolate => self.interpolate.as_ref(),
            Region::Evaluate => self.evaluate.as_ref(),
        }
    }

    /// The configured data-context variable. `None` means the fields of the
    /// data context are addressable as bare names.
    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    /// Name that binds the data context inside the generated program.
    pub fn bound_variable(&self) -> &str {
        self.variable().unwrap_or(DEFAULT_VARIABLE)
    }

    /// Replace the pattern for one region (`None` disables the region).
    pub fn with_pattern(mut self, region: Region, pattern: Option<Pattern>) -> Self {
        match region {
            Region::Escape => self.escape = pattern,
            Region::Interpolate => self.interpolate = pattern,
            Region::Evaluate => self.evaluate = pattern,
        }
        self
    }

    /// Bind the data context to a named variable.
    ///
    /// An empty name is the same as no variable.
    pub fn with_variable(mut self, variable: Option<impl Into<String>>) -> Self {
        self.variable = variable.map(Into::into).filter(|v| !v.is_empty());
        self
    }

    /// Return new settings with every present override applied.
    pub fn merge(&self, overrides: &SettingsOverrides) -> Self {
        let mut merged = self.clone();
        for region in Region::ALL {
            if let Some(pattern) = overrides.pattern(region) {
                merged = merged.with_pattern(region, pattern.clone());
            }
        }
        if let Some(variable) = &overrides.variable {
            merged = merged.with_variable(variable.clone());
        }
        merged
    }
}

/// Partial settings supplied by a caller.
///
/// Each field is tri-state: `None` keeps the base value, `Some(None)`
/// disables it (a region that matches nothing, or no variable), and
/// `Some(Some(_))` replaces it. In JSON, a missing key keeps the base value
/// and `null` disables it:
///
/// ```json
/// { "interpolate": "/\\{\\{(.+?)\\}\\}/g", "evaluate": null, "variable": "data" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsOverrides {
    #[serde(default, deserialize_with = "present")]
    pub escape: Option<Option<Pattern>>,
    #[serde(default, deserialize_with = "present")]
    pub interpolate: Option<Option<Pattern>>,
    #[serde(default, deserialize_with = "present")]
    pub evaluate: Option<Option<Pattern>>,
    #[serde(default, deserialize_with = "present")]
    pub variable: Option<Option<String>>,
}

/// Distinguishes an explicit `null` from a missing key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl SettingsOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse overrides from JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn pattern(&self, region: Region) -> Option<&Option<Pattern>> {
        match region {
            Region::Escape => self.escape.as_ref(),
            Region::Interpolate => self.interpolate.as_ref(),
            Region::Evaluate => self.evaluate.as_ref(),
        }
    }

    fn slot(&mut self, region: Region) -> &mut Option<Option<Pattern>> {
        match region {
            Region::Escape => &mut self.escape,
            Region::Interpolate => &mut self.interpolate,
            Region::Evaluate => &mut self.evaluate,
        }
    }

    /// Use `pattern` for `region`.
    pub fn with_pattern(mut self, region: Region, pattern: Pattern) -> Self {
        *self.slot(region) = Some(Some(pattern));
        self
    }

    /// Turn `region` off entirely.
    pub fn without(mut self, region: Region) -> Self {
        *self.slot(region) = Some(None);
        self
    }

    /// Bind the data context to `variable` instead of merging its fields
    /// into scope.
    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(Some(variable.into()));
        self
    }

    /// Go back to bare-name access to data-context fields.
    pub fn without_variable(mut self) -> Self {
        self.variable = Some(None);
        self
    }

    /// Layer `other` on top of `self`; fields present in `other` win.
    pub fn overlay(mut self, other: SettingsOverrides) -> Self {
        for region in Region::ALL {
            if let Some(pattern) = other.pattern(region) {
                *self.slot(region) = Some(pattern.clone());
            }
        }
        if other.variable.is_some() {
            self.variable = other.variable;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = TemplateSettings::default();
        assert_eq!(
            settings.pattern(Region::Escape).map(Pattern::as_str),
            Some(DEFAULT_ESCAPE)
        );
        assert_eq!(
            settings.pattern(Region::Interpolate).map(Pattern::as_str),
            Some(DEFAULT_INTERPOLATE)
        );
        assert_eq!(
            settings.pattern(Region::Evaluate).map(Pattern::as_str),
            Some(DEFAULT_EVALUATE)
        );
        assert_eq!(settings.variable(), None);
        assert_eq!(settings.bound_variable(), "obj");
    }

    #[test]
    fn test_bare_pattern_is_global() {
        let pattern = Pattern::new(r"\{\{(.+?)\}\}").unwrap();
        assert!(pattern.is_global());
        assert_eq!(pattern.capture_groups(), 1);
    }

    #[test]
    fn test_literal_pattern_flags() {
        let pattern = Pattern::parse(r"/\[\[(.+?)\]\]/gi").unwrap();
        assert!(pattern.is_global());
        assert_eq!(pattern.regex().as_str(), r"(?i)\[\[(.+?)\]\]");
        assert!(pattern.regex().is_match("[[x]]"));

        let single = Pattern::parse(r"/<%=(.+?)%>/").unwrap();
        assert!(!single.is_global());
    }

    #[test]
    fn test_literal_pattern_unescapes_slashes() {
        let pattern = Pattern::parse(r"/<\/(.+?)\/>/g").unwrap();
        assert_eq!(pattern.regex().as_str(), r"</(.+?)/>");
    }

    #[test]
    fn test_literal_pattern_rejects_unknown_flag() {
        let err = Pattern::parse("/(x)/gy").unwrap_err();
        assert!(err.to_string().contains("unsupported flag `y`"));
    }

    #[test]
    fn test_pattern_rejects_invalid_regex() {
        let err = Pattern::new("(unclosed").unwrap_err();
        assert!(matches!(err, TemplateError::InvalidPattern { .. }));
    }

    #[test]
    fn test_text_with_trailing_slash_and_symbols_is_bare() {
        // Not a literal: the final slash is followed by non-letters.
        let pattern = Pattern::parse("/(a)/1").unwrap();
        assert!(pattern.is_global());
        assert_eq!(pattern.regex().as_str(), "/(a)/1");
    }

    #[test]
    fn test_merge_keeps_defaults_for_missing_fields() {
        let overrides =
            SettingsOverrides::new().with_pattern(Region::Interpolate, Pattern::new(r"\{\{(.+?)\}\}").unwrap());
        let merged = TemplateSettings::default().merge(&overrides);

        assert_eq!(
            merged.pattern(Region::Interpolate).map(Pattern::as_str),
            Some(r"\{\{(.+?)\}\}")
        );
        assert_eq!(
            merged.pattern(Region::Escape).map(Pattern::as_str),
            Some(DEFAULT_ESCAPE)
        );
        // The shared defaults are untouched.
        assert_eq!(
            TemplateSettings::default()
                .pattern(Region::Interpolate)
                .map(Pattern::as_str),
            Some(DEFAULT_INTERPOLATE)
        );
    }

    #[test]
    fn test_merge_disables_region() {
        let merged = TemplateSettings::default().merge(&SettingsOverrides::new().without(Region::Evaluate));
        assert!(merged.pattern(Region::Evaluate).is_none());
        assert!(merged.pattern(Region::Escape).is_some());
    }

    #[test]
    fn test_merge_variable() {
        let with_var = TemplateSettings::default().merge(&SettingsOverrides::new().with_variable("data"));
        assert_eq!(with_var.variable(), Some("data"));
        assert_eq!(with_var.bound_variable(), "data");

        let cleared = with_var.merge(&SettingsOverrides::new().without_variable());
        assert_eq!(cleared.variable(), None);

        let empty = TemplateSettings::default().merge(&SettingsOverrides::new().with_variable(""));
        assert_eq!(empty.variable(), None);
    }

    #[test]
    fn test_overrides_from_json() {
        let overrides = SettingsOverrides::from_json(
            r#"{ "interpolate": "/\\{\\{(.+?)\\}\\}/g", "evaluate": null, "variable": "data" }"#,
        )
        .unwrap();

        assert!(overrides.escape.is_none());
        assert_eq!(
            overrides
                .interpolate
                .as_ref()
                .and_then(|p| p.as_ref())
                .map(Pattern::as_str),
            Some(r"/\{\{(.+?)\}\}/g")
        );
        assert_eq!(overrides.evaluate, Some(None));
        assert_eq!(overrides.variable, Some(Some("data".to_string())));
    }

    #[test]
    fn test_overrides_from_json_rejects_unknown_field() {
        assert!(SettingsOverrides::from_json(r#"{ "escapes": null }"#).is_err());
    }

    #[test]
    fn test_overrides_from_json_rejects_bad_pattern() {
        let err = SettingsOverrides::from_json(r#"{ "escape": "(" }"#).unwrap_err();
        assert!(err.to_string().contains("Invalid delimiter pattern"));
    }

    #[test]
    fn test_overlay() {
        let file = SettingsOverrides::new()
            .with_variable("data")
            .without(Region::Escape);
        let cli = SettingsOverrides::new().without_variable();

        let combined = file.overlay(cli);
        assert_eq!(combined.variable, Some(None));
        assert_eq!(combined.escape, Some(None));
        assert_eq!(combined.interpolate, None);
    }
}
