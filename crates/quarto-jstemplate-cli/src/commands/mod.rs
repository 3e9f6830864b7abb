/*
 * mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Command implementations for the jstemplate CLI
//!
//! Each command reads its inputs, builds the template settings from the
//! shared [`SettingsArgs`] options and delegates to quarto-jstemplate.

pub mod render;
pub mod source;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Args;
use quarto_jstemplate::{CompiledTemplate, Pattern, Region, SettingsOverrides, TemplateError};
use tracing::debug;

/// Delimiter and binding options shared by every command.
#[derive(Debug, Default, Args)]
pub struct SettingsArgs {
    /// JSON file with settings overrides
    #[arg(long, value_name = "FILE")]
    pub settings: Option<String>,

    /// Pattern for escaped interpolation (bare regex or /regex/g)
    #[arg(long, value_name = "PATTERN", conflicts_with = "no_escape")]
    pub escape: Option<Pattern>,

    /// Pattern for raw interpolation (bare regex or /regex/g)
    #[arg(long, value_name = "PATTERN", conflicts_with = "no_interpolate")]
    pub interpolate: Option<Pattern>,

    /// Pattern for evaluate regions (bare regex or /regex/g)
    #[arg(long, value_name = "PATTERN", conflicts_with = "no_evaluate")]
    pub evaluate: Option<Pattern>,

    /// Disable escaped interpolation
    #[arg(long)]
    pub no_escape: bool,

    /// Disable raw interpolation
    #[arg(long)]
    pub no_interpolate: bool,

    /// Disable evaluate regions
    #[arg(long)]
    pub no_evaluate: bool,

    /// Bind the data context to NAME instead of merging its fields into scope
    #[arg(long, value_name = "NAME")]
    pub variable: Option<String>,
}

impl SettingsArgs {
    /// Settings file first, command-line options on top.
    pub fn overrides(&self) -> Result<SettingsOverrides> {
        let mut overrides = match &self.settings {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings file: {path}"))?;
                SettingsOverrides::from_json(&json)
                    .with_context(|| format!("Invalid settings file: {path}"))?
            }
            None => SettingsOverrides::new(),
        };

        let options = [
            (Region::Escape, &self.escape, self.no_escape),
            (Region::Interpolate, &self.interpolate, self.no_interpolate),
            (Region::Evaluate, &self.evaluate, self.no_evaluate),
        ];
        for (region, pattern, disabled) in options {
            if disabled {
                overrides = overrides.without(region);
            } else if let Some(pattern) = pattern {
                overrides = overrides.with_pattern(region, pattern.clone());
            }
        }
        if let Some(variable) = &self.variable {
            overrides = overrides.with_variable(variable.clone());
        }
        Ok(overrides)
    }
}

/// Read a file, or stdin for `-`.
pub fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(Path::new(path)).with_context(|| format!("Failed to read {path}"))
}

/// Compile the template at `path`, printing an annotated report for syntax
/// errors.
pub fn compile_template(path: &str, settings: &SettingsArgs) -> Result<CompiledTemplate> {
    let text = read_input(path)?;
    let overrides = settings.overrides()?;
    debug!(template = path, ?overrides, "compiling");

    match CompiledTemplate::compile_with_settings(&text, &overrides) {
        Ok(template) => Ok(template),
        Err(TemplateError::Syntax(err)) => {
            eprintln!("{}", err.report());
            bail!("{path}: {err}")
        }
        Err(err) => Err(err).with_context(|| format!("Failed to compile {path}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_no_options_means_no_overrides() {
        assert_eq!(
            SettingsArgs::default().overrides().unwrap(),
            SettingsOverrides::new()
        );
    }

    #[test]
    fn test_command_line_wins_over_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "evaluate": null, "interpolate": "/\\{{\\{{(.+?)\\}}\\}}/g", "variable": "data" }}"#
        )
        .unwrap();

        let args = SettingsArgs {
            settings: Some(file.path().to_string_lossy().into_owned()),
            evaluate: Some(Pattern::parse(r"/\[\[(.+?)\]\]/g").unwrap()),
            no_interpolate: true,
            variable: Some("ctx".to_string()),
            ..SettingsArgs::default()
        };
        let overrides = args.overrides().unwrap();

        assert_eq!(
            overrides.evaluate,
            Some(Some(Pattern::parse(r"/\[\[(.+?)\]\]/g").unwrap()))
        );
        assert_eq!(overrides.interpolate, Some(None));
        assert_eq!(overrides.escape, None);
        assert_eq!(overrides.variable, Some(Some("ctx".to_string())));
    }

    #[test]
    fn test_bad_settings_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "escape": "(" }}"#).unwrap();
        let args = SettingsArgs {
            settings: Some(file.path().to_string_lossy().into_owned()),
            ..SettingsArgs::default()
        };
        let err = args.overrides().unwrap_err();
        assert!(err.to_string().starts_with("Invalid settings file"));
    }

    #[test]
    fn test_compile_template_reports_syntax_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<% if (x) {{ %>").unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let err = compile_template(&path, &SettingsArgs::default()).unwrap_err();
        assert!(err.to_string().contains("Template syntax error"));
    }
}
