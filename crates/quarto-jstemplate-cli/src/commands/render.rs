/*
 * render.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Render command implementation
 */

//! `jstemplate render`: render a template against a JSON data context.
//!
//! The output goes to stdout. With `--to`, it is also written to a file
//! using the selected [`SinkMode`].

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{SettingsArgs, compile_template, read_input};
use crate::sink::{SinkMode, write_to_sink};

/// Arguments for the render command
#[derive(Debug)]
pub struct RenderArgs {
    /// Template file, or `-` for stdin
    pub template: String,
    /// Data context file, or `-` for stdin
    pub data: Option<String>,
    /// Destination file
    pub to: Option<String>,
    pub mode: SinkMode,
    /// Suppress the stdout echo when writing to a file
    pub quiet: bool,
    pub settings: SettingsArgs,
}

/// Execute the render command
pub fn execute(args: RenderArgs) -> Result<()> {
    if args.template == "-" && args.data.as_deref() == Some("-") {
        anyhow::bail!("The template and the data context cannot both be read from stdin");
    }

    let template = compile_template(&args.template, &args.settings)?;
    let data = match &args.data {
        Some(path) => {
            let json = read_input(path)?;
            serde_json::from_str(&json)
                .with_context(|| format!("Invalid JSON data context: {path}"))?
        }
        None => serde_json::Value::Object(Default::default()),
    };

    let output = template
        .render(&data)
        .with_context(|| format!("Failed to render {}", args.template))?;

    if let Some(to) = &args.to {
        write_to_sink(Path::new(to), &output, args.mode)?;
        info!(path = %to, mode = ?args.mode, "wrote rendered output");
        if args.quiet {
            return Ok(());
        }
    }

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(output.as_bytes())
        .context("Failed to write to stdout")?;
    stdout.flush().context("Failed to write to stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("page.template");
        let data = dir.path().join("data.json");
        let out = dir.path().join("out.txt");
        std::fs::write(&template, "<%- title %>|<%= items.join(',') %>\n").unwrap();
        std::fs::write(&data, r#"{ "title": "A & B", "items": [1, 2] }"#).unwrap();

        let args = |mode| RenderArgs {
            template: template.to_string_lossy().into_owned(),
            data: Some(data.to_string_lossy().into_owned()),
            to: Some(out.to_string_lossy().into_owned()),
            mode,
            quiet: true,
            settings: SettingsArgs::default(),
        };
        execute(args(SinkMode::Replace)).unwrap();
        execute(args(SinkMode::Append)).unwrap();

        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "A &amp; B|1,2\nA &amp; B|1,2\n"
        );
    }

    #[test]
    fn test_render_error_names_the_template() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("broken.template");
        std::fs::write(&template, "<%= missing %>").unwrap();
        let path = template.to_string_lossy().into_owned();

        let err = execute(RenderArgs {
            template: path.clone(),
            data: None,
            to: None,
            mode: SinkMode::Append,
            quiet: false,
            settings: SettingsArgs::default(),
        })
        .unwrap_err();

        assert_eq!(err.to_string(), format!("Failed to render {path}"));
        assert_eq!(
            err.root_cause().to_string(),
            "ReferenceError: missing is not defined"
        );
    }

    #[test]
    fn test_stdin_cannot_serve_both_inputs() {
        let err = execute(RenderArgs {
            template: "-".to_string(),
            data: Some("-".to_string()),
            to: None,
            mode: SinkMode::Append,
            quiet: false,
            settings: SettingsArgs::default(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("stdin"));
    }
}
