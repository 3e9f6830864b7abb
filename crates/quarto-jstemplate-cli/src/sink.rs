/*
 * sink.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Writing rendered output into a destination file.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;

/// How rendered output is combined with the existing file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkMode {
    /// Add after the existing contents
    Append,
    /// Overwrite the file
    Replace,
    /// Add before the existing contents
    Prepend,
}

/// Write `text` to `path` according to `mode`. Missing files are created.
pub fn write_to_sink(path: &Path, text: &str, mode: SinkMode) -> Result<()> {
    let display = path.display();
    match mode {
        SinkMode::Append => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {display}"))?;
            file.write_all(text.as_bytes())
                .with_context(|| format!("Failed to write {display}"))?;
        }
        SinkMode::Replace => {
            std::fs::write(path, text).with_context(|| format!("Failed to write {display}"))?;
        }
        SinkMode::Prepend => {
            let existing = match std::fs::read_to_string(path) {
                Ok(existing) => existing,
                Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
                Err(e) => return Err(e).with_context(|| format!("Failed to read {display}")),
            };
            std::fs::write(path, format!("{text}{existing}"))
                .with_context(|| format!("Failed to write {display}"))?;
        }
    }
    Ok(())
}
