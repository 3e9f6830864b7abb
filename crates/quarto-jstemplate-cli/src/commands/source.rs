/*
 * source.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! `jstemplate source`: print the generated render program.

use anyhow::Result;

use super::{SettingsArgs, compile_template};

pub fn execute(template: &str, settings: &SettingsArgs) -> Result<()> {
    let compiled = compile_template(template, settings)?;
    println!("{}", compiled.source());
    Ok(())
}
