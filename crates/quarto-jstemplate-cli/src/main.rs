/*
 * main.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! jstemplate - render underscore-style micro-templates from the command line

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod sink;

use commands::SettingsArgs;
use sink::SinkMode;

#[derive(Parser)]
#[command(name = "jstemplate")]
#[command(version)]
#[command(about = "Render underscore-style micro-templates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template against a JSON data context
    Render {
        /// Template file ('-' for stdin)
        template: String,

        /// JSON file with the data context ('-' for stdin)
        #[arg(short, long)]
        data: Option<String>,

        /// Also write the output to FILE
        #[arg(short = 'o', long, value_name = "FILE")]
        to: Option<String>,

        /// How to combine the output with existing contents of FILE
        #[arg(long, value_enum, default_value_t = SinkMode::Append)]
        mode: SinkMode,

        /// Do not echo the output when writing to a file
        #[arg(short, long)]
        quiet: bool,

        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Print the generated render program of a template
    Source {
        /// Template file ('-' for stdin)
        template: String,

        #[command(flatten)]
        settings: SettingsArgs,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarto_jstemplate_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            template,
            data,
            to,
            mode,
            quiet,
            settings,
        } => commands::render::execute(commands::render::RenderArgs {
            template,
            data,
            to,
            mode,
            quiet,
            settings,
        }),
        Commands::Source { template, settings } => {
            commands::source::execute(&template, &settings)
        }
    }
}
