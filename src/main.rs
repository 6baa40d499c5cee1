// Copyright 2026 relink Contributors
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod config;
mod data_uri;
mod document;
mod fetch;
mod hash;
mod limiter;
mod pipeline;
mod progress;
mod urls;

#[derive(Parser)]
#[command(
    name = "relink",
    about = "relink — rewrite image references in nested JSON project files",
    version,
    after_help = "Passes (refresh, download, embed, prefix rewrite) are enabled in the YAML config."
)]
struct Cli {
    /// Path to the YAML run configuration
    #[arg(long, short)]
    config: PathBuf,

    /// Suppress progress output
    #[arg(long, short)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "relink=debug" } else { "relink=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::Config::load(&cli.config)?;
    if config.show_config {
        eprintln!("{config:#?}");
    }

    let result = pipeline::run(&config, cli.quiet).await;

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }
    result
}
