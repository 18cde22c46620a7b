mod app;
mod config;
mod decode;
mod dfl;
mod error;
mod expr;
mod filter;
mod metadata;
mod pipeline;
mod planet;
mod resource;
mod sinks;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;

use app::Cli;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("CLI: Failed to initialize thread pool")?;
    }

    let start = std::time::Instant::now();
    let succeeded = app::run(&cli)?;
    tracing::info!("Finished in {:.2}s", start.elapsed().as_secs_f64());

    if succeeded {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!("One or more outputs failed");
        Ok(ExitCode::FAILURE)
    }
}
