//! Streamtee - media-stream fan-out supervisor
//!
//! Polls a stream server for the set of active streams, runs one flow
//! per matched stream (a source process teed into N sink processes) and
//! keeps every child supervised: restarted on failure, killed on stall,
//! terminated on shutdown.
//!
//! # Usage
//!
//! ```bash
//! # Run the supervisor
//! streamtee config.yml
//!
//! # Inspect what the stream server reports right now
//! streamtee --show-streams config.yml
//!
//! # Echo the parsed configuration
//! streamtee --show-config config.yml
//! ```

mod app;
mod show;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use streamtee_config::Config;

/// Media-stream fan-out supervisor.
#[derive(Parser, Debug)]
#[command(name = "streamtee")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug message logging.
    #[arg(long)]
    debug: bool,

    /// Show available and active streams, then exit.
    #[arg(long)]
    show_streams: bool,

    /// Show the parsed configuration, then exit.
    #[arg(long)]
    show_config: bool,

    /// Path to the YAML configuration file.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug)?;

    let config = Config::from_file(&cli.config)?;

    if cli.show_config {
        return show::show_config(&config);
    }
    if cli.show_streams {
        return show::show_streams(&config).await;
    }

    let app = app::App::new(config);
    app.run().await
}

/// Initialize the tracing subscriber for logging.
fn init_logging(debug: bool) -> Result<()> {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    Ok(())
}
