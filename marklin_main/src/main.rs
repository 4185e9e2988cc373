//! # Marklin Main
//!
//! Boots the track conductor, I/O, and train controller stack and runs it
//! until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Run with a config file
//! marklin_main --config marklin.toml
//!
//! # Override the layout and run with no trains configured
//! marklin_main --layout b -v
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use marklin_common::config::{MarklinConfig, TrackLayout};
use marklin_main::system::MarklinSystem;

/// Marklin train control stack - conductor, I/O, and train controllers
#[derive(Parser, Debug)]
#[command(name = "marklin_main")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Message-passing train control stack")]
#[command(long_about = None)]
struct Args {
    /// Path to the workspace configuration file (layout + trains to spawn).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Track layout to load, overriding the config file (`a` or `b`).
    #[arg(short, long)]
    layout: Option<String>,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    let config = load_config(&args);
    info!(layout = %config.layout, trains = config.trains.len(), "Marklin control stack starting");

    let system = MarklinSystem::boot(&config);

    let running = system.running_flag();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })
    .expect("failed to install Ctrl-C handler");

    system.run();

    info!("Marklin control stack shut down");
}

fn load_config(args: &Args) -> MarklinConfig {
    let mut config = match &args.config {
        Some(path) => MarklinConfig::load(path).unwrap_or_else(|e| {
            tracing::error!(error = %e, path = ?path, "failed to load config, falling back to defaults");
            MarklinConfig::default()
        }),
        None => MarklinConfig::default(),
    };

    if let Some(layout) = &args.layout {
        config.layout = match layout.to_ascii_uppercase().as_str() {
            "A" => TrackLayout::A,
            "B" => TrackLayout::B,
            other => {
                tracing::warn!(layout = other, "unknown layout override, keeping config value");
                config.layout
            }
        };
    }

    config
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
