//! `unsubscriber` - unsubscribes from every mailing list in a mailbox
//!
//! Scans an IMAP mailbox for `List-Unsubscribe` headers and follows each
//! advertised link, refusing any that point back into the local network.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod app;
mod config;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use config::Config;

/// Exit code for an unusable configuration.
const EXIT_CONFIG: u8 = 2;

/// Unsubscribes from the mailing lists found in an IMAP mailbox.
#[derive(Parser, Debug)]
#[command(name = "unsubscriber")]
#[command(version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = config::DEFAULT_PATH)]
    config: PathBuf,

    /// Log everything, including debug output
    #[arg(long, conflicts_with_all = ["verbose", "quiet"])]
    debug: bool,

    /// Log progress
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Log errors only
    #[arg(short, long)]
    quiet: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

impl Cli {
    const fn level(&self) -> Level {
        if self.debug {
            Level::DEBUG
        } else if self.verbose {
            Level::INFO
        } else if self.quiet {
            Level::ERROR
        } else {
            Level::WARN
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("unsubscriber: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Err(e) = logging::init(cli.level(), config.logs.as_deref(), !cli.no_color) {
        eprintln!("unsubscriber: {e:#}");
        return ExitCode::from(EXIT_CONFIG);
    }
    tracing::info!("starting unsubscriber {}", env!("CARGO_PKG_VERSION"));

    match app::run(&config).await {
        Ok(summary) => {
            tracing::info!(
                "scan complete: {} submitted, {} duplicates, {} refused",
                summary.submitted,
                summary.duplicates,
                summary.refused
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
