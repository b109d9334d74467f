//! SegCommit CLI
//!
//! Command-line tools for segment completion.
//!
//! # Commands
//!
//! - `decode` - Decode a controller response and show its fields
//! - `url` - Render the request URL a server would send
//! - `simulate` - Run replicas against an in-process controller

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Segment completion tools.
#[derive(Parser)]
#[command(name = "segcommit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a controller response (reads stdin when no file is given)
    Decode {
        /// File holding the JSON response
        file: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Render the URL for a server request
    Url {
        /// Request kind (segmentConsumed, segmentCommit, ...)
        kind: String,

        /// Segment name (table__partition__sequence__time)
        segment: String,

        /// End offset
        offset: u64,

        /// Server instance id
        #[arg(short, long, default_value = "server-1")]
        instance: String,

        /// Controller base URL
        #[arg(short, long, default_value = "http://localhost:9000")]
        controller: String,

        /// Reason, for stoppedConsuming
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Run replicas through a negotiation against an in-process controller
    Simulate {
        /// Number of replicas
        #[arg(short, long, default_value = "3")]
        replicas: usize,

        /// Segment to complete
        #[arg(short, long, default_value = "events__0__0__20240101T0000Z")]
        segment: String,

        /// Offset proposed by the first replica
        #[arg(short, long, default_value = "1000")]
        offset: u64,

        /// Replica i proposes `offset + i % spread`
        #[arg(long, default_value = "1")]
        spread: u64,

        /// Commit in a single step instead of the split flow
        #[arg(long)]
        single_step: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Decode { file, format } => {
            commands::decode::run(file.as_deref(), &format)?;
        }
        Commands::Url {
            kind,
            segment,
            offset,
            instance,
            controller,
            reason,
        } => {
            commands::url::run(&kind, &segment, offset, &instance, &controller, reason)?;
        }
        Commands::Simulate {
            replicas,
            segment,
            offset,
            spread,
            single_step,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                replicas,
                segment,
                offset,
                spread,
                split_commit: !single_step,
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::Version => {
            println!("SegCommit CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
