//! chunkvault CLI
//!
//! ```text
//!   put:  stdin|file ──▶ chunks ──▶ backends      (index ──▶ file)
//!   get:  index file ──▶ backends ──▶ chunks ──▶ stdout|file
//!   ls:   per-backend inventory and quota usage
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chunkvault::placement::Quota;
use chunkvault::{Result, Store, StoreConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// chunkvault - replicate content-addressed chunks across storage backends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Store description (YAML)
    #[arg(long, env = "CHUNKVAULT_CONFIG", default_value = "chunkvault.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a stream and write its index
    Put {
        /// Index file to write
        #[arg(long)]
        index: PathBuf,

        /// Input file; stdin when omitted
        input: Option<PathBuf>,
    },

    /// Rebuild a stream from its index
    Get {
        /// Index file to read
        #[arg(long)]
        index: PathBuf,

        /// Output file; stdout when omitted
        output: Option<PathBuf>,
    },

    /// List every backend's inventory and quota usage
    Ls,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    if let Err(e) = run(args).await {
        error!(error = %e, class = ?e.class(), "command failed");
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = StoreConfig::load(&args.config)?;
    info!(
        config = %args.config.display(),
        backends = config.backends.len(),
        min_copies = config.min_copies,
        parity = ?config.parity,
        "opening store"
    );
    let store = Store::open(config).await?;

    match args.command {
        Command::Put { index, input } => {
            let input: Box<dyn AsyncRead + Send + Unpin> = match input {
                Some(path) => Box::new(tokio::fs::File::open(path).await?),
                None => Box::new(tokio::io::stdin()),
            };
            let index_file = tokio::fs::File::create(&index).await?;
            let (summary, _) = store.put(input, index_file).await?;
            info!(
                stored = summary.stored,
                index_lines = summary.index_lines,
                index = %index.display(),
                "stored"
            );
        }
        Command::Get { index, output } => {
            let index_file = BufReader::new(tokio::fs::File::open(&index).await?);
            let output: Box<dyn AsyncWrite + Send + Unpin> = match output {
                Some(path) => Box::new(tokio::fs::File::create(path).await?),
                None => Box::new(tokio::io::stdout()),
            };
            let (written, _) = store.get(index_file, output).await?;
            info!(written, "restored");
        }
        Command::Ls => {
            for report in store.ls().await? {
                let usage = match report.usage {
                    Some(usage) => match usage.max {
                        Quota::Limited(max) => format!("{}/{}", usage.used, max),
                        Quota::Unlimited => format!("{}/unlimited", usage.used),
                    },
                    None => "evicted".to_string(),
                };
                println!("{}\t{}\t{}\t{}", report.id, report.blobs, report.bytes, usage);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // stdout may carry restored data, so logs go to stderr.
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
