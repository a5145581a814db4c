#![forbid(unsafe_code)]

mod cmd;

use clap::{Parser, Subcommand};
use forge_core::{AggregateKind, EngineError, Issue, PullRequest};
use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "forge: issue and pull request aggregate tooling",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Fold an event log and print the resulting state",
        after_help = "EXAMPLES:\n    # Replay an exported issue log\n    forge replay events.json --kind issue\n\n    # Emit machine-readable output\n    forge replay events.json --kind pull-request --json"
    )]
    Replay {
        /// JSON array of persisted events.
        events: PathBuf,
        /// Aggregate kind the log belongs to (`issue` or `pull-request`).
        #[arg(long)]
        kind: AggregateKind,
    },

    #[command(
        about = "Check that a stored document's cached state matches its log",
        after_help = "EXAMPLES:\n    # Exit non-zero if the cache diverged\n    forge verify issue-42.json --kind issue"
    )]
    Verify {
        /// Aggregate document `{id, number, events, state}`.
        document: PathBuf,
        #[arg(long)]
        kind: AggregateKind,
    },

    #[command(
        about = "Re-fold an aggregate in the configured store and rewrite its cache",
        after_help = "EXAMPLES:\n    # Rebuild using ./forge.toml\n    forge rebuild 9f2c... --kind issue\n\n    # Use an explicit config file\n    forge rebuild 9f2c... --kind issue --config /etc/forge.toml"
    )]
    Rebuild {
        /// Aggregate id.
        id: String,
        #[arg(long)]
        kind: AggregateKind,
        /// Config file (defaults to ./forge.toml, then the user config dir).
        #[arg(long)]
        config: Option<PathBuf>,
    },

    #[command(about = "List the event type catalog")]
    Types,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FORGE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "forge=debug,info"
        } else {
            "forge=info,warn"
        })
    });

    let format = env::var("FORGE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(io::stderr))
                .init();
        }
        _ => {
            registry.with(fmt::layer().compact().with_writer(io::stderr)).init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    let json = cli.json;

    match cli.command {
        Commands::Replay { events, kind } => match kind {
            AggregateKind::Issue => cmd::replay::<Issue>(&events, json, &mut out),
            AggregateKind::PullRequest => cmd::replay::<PullRequest>(&events, json, &mut out),
        },
        Commands::Verify { document, kind } => match kind {
            AggregateKind::Issue => cmd::verify::<Issue>(&document, json, &mut out),
            AggregateKind::PullRequest => cmd::verify::<PullRequest>(&document, json, &mut out),
        },
        Commands::Rebuild { id, kind, config } => {
            let config = config.as_deref();
            match kind {
                AggregateKind::Issue => cmd::rebuild::<Issue>(&id, config, json, &mut out).await,
                AggregateKind::PullRequest => {
                    cmd::rebuild::<PullRequest>(&id, config, json, &mut out).await
                }
            }
        }
        Commands::Types => cmd::types(json, &mut out),
    }
}

/// Print an error with its stable code and hint when it came from the engine.
fn report(err: &anyhow::Error, json: bool) {
    let engine = err.downcast_ref::<EngineError>();
    if json {
        let value = serde_json::json!({
            "error": format!("{err:#}"),
            "code": engine.map(|e| e.code().code()),
            "hint": engine.and_then(EngineError::hint),
        });
        eprintln!("{value}");
        return;
    }

    match engine {
        Some(e) => eprintln!("error[{}]: {err:#}", e.code()),
        None => eprintln!("error: {err:#}"),
    }
    if let Some(hint) = engine.and_then(EngineError::hint) {
        eprintln!("hint: {hint}");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let json = cli.json;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err, json);
            ExitCode::FAILURE
        }
    }
}
