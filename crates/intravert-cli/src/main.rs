//! CLI binary for running Intravert operation envelopes against the built-in
//! handler catalog.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use intravert_pipeline::{EngineConfig, PipelineExecutor, PipelineResponse, RequestEnvelope};
use intravert_types::IntravertError;

#[derive(Parser)]
#[command(name = "intravert", version, about = "Batched operation pipeline runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a request envelope and print the reply
    Run {
        /// Path to the envelope JSON file, or `-` for stdin
        envelope: PathBuf,

        /// Engine config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Default deadline for envelopes that declare no timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List the registered operation topics
    Ops {
        /// Engine config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays a clean JSON reply.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            envelope,
            config,
            timeout_ms,
        } => {
            cmd_run(&envelope, config.as_deref(), timeout_ms).await?;
        }
        Commands::Ops { config } => {
            cmd_ops(config.as_deref())?;
        }
    }

    Ok(())
}

/// `--verbose` forces debug; otherwise `RUST_LOG`, falling back to info.
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(p) => EngineConfig::load(p)?,
        None => EngineConfig::from_env()?,
    };
    Ok(config)
}

fn read_envelope(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        return Ok(source);
    }
    Ok(std::fs::read_to_string(path)?)
}

async fn cmd_run(
    path: &Path,
    config_path: Option<&Path>,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(ms) = timeout_ms {
        config.default_timeout = Duration::from_millis(ms);
        config.validate()?;
    }

    let source = read_envelope(path)?;
    let executor = PipelineExecutor::with_default_catalog(config)?;

    let envelope = match RequestEnvelope::from_json(&source) {
        Ok(envelope) => envelope,
        Err(err) => reject(err),
    };
    let response = match executor.execute(envelope).await {
        Ok(response) => response,
        Err(err @ IntravertError::MalformedRequest(_)) => reject(err),
        Err(err) => return Err(err.into()),
    };

    println!("{}", serde_json::to_string_pretty(&response.to_json())?);

    match response {
        PipelineResponse::Completed(_) => {}
        PipelineResponse::Failed { failed_step, .. } => {
            tracing::warn!(step = failed_step, "Request aborted");
        }
        PipelineResponse::TimedOut { timeout_ms, .. } => {
            tracing::warn!(timeout_ms, "Request timed out");
        }
    }
    Ok(())
}

fn reject(err: IntravertError) -> ! {
    eprintln!("Error: {}", err);
    std::process::exit(2);
}

fn cmd_ops(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let executor = PipelineExecutor::with_default_catalog(config)?;
    for topic in executor.registry().topics() {
        println!("{}", topic);
    }
    Ok(())
}
