//! # Replay recorded cycles through one engine
//! regime-fusion replay --input cycles.json --config engine.json
//!
//! # Print the default engine configuration
//! regime-fusion defaults

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use regime_fusion::{CycleInput, EngineConfig, FusionEngine};

#[derive(Parser)]
#[command(name = "regime-fusion")]
#[command(about = "Multi-factor signal fusion and market-regime engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate recorded cycle inputs in order, one JSON output per line
    Replay {
        /// JSON array of cycle inputs
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration (JSON); defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Stop at the first cycle that fails instead of skipping it
        #[arg(long)]
        strict: bool,
    },

    /// Print the default engine configuration as JSON
    Defaults,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
}

fn cmd_replay(input: &Path, config: Option<&Path>, strict: bool) -> Result<()> {
    let config = load_config(config)?;
    let mut engine = FusionEngine::new(config).context("Invalid engine configuration")?;

    let raw = fs::read_to_string(input)
        .with_context(|| format!("Failed to read cycles {}", input.display()))?;
    let cycles: Vec<CycleInput> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid cycle file {}", input.display()))?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut skipped = 0usize;

    for (i, cycle) in cycles.iter().enumerate() {
        match engine.evaluate(cycle) {
            Ok(output) => {
                serde_json::to_writer(&mut out, &output)?;
                writeln!(out)?;
            }
            Err(e) if !strict => {
                warn!(index = i, error = %e, "Skipping cycle");
                skipped += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("Cycle {} failed", i)),
        }
    }
    out.flush()?;

    info!(
        cycles = cycles.len(),
        evaluated = engine.cycles(),
        skipped,
        "Replay complete"
    );
    Ok(())
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("regime_fusion=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            input,
            config,
            strict,
        } => cmd_replay(&input, config.as_deref(), strict)?,
        Commands::Defaults => {
            let json = serde_json::to_string_pretty(&EngineConfig::default())?;
            println!("{}", json);
        }
    }

    Ok(())
}
