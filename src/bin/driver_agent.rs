//! driver-agent - hosts one database engine behind the NDJSON protocol
//!
//! Reads one request per line on stdin and writes one response per line on
//! stdout until stdin closes. Logs go to stderr.
//!
//! The engine comes from `--engine`, then `DBNEXUS_AGENT_ENGINE`, then the
//! executable name (`duckdb-driver-agent` hosts `duckdb`).

use clap::Parser;
use dbnexus::agent::AgentWorker;
use dbnexus::config::Settings;
use dbnexus::db::{normalize_engine, BuildCapabilities, DriverRegistry};
use dbnexus::logging;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "driver-agent")]
#[command(about = "dbnexus driver agent")]
#[command(version)]
struct Cli {
    /// Engine to host
    #[arg(long, env = "DBNEXUS_AGENT_ENGINE")]
    engine: Option<String>,
}

/// `{engine}-driver-agent[-os-arch]` → `engine`.
fn engine_from_executable() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    let stem = exe.file_stem()?.to_string_lossy().to_string();
    let (engine, _) = stem.split_once("-driver-agent")?;
    (!engine.is_empty()).then(|| engine.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings::load().unwrap_or_default();
    logging::init_agent(&settings.logging);

    let Some(engine) = cli
        .engine
        .filter(|e| !e.trim().is_empty())
        .or_else(engine_from_executable)
        .map(|e| normalize_engine(&e))
    else {
        eprintln!("Error: no engine given; pass --engine or set DBNEXUS_AGENT_ENGINE");
        return ExitCode::FAILURE;
    };

    let registry = DriverRegistry::in_process(&BuildCapabilities::current());
    let Some(factory) = registry.factory(&engine) else {
        eprintln!(
            "Error: {} is not linked into this driver agent (available: {})",
            engine,
            registry.engines().join(", ")
        );
        return ExitCode::FAILURE;
    };

    tracing::info!(engine = %engine, "driver agent started");
    let mut worker = AgentWorker::new(&engine, factory);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    match worker.serve(stdin, stdout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "driver agent stopped");
            ExitCode::FAILURE
        }
    }
}
