//! Thin command-line front-end over [`rustyreplay_core`]. Carries no
//! algorithmic content of its own: it parses arguments, builds a
//! [`ScenarioConfig`]/[`LinkerConfig`], and calls straight into the core.

use clap::{Parser, Subcommand};
use rustyreplay_core::{load_scenario_config, scanner, Linker, LinkerConfig, LogEntry, ScenarioRunner, TransportRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "rustyreplay", version, about = "FIX log replay and comparison harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an offline scenario: diff expected vs. actual logs under a
    /// scenario config file and print the resulting diff report as JSON.
    Offline {
        /// Path to a JSON scenario config file.
        #[arg(long)]
        scenario: PathBuf,
    },
    /// Scan a single in-file/out-file pair and print the linker's
    /// discovered pairing report as JSON, without running a full scenario.
    Link {
        /// Path to the "in" (sent) log file.
        #[arg(long)]
        input: PathBuf,
        /// Path to the "out" (expected/received) log file.
        #[arg(long)]
        output: PathBuf,
    },
}

fn scan_entries(path: &PathBuf) -> anyhow::Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    for (idx, raw) in scanner::scan(path, scanner::ScanConfig::default())?.enumerate() {
        let raw = raw?;
        entries.push(LogEntry {
            line_number: (idx + 1) as u64,
            message: rustyreplay_core::parser::parse(&raw.payload),
        });
    }
    Ok(entries)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Offline { scenario } => {
            let config = load_scenario_config(&scenario)?;
            let runner = Arc::new(ScenarioRunner::new(TransportRegistry::new()));
            let job = runner.submit_offline(config);
            loop {
                let snapshot = job.snapshot();
                match snapshot.status {
                    rustyreplay_core::JobStatus::Running => {
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        continue;
                    }
                    rustyreplay_core::JobStatus::Succeeded => {
                        println!("{}", serde_json::to_string_pretty(&snapshot.result)?);
                        return Ok(());
                    }
                    rustyreplay_core::JobStatus::Failed => {
                        anyhow::bail!(snapshot.error.unwrap_or_else(|| "unknown failure".to_string()));
                    }
                }
            }
        }
        Command::Link { input, output } => {
            let ins = scan_entries(&input)?;
            let outs = scan_entries(&output)?;
            let report = Linker::discover(&LinkerConfig::default(), &ins, &outs);
            println!("{}", report.to_json()?);
            Ok(())
        }
    }
}
