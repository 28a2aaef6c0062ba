//! CLI entrypoint for the heapscope stress harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use heapscope::config::{REGISTRY_CAPACITY_ENV, RELEASE_ORDER_ENV};
use heapscope_harness::{StressConfig, TagCycleConfig, WorkloadReport, run_stress, run_tag_cycle};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};

/// Stress and verification tooling for heapscope.
#[derive(Debug, Parser)]
#[command(name = "heapscope-harness")]
#[command(about = "Drives heapscope from many threads and checks destructor accounting")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scope-mode stress: random nesting, rescues, frames abandoned at exit.
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 1_000)]
        cycles: usize,
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
        #[arg(long, default_value_t = 6)]
        max_depth: usize,
        #[arg(long, default_value_t = 4)]
        max_records: usize,
        /// Chance (0-100) that a nested frame rescues its result.
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u8).range(0..=100))]
        rescue_percent: u8,
        /// Pop every frame before workers exit.
        #[arg(long)]
        no_abandon: bool,
        /// Write the JSON report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Tag-mode work cycles against a shared registry.
    TagCycle {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 1_000)]
        cycles: usize,
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
        /// Values tagged per cycle.
        #[arg(long, default_value_t = 8)]
        per_cycle: usize,
        /// Write the JSON report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Serialize)]
struct ConfigReport {
    release_order_env: &'static str,
    registry_capacity_env: &'static str,
    effective: heapscope::LifecycleConfig,
}

fn parse_seed(raw: &str) -> Result<u64, String> {
    let cleaned = raw.trim().replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse::<u64>(),
    };
    parsed.map_err(|err| format!("invalid seed {raw:?}: {err}"))
}

fn emit(
    report: &WorkloadReport,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = report.to_json()?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, json)?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    report.verify()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Stress {
            threads,
            cycles,
            seed,
            max_depth,
            max_records,
            rescue_percent,
            no_abandon,
            output,
        } => {
            let cfg = StressConfig {
                threads,
                cycles,
                seed: parse_seed(&seed)?,
                max_depth,
                max_records,
                rescue_percent,
                abandon: !no_abandon,
            };
            let report = run_stress(&cfg)?;
            emit(&report, output)?;
        }
        Command::TagCycle {
            threads,
            cycles,
            seed,
            per_cycle,
            output,
        } => {
            let cfg = TagCycleConfig {
                threads,
                cycles,
                seed: parse_seed(&seed)?,
                per_cycle,
            };
            let report = run_tag_cycle(&cfg)?;
            emit(&report, output)?;
        }
        Command::Config => {
            let report = ConfigReport {
                release_order_env: RELEASE_ORDER_ENV,
                registry_capacity_env: REGISTRY_CAPACITY_ENV,
                effective: *heapscope::config(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    let teardown = heapscope::shutdown();
    tracing::debug!(?teardown, "teardown complete");
    Ok(())
}
