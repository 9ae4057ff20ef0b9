//! blockalloc CLI
//!
//! Replays workload traces against the contiguous and linked allocators and
//! tabulates timings and rejection counts.

use anyhow::{bail, Context};
use blockalloc_rs::experiment::{export_csv, render_table, write_json};
use blockalloc_rs::trace::block_size_from_path;
use blockalloc_rs::{Experiment, Strategy, Trace, VolumeConfig, WorkloadGenerator, WorkloadSpec};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "blockalloc")]
#[command(about = "Compare contiguous and linked block allocation on workload traces")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay traces and report timings and rejections
    Run {
        /// Trace files (`input_<block size>_....txt` names carry their block size)
        #[arg(required = true)]
        traces: Vec<PathBuf>,

        /// Allocation strategy (contiguous, linked, both)
        #[arg(short = 's', long, default_value = "both")]
        strategy: String,

        /// Volume config (TOML); flags below override it
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Bytes per block (default: taken from each trace file name)
        #[arg(short = 'b', long)]
        block_size: Option<u64>,

        /// Blocks per volume
        #[arg(short = 'n', long)]
        block_count: Option<usize>,

        /// Bytes per allocation table entry
        #[arg(long)]
        fat_entry_size: Option<u64>,

        /// Replays per trace and strategy
        #[arg(short = 'r', long, default_value_t = Experiment::DEFAULT_REPETITIONS)]
        repetitions: usize,

        /// Write the reports as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Write time.csv and operations.csv into this directory
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Write a synthetic trace
    Generate {
        /// Output trace file
        #[arg(short = 'o', long)]
        out: PathBuf,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        #[arg(long, default_value_t = 200)]
        creates: usize,

        /// Extend, access and shrink operations
        #[arg(long, default_value_t = 800)]
        operations: usize,

        #[arg(long, default_value_t = 4096)]
        max_length: u64,

        #[arg(long, default_value_t = 8)]
        max_blocks: usize,
    },
}

/// Parse the strategy selection from the CLI string
fn parse_strategies(s: &str) -> Result<Vec<Strategy>, String> {
    match s.to_lowercase().as_str() {
        "both" | "all" => Ok(Strategy::ALL.to_vec()),
        other => other.parse::<Strategy>().map(|strategy| vec![strategy]),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            traces,
            strategy,
            config,
            block_size,
            block_count,
            fat_entry_size,
            repetitions,
            json,
            csv,
        } => {
            let strategies = parse_strategies(&strategy).map_err(anyhow::Error::msg)?;
            let base = match &config {
                Some(path) => Some(
                    VolumeConfig::load(path)
                        .with_context(|| format!("loading config {}", path.display()))?,
                ),
                None => None,
            };

            let mut reports = Vec::new();
            for path in &traces {
                let trace = Trace::open(path)
                    .with_context(|| format!("reading trace {}", path.display()))?;

                let size = match block_size
                    .or_else(|| block_size_from_path(path))
                    .or(base.map(|c| c.block_size))
                {
                    Some(size) => size,
                    None => bail!(
                        "no block size for {}: pass --block-size or name it input_<size>_...",
                        path.display()
                    ),
                };

                let mut volume = base.unwrap_or_else(|| VolumeConfig::new(size));
                volume.block_size = size;
                if let Some(count) = block_count {
                    volume.block_count = count;
                }
                if let Some(entry) = fat_entry_size {
                    volume.fat_entry_size = entry;
                }
                volume.check()?;

                let experiment = Experiment::new(volume).with_repetitions(repetitions);
                reports.extend(experiment.run_all(&strategies, std::slice::from_ref(&trace))?);
            }

            println!("{}", render_table(&reports));

            if let Some(path) = json {
                write_json(&reports, &path)?;
                info!("Wrote {} reports to {:?}", reports.len(), path);
            }
            if let Some(dir) = csv {
                export_csv(&reports, &dir)?;
                info!("Wrote time and operations tables to {:?}", dir);
            }
        }

        Command::Generate {
            out,
            seed,
            creates,
            operations,
            max_length,
            max_blocks,
        } => {
            let spec = WorkloadSpec {
                creates,
                operations,
                max_length,
                max_blocks,
                ..WorkloadSpec::default()
            };
            let name = out
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let trace = WorkloadGenerator::new(seed).generate(name, &spec)?;
            trace.save(&out)?;
            info!("Wrote {} operations to {:?}", trace.len(), out);
        }
    }

    Ok(())
}
