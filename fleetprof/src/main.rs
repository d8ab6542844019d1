//! # fleetprof - Main Entry Point
//!
//! Parses arguments, wires `/proc` discovery, the command-backed sources and
//! the file sink into an `Orchestrator`, and runs cycles until Ctrl+C or the
//! cycle limit.

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use std::sync::Arc;

use fleetprof::cli::Args;
use fleetprof::export::CollapsedFileSink;
use fleetprof::orchestrator::Orchestrator;
use fleetprof::process_lookup::ProcFs;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("invalid configuration") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let config = args.to_config().context("Invalid configuration")?;
    let sampler = args.sampler().context("Invalid configuration: --sampler")?;
    let profilers = args.runtime_profilers().context("Invalid configuration: --profiler")?;
    let sink = CollapsedFileSink::new(&args.output_dir, args.gzip)
        .with_context(|| format!("Failed to create output directory {}", args.output_dir.display()))?;

    if !quiet {
        println!("fleetprof v{}", env!("CARGO_PKG_VERSION"));
        println!(
            "cycle: {}s (min age {}s, grace {}s)",
            config.cycle_duration.as_secs(),
            config.min_duration.as_secs(),
            config.grace_period.as_secs()
        );
        println!("sampler: {}", args.sampler);
        for spec in &args.profilers {
            println!("profiler: {spec}");
        }
        println!("output: {}", args.output_dir.display());
    }

    let mut orchestrator =
        Orchestrator::new(config, Arc::new(ProcFs::new()), Arc::new(sampler)).with_sink(Box::new(sink));
    for profiler in profilers {
        orchestrator = orchestrator.with_profiler(Arc::new(profiler));
    }

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };
    orchestrator.run(args.max_cycles(), ctrl_c).await;

    if !quiet {
        eprintln!("\nstopped: {} cycle(s)", orchestrator.cycles_run());
    }
    Ok(())
}
