//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::CycleConfig;
use crate::domain::ConfigError;
use crate::profilers::command::DEFAULT_MAX_PARALLEL;
use crate::profilers::{CommandProfiler, CommandSampler, CommandSpec};

#[derive(Parser, Debug)]
#[command(
    name = "fleetprof",
    about = "Continuously merge runtime-level and system-wide CPU profiles",
    after_help = "\
COMMANDS:
    Command lines are split on whitespace. {pid} and {duration} (seconds)
    are substituted before each run. Output must be collapsed stacks.

EXAMPLES:
    fleetprof --sampler 'perf-collapse {duration}' \\
              --profiler 'python=py-spy record -r 100 -d {duration} -p {pid} -f raw -o /dev/stdout'
    fleetprof --sampler 'perf-collapse {duration}' --once --gzip -o /tmp/profiles"
)]
pub struct Args {
    /// System-wide sampler command (root frame of each line is comm-pid)
    #[arg(long, value_name = "COMMAND")]
    pub sampler: String,

    /// Runtime profiler as RUNTIME=COMMAND (repeatable; runtimes: python, java, ruby, node, php, dotnet)
    #[arg(short, long = "profiler", value_name = "RUNTIME=COMMAND")]
    pub profilers: Vec<String>,

    /// Length of each sampling window in seconds
    #[arg(short = 'd', long, default_value = "60", value_name = "SECS")]
    pub cycle_duration: u64,

    /// Skip runtime profiling for processes younger than this (seconds)
    #[arg(long, default_value = "10", value_name = "SECS")]
    pub min_duration: u64,

    /// Extra seconds a profiler may run past the window before it is abandoned
    #[arg(long, default_value = "5", value_name = "SECS")]
    pub grace: u64,

    /// Most profiler commands one runtime may run at once; extra pids are skipped for the cycle
    #[arg(long, default_value_t = DEFAULT_MAX_PARALLEL, value_name = "N")]
    pub max_parallel: usize,

    /// Directory for per-cycle profile files
    #[arg(short, long, default_value = "profiles", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Gzip-compress profile files
    #[arg(long)]
    pub gzip: bool,

    /// Stop after N cycles (0 = unlimited)
    #[arg(long, default_value = "0", value_name = "N")]
    pub cycles: u64,

    /// Run a single cycle and exit
    #[arg(long, conflicts_with = "cycles")]
    pub once: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// # Errors
    /// Returns `ConfigError::ZeroCycleDuration` for `--cycle-duration 0`.
    pub fn to_config(&self) -> Result<CycleConfig, ConfigError> {
        CycleConfig::new(
            Duration::from_secs(self.min_duration),
            Duration::from_secs(self.cycle_duration),
            Duration::from_secs(self.grace),
        )
    }

    pub fn max_cycles(&self) -> Option<u64> {
        if self.once {
            Some(1)
        } else if self.cycles > 0 {
            Some(self.cycles)
        } else {
            None
        }
    }

    /// # Errors
    /// Returns a `ConfigError` for an empty sampler command.
    pub fn sampler(&self) -> Result<CommandSampler, ConfigError> {
        let sampler = CommandSampler::new(CommandSpec::parse(&self.sampler)?);
        Ok(sampler.with_grace(Duration::from_secs(self.grace)))
    }

    /// # Errors
    /// Returns a `ConfigError` for the first malformed `--profiler` value.
    pub fn runtime_profilers(&self) -> Result<Vec<CommandProfiler>, ConfigError> {
        let grace = Duration::from_secs(self.grace);
        self.profilers
            .iter()
            .map(|spec| {
                CommandProfiler::from_spec(spec)
                    .map(|p| p.with_grace(grace).with_max_parallel(self.max_parallel))
            })
            .collect()
    }
}
