//! # fleetprof - Continuous Multi-Source CPU Profiling Agent
//!
//! fleetprof runs fixed-length sampling cycles over every process on a host.
//! Each cycle combines two views of the same CPU time:
//!
//! - a **system-wide sampler** that sees native/kernel stacks for every pid and
//!   is the trusted measure of *how much* CPU each process used
//! - **runtime profilers** (Python, Java, Ruby, ...) that see interpreter-level
//!   stacks for their own processes and describe *where* the time went
//!
//! The merge step reweights runtime stacks by the system-wide total, keeps
//! runtime data when the system-wide sampler fails, and annotates native
//! stacks with the runtime profiler's error when the runtime view fails.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      /proc (process table)                      │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ pid, comm, runtime, start time
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Cycle Orchestrator (tokio)                    │
//! │                                                                 │
//! │  ┌──────────────┐   eligible pids by runtime                    │
//! │  │  Age Gate    │──────────────┐                                │
//! │  └──────────────┘              ▼                                │
//! │                  ┌──────────────────────────┐                   │
//! │                  │ Runtime profilers (N)    │──┐                │
//! │                  └──────────────────────────┘  │ per-pid sets   │
//! │                  ┌──────────────────────────┐  ▼                │
//! │                  │ System-wide sampler      │─▶┌────────────┐   │
//! │                  └──────────────────────────┘  │   Merge    │   │
//! │                                                └─────┬──────┘   │
//! │                                                      ▼          │
//! │                                              ┌──────────────┐   │
//! │                                              │ Profile sink │   │
//! │                                              └──────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`stacks`]: frames, stacks, profiles and the collapsed text format
//!   - error markers are a frame variant so failed processes stay visible in
//!     flame graphs
//! - [`process_lookup`]: `/proc` discovery and runtime classification
//! - [`scheduling`]: age gate and per-runtime partitioning of eligible pids
//! - [`profilers`]: source traits plus command-backed implementations
//! - [`merge`]: the per-process decision table and the cycle aggregate
//! - [`orchestrator`]: the cycle state machine, timeouts and statistics
//! - [`export`]: per-cycle collapsed files with a JSON header
//! - [`config`], [`cli`]: cycle timing and command-line parsing
//! - [`domain`]: core types (`Pid`, `Timestamp`, `RuntimeKind`) and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # Python processes via py-spy, everything else via perf
//! sudo fleetprof --sampler 'perf-collapse {duration}' \
//!     --profiler 'python=py-spy record -d {duration} -p {pid} -f raw -o /dev/stdout'
//!
//! # One 30 s cycle, compressed output
//! sudo fleetprof --sampler 'perf-collapse {duration}' -d 30 --once --gzip
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod merge;
pub mod orchestrator;
pub mod process_lookup;
pub mod profilers;
pub mod scheduling;
pub mod stacks;
