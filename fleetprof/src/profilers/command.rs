//! Sources backed by external commands that print collapsed stacks.
//!
//! Command lines are templates split on whitespace (no shell quoting).
//! Placeholders:
//! - `{pid}`: target process (runtime profilers only)
//! - `{duration}`: sampling window in whole seconds
//!
//! Runtime profiler commands print the target's stacks as collapsed lines.
//! The system-wide sampler command prints collapsed lines whose root frame is
//! `comm-pid` or `comm-pid/tid` (the `stackcollapse-perf --pid` layout); the
//! root is rewritten to `comm` and the pid used for attribution.

use log::{debug, warn};
use std::fmt;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{error_marker_for, RawSample, RuntimeProfiler, RuntimeResults, SystemSampler};
use crate::config::DEFAULT_GRACE_PERIOD;
use crate::domain::{ConfigError, Pid, ProfilerError, RuntimeKind};
use crate::stacks::{collapsed, ErrorMarker, Frame, ProcessSampleSet, Stack};

/// Per-pid commands a runtime profiler runs at once.
pub const DEFAULT_MAX_PARALLEL: usize = 32;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A program plus argument templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    /// Split `line` on whitespace into program and arguments.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidProfilerSpec` for an empty command line.
    pub fn parse(line: &str) -> Result<Self, ConfigError> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words.next().ok_or_else(|| ConfigError::InvalidProfilerSpec(line.to_string()))?;
        Ok(Self { program, args: words.collect() })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with placeholders substituted.
    fn render_args(&self, pid: Option<Pid>, duration: Duration) -> Vec<String> {
        let secs = duration.as_secs().max(1).to_string();
        self.args
            .iter()
            .map(|arg| {
                let arg = arg.replace("{duration}", &secs);
                match pid {
                    Some(pid) => arg.replace("{pid}", &pid.0.to_string()),
                    None => arg,
                }
            })
            .collect()
    }

    /// Run for one window and return stdout. The child is killed once
    /// `duration + grace` has passed.
    fn run(&self, pid: Option<Pid>, duration: Duration, grace: Duration) -> Result<String, ProfilerError> {
        let args = self.render_args(pid, duration);
        debug!("Running {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProfilerError::SpawnFailed { command: self.program.clone(), error: e.to_string() })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let limit = duration + grace;
        let Some(status) = wait_until(&mut child, limit)? else {
            // Already-exited children make kill() fail; wait() reaps either way
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProfilerError::Timeout {
                source_name: self.program.clone(),
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            });
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        check_status(&self.program, status, &stderr)?;
        Ok(stdout)
    }
}

/// Read a child pipe to the end on its own thread so the child never
/// blocks on a full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Poll `child` until it exits or `limit` elapses (`Ok(None)`).
fn wait_until(child: &mut Child, limit: Duration) -> Result<Option<ExitStatus>, ProfilerError> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

fn check_status(program: &str, status: ExitStatus, stderr: &str) -> Result<(), ProfilerError> {
    if status.success() {
        return Ok(());
    }
    // The last stderr line is usually the one that names the failure
    let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    Err(ProfilerError::CommandFailed {
        command: program.to_string(),
        status: status.to_string(),
        stderr: last_line.to_string(),
    })
}

/// Runtime profiler that runs one command per pid, in parallel up to a cap.
///
/// Pids beyond the cap are not profiled this cycle; they get an
/// `overloaded` error set so their native stacks stay visible.
#[derive(Debug, Clone)]
pub struct CommandProfiler {
    name: String,
    runtime: RuntimeKind,
    command: CommandSpec,
    grace: Duration,
    max_parallel: usize,
}

impl CommandProfiler {
    pub fn new(runtime: RuntimeKind, command: CommandSpec) -> Self {
        Self {
            name: command.program().to_string(),
            runtime,
            command,
            grace: DEFAULT_GRACE_PERIOD,
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    /// Parse a `RUNTIME=COMMAND` specification, e.g.
    /// `python=py-spy record --pid {pid} --duration {duration} --format raw -o /dev/stdout`.
    ///
    /// # Errors
    /// Returns a `ConfigError` for a missing `=`, unknown runtime, or empty command.
    pub fn from_spec(spec: &str) -> Result<Self, ConfigError> {
        let (runtime, command) =
            spec.split_once('=').ok_or_else(|| ConfigError::InvalidProfilerSpec(spec.to_string()))?;
        let runtime: RuntimeKind =
            runtime.trim().parse().map_err(|_| ConfigError::UnknownRuntime(runtime.to_string()))?;
        Ok(Self::new(runtime, CommandSpec::parse(command)?))
    }

    /// Time a command may run past the window before it is killed.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Maximum commands running at once (at least 1).
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    fn profile_one(&self, pid: Pid, duration: Duration) -> ProcessSampleSet {
        let result = self
            .command
            .run(Some(pid), duration, self.grace)
            .and_then(|stdout| collapsed::parse_collapsed(&stdout));
        match result {
            Ok(profile) => ProcessSampleSet::from_profile(profile),
            Err(e) => {
                warn!("{} failed for {pid}: {e}", self.name);
                ProcessSampleSet::error(error_marker_for(&e))
            }
        }
    }
}

impl RuntimeProfiler for CommandProfiler {
    fn name(&self) -> &str {
        &self.name
    }

    fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    fn profile(&self, pids: &[Pid], duration: Duration) -> Result<RuntimeResults, ProfilerError> {
        let split = pids.len().min(self.max_parallel);
        let (profiled, overflow) = pids.split_at(split);

        let mut results: RuntimeResults = thread::scope(|scope| {
            let handles: Vec<_> = profiled
                .iter()
                .map(|&pid| (pid, scope.spawn(move || self.profile_one(pid, duration))))
                .collect();
            handles
                .into_iter()
                .map(|(pid, handle)| {
                    let set = handle.join().unwrap_or_else(|_| {
                        ProcessSampleSet::error(ErrorMarker::new("panic").with_message(self.name.clone()))
                    });
                    (pid, set)
                })
                .collect()
        });

        if !overflow.is_empty() {
            warn!(
                "{}: {} pid(s) over the limit of {} not profiled this cycle",
                self.name,
                overflow.len(),
                self.max_parallel
            );
            let marker = ErrorMarker::new("overloaded").with_message(format!("limit {}", self.max_parallel));
            results.extend(overflow.iter().map(|&pid| (pid, ProcessSampleSet::error(marker.clone()))));
        }
        Ok(results)
    }
}

/// System-wide sampler backed by one command for the whole host.
#[derive(Debug, Clone)]
pub struct CommandSampler {
    name: String,
    command: CommandSpec,
    grace: Duration,
}

impl CommandSampler {
    pub fn new(command: CommandSpec) -> Self {
        Self { name: command.program().to_string(), command, grace: DEFAULT_GRACE_PERIOD }
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl SystemSampler for CommandSampler {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample(&self, duration: Duration) -> Result<Vec<RawSample>, ProfilerError> {
        let stdout = self.command.run(None, duration, self.grace)?;
        parse_attributed(&stdout)
    }
}

/// Parse collapsed lines whose root frame is `comm-pid[/tid]`.
///
/// Malformed lines and lines whose root frame carries no pid are skipped
/// and counted; one bad line must not discard the rest of the host.
///
/// # Errors
/// Returns the first `ProfilerError::MalformedStack` only when no line at
/// all could be parsed.
pub fn parse_attributed(text: &str) -> Result<Vec<RawSample>, ProfilerError> {
    let mut samples = Vec::new();
    let mut parsed_lines = 0usize;
    let mut unattributed = 0u64;
    let mut malformed = 0usize;
    let mut first_error = None;

    for (i, line) in text.lines().enumerate() {
        let (stack, count) = match collapsed::parse_line(line, i + 1) {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(e) => {
                debug!("Skipping sampler output: {e}");
                malformed += 1;
                if first_error.is_none() {
                    first_error = Some(e);
                }
                continue;
            }
        };
        parsed_lines += 1;
        match split_root(&stack) {
            Some((pid, stack)) => samples.push(RawSample { pid, stack, count }),
            None => unattributed += count,
        }
    }

    if let Some(e) = first_error {
        if parsed_lines == 0 {
            return Err(e);
        }
        warn!("Skipped {malformed} malformed system-wide sample line(s)");
    }
    if unattributed > 0 {
        debug!("Dropped {unattributed} system-wide samples without a pid");
    }
    Ok(samples)
}

/// Strip `-pid[/tid]` from the root frame, returning the pid and the stack
/// rooted at the bare command name.
fn split_root(stack: &Stack) -> Option<(Pid, Stack)> {
    let (root, rest) = stack.leaf_first().split_last()?;
    let Frame::Symbol(label) = root else {
        return None;
    };
    let (command, ids) = label.rsplit_once('-')?;
    let pid_part = ids.split_once('/').map_or(ids, |(pid, _tid)| pid);
    let pid: u32 = pid_part.parse().ok()?;

    let mut frames = rest.to_vec();
    frames.push(Frame::symbol(command));
    Some((Pid(pid), Stack::from_leaf_first(frames)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_parse_and_render() {
        let spec = CommandSpec::parse("py-spy record --pid {pid} --duration {duration}").unwrap();
        assert_eq!(spec.program(), "py-spy");
        assert_eq!(
            spec.render_args(Some(Pid(42)), Duration::from_secs(60)),
            vec!["record", "--pid", "42", "--duration", "60"]
        );
        assert_eq!(spec.to_string(), "py-spy record --pid {pid} --duration {duration}");
        assert!(CommandSpec::parse("   ").is_err());
    }

    #[test]
    fn test_sub_second_duration_rounds_up_to_one() {
        let spec = CommandSpec::parse("perf {duration}").unwrap();
        assert_eq!(spec.render_args(None, Duration::from_millis(10)), vec!["1"]);
    }

    #[test]
    fn test_profiler_from_spec() {
        let profiler = CommandProfiler::from_spec("java=asprof -d {duration} {pid}").unwrap();
        assert_eq!(profiler.runtime(), RuntimeKind::Java);
        assert_eq!(profiler.name(), "asprof");
        assert!(matches!(
            CommandProfiler::from_spec("no-equals-sign"),
            Err(ConfigError::InvalidProfilerSpec(_))
        ));
        assert!(matches!(
            CommandProfiler::from_spec("cobol=prof"),
            Err(ConfigError::UnknownRuntime(_))
        ));
    }

    #[test]
    fn test_parse_attributed() {
        let text = "python3-100/101;_start;main 5\njava-200;Main.run 3\nswapper;idle 9\n";
        let samples = parse_attributed(text).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].pid, Pid(100));
        assert_eq!(samples[0].stack, Stack::from_symbols(&["python3", "_start", "main"]));
        assert_eq!(samples[0].count, 5);
        assert_eq!(samples[1].pid, Pid(200));
        assert_eq!(samples[1].stack.to_string(), "java;Main.run");
    }

    #[test]
    fn test_parse_attributed_keeps_dashes_in_command() {
        let samples = parse_attributed("php-fpm-300;zend_execute 2\n").unwrap();
        assert_eq!(samples[0].pid, Pid(300));
        assert_eq!(samples[0].stack.to_string(), "php-fpm;zend_execute");
    }

    #[test]
    fn test_error_marker_for_failures() {
        let err = ProfilerError::CommandFailed {
            command: "py-spy".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "Error: No such process".to_string(),
        };
        let marker = error_marker_for(&err);
        assert_eq!(marker.kind(), "exit");
        assert_eq!(marker.message(), Some("exit status: 1: Error: No such process"));

        let spawn = ProfilerError::SpawnFailed { command: "x".into(), error: "not found".into() };
        assert_eq!(error_marker_for(&spawn).kind(), "spawn");
    }

    #[test]
    fn test_missing_program_yields_error_sets() {
        let profiler = CommandProfiler::new(
            RuntimeKind::Python,
            CommandSpec::parse("/nonexistent/fleetprof-test-profiler {pid}").unwrap(),
        );
        let results = profiler.profile(&[Pid(1), Pid(2)], Duration::from_secs(1)).unwrap();
        assert_eq!(results.len(), 2);
        for set in results.values() {
            assert!(set.is_error());
            assert_eq!(set.primary_error().map(ErrorMarker::kind), Some("spawn"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_command_is_parsed() {
        let profiler = CommandProfiler::new(
            RuntimeKind::Python,
            CommandSpec::parse("echo main;work_{pid} 7").unwrap(),
        );
        let results = profiler.profile(&[Pid(9)], Duration::from_secs(1)).unwrap();
        let set = &results[&Pid(9)];
        assert!(!set.is_error());
        assert_eq!(set.profile().get(&Stack::from_symbols(&["main", "work_9"])), 7);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_becomes_exit_marker() {
        let profiler =
            CommandProfiler::new(RuntimeKind::Ruby, CommandSpec::parse("false {pid}").unwrap());
        let results = profiler.profile(&[Pid(3)], Duration::from_secs(1)).unwrap();
        assert_eq!(results[&Pid(3)].primary_error().map(ErrorMarker::kind), Some("exit"));
    }

    #[test]
    fn test_parse_attributed_skips_malformed_lines() {
        let text = "python3-100;main 500\nnginx-200;epoll_wait 70\nweird-300;frame_without_count\n";
        let samples = parse_attributed(text).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples.iter().map(|s| s.count).sum::<u64>(), 570);
        assert_eq!(samples[1].pid, Pid(200));
    }

    #[test]
    fn test_parse_attributed_fails_when_nothing_parses() {
        assert!(matches!(
            parse_attributed("garbage\nmore garbage\n"),
            Err(ProfilerError::MalformedStack { line: 1, .. })
        ));
        assert!(parse_attributed("").unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_command_is_killed_at_deadline() {
        let profiler = CommandProfiler::new(RuntimeKind::Python, CommandSpec::parse("sleep 7.{pid}").unwrap())
            .with_grace(Duration::from_millis(50));

        let start = Instant::now();
        let results = profiler.profile(&[Pid(4242)], Duration::from_millis(10)).unwrap();

        // wait() after kill() reaps the child, so returning early means it is gone
        assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
        let set = &results[&Pid(4242)];
        assert_eq!(set.primary_error().map(ErrorMarker::kind), Some("timeout"));
        assert_eq!(set.primary_error().and_then(ErrorMarker::message), Some("60ms"));
    }

    #[cfg(unix)]
    #[test]
    fn test_sampler_command_is_killed_at_deadline() {
        let sampler = CommandSampler::new(CommandSpec::parse("sleep 7").unwrap()).with_grace(Duration::ZERO);
        let start = Instant::now();
        let err = sampler.sample(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, ProfilerError::Timeout { timeout_ms: 30, .. }));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_pids_over_limit_are_marked_overloaded() {
        let profiler = CommandProfiler::new(RuntimeKind::Node, CommandSpec::parse("echo main 1").unwrap())
            .with_max_parallel(2);
        let pids = [Pid(1), Pid(2), Pid(3), Pid(4)];
        let results = profiler.profile(&pids, Duration::from_secs(1)).unwrap();

        assert_eq!(results.len(), 4);
        assert!(!results[&Pid(1)].is_error());
        assert!(!results[&Pid(2)].is_error());
        for pid in [Pid(3), Pid(4)] {
            assert_eq!(results[&pid].primary_error().map(ErrorMarker::kind), Some("overloaded"));
        }
    }
}
