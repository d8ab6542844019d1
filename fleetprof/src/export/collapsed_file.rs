//! Collapsed profile files, one per cycle.
//!
//! Layout:
//!
//! ```text
//! # {"cycle":3,"start_time":1760000000.0,...,"processes":[...]}
//! python3;main;handle 200
//! java;Main.run;[error:timeout: 65000ms] 40
//! ```
//!
//! The first line is a JSON metadata header; the rest is the cycle's
//! aggregate in collapsed format. Files are written to a temporary name and
//! renamed, so a reader never sees a partial profile.

use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{CycleMetadata, ProfileSink};
use crate::config::CycleConfig;
use crate::domain::{ExportError, Pid, RuntimeKind};
use crate::merge::{MergeOutcome, MergedProfile};
use crate::stacks::write_collapsed;

#[derive(Debug, Serialize)]
struct FileHeader<'a> {
    cycle: u64,
    /// Seconds since the Unix epoch when the cycle's window opened.
    start_time: f64,
    config: &'a CycleConfig,
    total_samples: u64,
    processes: Vec<ProcessHeader<'a>>,
}

#[derive(Debug, Serialize)]
struct ProcessHeader<'a> {
    pid: Pid,
    command: Option<&'a str>,
    runtime: Option<RuntimeKind>,
    outcome: MergeOutcome,
    samples: u64,
    runtime_total: u64,
    system_total: u64,
}

/// Writes each cycle to `<dir>/profile_<cycle>.col[.gz]`.
#[derive(Debug)]
pub struct CollapsedFileSink {
    dir: PathBuf,
    gzip: bool,
}

impl CollapsedFileSink {
    /// # Errors
    /// Returns an error if the output directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>, gzip: bool) -> Result<Self, ExportError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, gzip })
    }

    pub fn path_for(&self, cycle: u64) -> PathBuf {
        let ext = if self.gzip { "col.gz" } else { "col" };
        self.dir.join(format!("profile_{cycle:06}.{ext}"))
    }

    fn write_to<W: Write>(
        &self,
        mut writer: W,
        meta: &CycleMetadata,
        merged: &MergedProfile,
    ) -> Result<(), ExportError> {
        let header = FileHeader {
            cycle: meta.cycle,
            start_time: meta.start_unix_secs(),
            config: &meta.config,
            total_samples: merged.total(),
            processes: merged
                .processes
                .iter()
                .map(|(&pid, p)| ProcessHeader {
                    pid,
                    command: p.command.as_deref(),
                    runtime: p.runtime,
                    outcome: p.outcome,
                    samples: p.profile.total(),
                    runtime_total: p.runtime_total,
                    system_total: p.system_total,
                })
                .collect(),
        };
        let json = serde_json::to_string(&header)?;
        writeln!(writer, "# {json}")?;
        write_collapsed(&merged.aggregate, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Gzip variant of `write_to`. Returns the inner writer after the
    /// trailer has been written and flushed.
    fn write_compressed<W: Write>(
        &self,
        writer: W,
        meta: &CycleMetadata,
        merged: &MergedProfile,
    ) -> Result<W, ExportError> {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        self.write_to(&mut encoder, meta, merged)?;
        let mut inner = encoder.finish()?;
        inner.flush()?;
        Ok(inner)
    }
}

impl ProfileSink for CollapsedFileSink {
    fn emit(&mut self, meta: &CycleMetadata, merged: &MergedProfile) -> Result<(), ExportError> {
        let path = self.path_for(meta.cycle);
        let tmp = path.with_extension("tmp");

        let file = File::create(&tmp)
            .map_err(|e| ExportError::WriteFailed(format!("{}: {e}", tmp.display())))?;
        let writer = BufWriter::new(file);
        let result = if self.gzip {
            self.write_compressed(writer, meta, merged).map(drop)
        } else {
            self.write_to(writer, meta, merged)
        };
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, &path)?;
        info!("saved: {} ({} samples)", display_name(&path), merged.total());
        Ok(())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::{ProcessSampleSet, Stack};
    use std::collections::BTreeMap;
    use std::time::SystemTime;

    fn merged() -> MergedProfile {
        let mut runtime = BTreeMap::new();
        runtime.insert(
            Pid(7),
            ProcessSampleSet::from_profile(
                [(Stack::from_symbols(&["python3", "main"]), 4)].into_iter().collect(),
            ),
        );
        let mut merged = MergedProfile::build(&runtime, &Default::default());
        merged.label(Pid(7), "python3", Some(RuntimeKind::Python));
        merged
    }

    fn meta(cycle: u64) -> CycleMetadata {
        CycleMetadata { cycle, started_at: SystemTime::UNIX_EPOCH, config: CycleConfig::default() }
    }

    #[test]
    fn test_writes_header_and_stacks() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CollapsedFileSink::new(dir.path(), false).unwrap();
        sink.emit(&meta(3), &merged()).unwrap();

        let content = fs::read_to_string(dir.path().join("profile_000003.col")).unwrap();
        let mut lines = content.lines();
        let header: serde_json::Value =
            serde_json::from_str(lines.next().unwrap().strip_prefix("# ").unwrap()).unwrap();
        assert_eq!(header["cycle"], 3);
        assert_eq!(header["total_samples"], 4);
        assert_eq!(header["processes"][0]["pid"], 7);
        assert_eq!(header["processes"][0]["runtime"], "python");
        assert_eq!(header["processes"][0]["outcome"], "unscaled");
        assert_eq!(lines.next(), Some("python3;main 4"));
        assert_eq!(lines.next(), None);
        assert!(!dir.path().join("profile_000003.tmp").exists());
    }

    #[test]
    fn test_gzip_output_decompresses() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let mut sink = CollapsedFileSink::new(dir.path(), true).unwrap();
        sink.emit(&meta(1), &merged()).unwrap();

        let path = sink.path_for(1);
        assert!(path.to_string_lossy().ends_with("profile_000001.col.gz"));
        let mut content = String::new();
        GzDecoder::new(File::open(path).unwrap()).read_to_string(&mut content).unwrap();
        assert!(content.starts_with("# {"));
        assert!(content.ends_with("python3;main 4\n"));
    }

    /// Accepts `capacity` bytes, then fails like a full disk.
    struct LimitedDisk {
        capacity: usize,
        data: Vec<u8>,
    }

    impl Write for LimitedDisk {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let room = self.capacity - self.data.len();
            if room == 0 && !buf.is_empty() {
                return Err(std::io::Error::other("No space left on device"));
            }
            let n = room.min(buf.len());
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_gzip_write_failure_is_reported() {
        let sink = CollapsedFileSink { dir: PathBuf::new(), gzip: true };
        let (meta, merged) = (meta(2), merged());
        let full = sink.write_compressed(Vec::new(), &meta, &merged).unwrap().len();

        // Buffered like the real file, so the trailer only reaches the disk on flush
        for capacity in [0, full / 2, full - 1] {
            let disk = BufWriter::new(LimitedDisk { capacity, data: Vec::new() });
            assert!(
                sink.write_compressed(disk, &meta, &merged).is_err(),
                "capacity {capacity} of {full} accepted"
            );
        }
        let disk = BufWriter::new(LimitedDisk { capacity: full, data: Vec::new() });
        let written = sink.write_compressed(disk, &meta, &merged).unwrap();
        assert_eq!(written.get_ref().data.len(), full);
    }
}
