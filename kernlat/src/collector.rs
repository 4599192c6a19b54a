//! The collector driver: one bounded measurement run, start to finish.
//!
//! Phases run strictly in order: attach, timed wait, detach, read,
//! summarize, write. Detach always runs before the read so no shard can
//! be incremented while the table is being snapshotted. The wait is the
//! only suspension point and is not cancellable; the window length is a
//! measurement parameter, not an interactive control.

use std::fmt;
use std::time::Duration;

use aya::Ebpf;
use log::info;
use thiserror::Error;

use crate::artifact::{self, OutputPaths, WriteError};
use crate::histogram::{self, CounterTable, Histogram, ReadError};
use crate::session::{AttachError, Session};
use crate::summary::SummaryRecord;
use crate::tools::Tool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("collection duration must be positive")]
    ZeroDuration,
}

/// One run's failure, tagged by the phase that aborted it.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("attach phase: {0}")]
    Attach(#[from] AttachError),
    #[error("read phase: {0}")]
    Read(#[from] ReadError),
    #[error("write phase: {0}")]
    Write(#[from] WriteError),
}

impl CollectError {
    pub fn phase(&self) -> &'static str {
        match self {
            CollectError::Config(_) => "configuration",
            CollectError::Attach(_) => "attach",
            CollectError::Read(_) => "read",
            CollectError::Write(_) => "write",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub duration: Duration,
    /// Output path stem; `None` (or empty) disables artifact writing.
    pub out: Option<String>,
    pub tail_threshold_us: u64,
    /// Zero the counter table before attaching, so the histogram covers
    /// exactly this window rather than accumulating across runs.
    pub reset_counters: bool,
}

impl fmt::Display for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "duration={}, out={:?}",
            humantime::format_duration(self.duration),
            self.out.as_deref().unwrap_or("")
        )
    }
}

/// Everything a successful run produced.
pub struct RunReport {
    pub histogram: Histogram,
    pub summary: SummaryRecord,
    pub paths: Option<OutputPaths>,
}

/// Run one collection window for `tool` and return the report, or the
/// first fatal error with its phase.
pub async fn run(bpf: &mut Ebpf, tool: &Tool, opts: &RunOptions) -> Result<RunReport, CollectError> {
    if opts.duration.is_zero() {
        return Err(ConfigError::ZeroDuration.into());
    }
    let paths = opts.out.as_deref().and_then(OutputPaths::from_stem);

    if opts.reset_counters {
        histogram::reset(bpf, tool.hist_map, tool.slots)?;
    }

    let session = Session::open(bpf, tool.hooks)?;
    info!(
        "[{}] attached {} hooks; collecting for {}",
        tool.name,
        session.active_hooks(),
        humantime::format_duration(opts.duration)
    );

    tokio::time::sleep(opts.duration).await;

    // Quiescence point: after this no kernel-side writer is live, so the
    // read below observes a stable table.
    session.close();

    let table = CounterTable::open(bpf, tool.hist_map, tool.slots)?;
    let histogram = table.read()?;

    let mut stdout = std::io::stdout().lock();
    let _ = histogram.write_table(&mut stdout);
    drop(stdout);

    let summary = SummaryRecord::build(tool, opts.duration, &histogram, opts.tail_threshold_us);

    if let Some(paths) = &paths {
        artifact::write_histogram(&paths.histogram, &histogram)?;
        artifact::write_summary(&paths.summary, &summary)?;
        info!(
            "[{}] saved: {} (+ {})",
            tool.name,
            paths.histogram.display(),
            paths.summary.display()
        );
    }

    Ok(RunReport {
        histogram,
        summary,
        paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_is_a_configuration_error() {
        let opts = RunOptions {
            duration: Duration::ZERO,
            out: None,
            tail_threshold_us: 8,
            reset_counters: true,
        };
        assert!(opts.duration.is_zero());

        let err = CollectError::from(ConfigError::ZeroDuration);
        assert_eq!(err.phase(), "configuration");
        assert!(err.to_string().contains("positive"));
    }

    #[test]
    fn errors_name_their_phase() {
        let read = CollectError::from(ReadError::MapNotFound("IOLAT_HIST".into()));
        assert_eq!(read.phase(), "read");

        let attach = CollectError::from(AttachError::TracepointMissing {
            category: "block".into(),
            name: "block_rq_issue".into(),
        });
        assert_eq!(attach.phase(), "attach");
        assert!(attach.to_string().starts_with("attach phase"));
    }
}
