//! On-disk artifact pair: the raw histogram as CSV rows and the derived
//! summary as a JSON document.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use kernlat_common::bucket_range_us;
use thiserror::Error;

use crate::histogram::Histogram;
use crate::summary::SummaryRecord;

const DATA_EXTENSION: &str = ".csv";
const SUMMARY_SUFFIX: &str = ".summary.json";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode summary for `{path}`: {source}")]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The two output locations derived from one user-supplied stem. Both
/// always share the stem; only the suffix differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub histogram: PathBuf,
    pub summary: PathBuf,
}

impl OutputPaths {
    /// Derive both paths from a stem. A stem already carrying the data
    /// extension is reused verbatim rather than doubled. An empty stem
    /// means no output was requested.
    pub fn from_stem(stem: &str) -> Option<Self> {
        if stem.is_empty() {
            return None;
        }
        let base = stem.strip_suffix(DATA_EXTENSION).unwrap_or(stem);
        Some(Self {
            histogram: PathBuf::from(format!("{base}{DATA_EXTENSION}")),
            summary: PathBuf::from(format!("{base}{SUMMARY_SUFFIX}")),
        })
    }
}

/// Write the histogram as `bucket,lo_us,hi_us,count` rows, one per
/// bucket in ascending index order. Overwrites any existing file.
pub fn write_histogram(path: &Path, histogram: &Histogram) -> Result<(), WriteError> {
    let io_err = |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    create_parent_dirs(path)?;
    let mut file = BufWriter::new(File::create(path).map_err(io_err)?);

    writeln!(file, "bucket,lo_us,hi_us,count").map_err(io_err)?;
    for (i, count) in histogram.counts().iter().enumerate() {
        let (lo, hi) = bucket_range_us(i as u32);
        writeln!(file, "{i},{lo},{hi},{count}").map_err(io_err)?;
    }
    file.flush().map_err(io_err)
}

/// Write the summary as a pretty-printed JSON document. Overwrites any
/// existing file.
pub fn write_summary(path: &Path, record: &SummaryRecord) -> Result<(), WriteError> {
    create_parent_dirs(path)?;
    let body = serde_json::to_vec_pretty(record).map_err(|source| WriteError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, body).map_err(|source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn create_parent_dirs(path: &Path) -> Result<(), WriteError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| WriteError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{summary::SummaryRecord, tools};
    use std::time::Duration;

    #[test]
    fn stem_without_extension_gains_one() {
        let paths = OutputPaths::from_stem("results/run1").unwrap();
        assert_eq!(paths.histogram, PathBuf::from("results/run1.csv"));
        assert_eq!(paths.summary, PathBuf::from("results/run1.summary.json"));
    }

    #[test]
    fn stem_with_extension_is_not_doubled() {
        let paths = OutputPaths::from_stem("results/run1.csv").unwrap();
        assert_eq!(paths.histogram, PathBuf::from("results/run1.csv"));
        assert_eq!(paths.summary, PathBuf::from("results/run1.summary.json"));
    }

    #[test]
    fn empty_stem_requests_no_output() {
        assert_eq!(OutputPaths::from_stem(""), None);
    }

    #[test]
    fn histogram_round_trips_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut counts = vec![0u64; 26];
        counts[0] = 5;
        counts[2] = 3;
        counts[25] = 1;
        let histogram = Histogram::from_counts(counts.clone());

        write_histogram(&path, &histogram).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("bucket,lo_us,hi_us,count"));

        let mut parsed = Vec::new();
        for (i, line) in lines.enumerate() {
            let fields: Vec<u64> = line.split(',').map(|f| f.parse().unwrap()).collect();
            assert_eq!(fields[0], i as u64);
            assert_eq!(fields[1], 1 << i);
            assert_eq!(fields[2], 1 << (i + 1));
            parsed.push(fields[3]);
        }

        assert_eq!(parsed, counts);
        assert_eq!(parsed.iter().sum::<u64>(), histogram.total());
    }

    #[test]
    fn writers_create_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = OutputPaths::from_stem(
            dir.path().join("nested/deeper/run").to_str().unwrap(),
        )
        .unwrap();

        let histogram = Histogram::from_counts(vec![1; 26]);
        let record = SummaryRecord::build(&tools::IOLAT, Duration::from_secs(2), &histogram, 8);

        write_histogram(&paths.histogram, &histogram).unwrap();
        write_summary(&paths.summary, &record).unwrap();

        assert!(paths.histogram.is_file());
        assert!(paths.summary.is_file());
    }

    #[test]
    fn summary_document_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.summary.json");

        let mut counts = vec![0u64; 64];
        counts[3] = 7;
        let histogram = Histogram::from_counts(counts);
        let record =
            SummaryRecord::build(&tools::RUNQLAT, Duration::from_secs(10), &histogram, 8);

        write_summary(&path, &record).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["tool"], "runqlat");
        assert_eq!(doc["metric"], "runqueue_wait_latency");
        assert_eq!(doc["unit"], "microseconds");
        assert_eq!(doc["duration_sec"], 10.0);
        assert_eq!(doc["total_events"], 7);
        assert_eq!(doc["tail_threshold_us"], 8);
        assert_eq!(doc["tail_events"], 7);
        assert_eq!(doc["max_bucket"], 3);
        assert!(doc["generated_at"].is_string());
    }

    #[test]
    fn write_error_names_the_offending_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should go forces a creation error.
        let path = dir.path().join("occupied");
        std::fs::create_dir(&path).unwrap();

        let histogram = Histogram::from_counts(vec![0; 26]);
        let err = write_histogram(&path, &histogram).unwrap_err();
        assert!(err.to_string().contains("occupied"));
    }
}
