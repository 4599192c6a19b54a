//! Tail-latency statistics derived from a reduced histogram.

use std::time::Duration;

use kernlat_common::first_bucket_at_or_above;
use serde::Serialize;

use crate::histogram::Histogram;
use crate::tools::Tool;

/// Bucket semantics, embedded in every summary so the artifact is
/// self-describing.
pub const BUCKET_NOTE: &str = "bucket i means [2^i, 2^(i+1)) microseconds";

/// Count of samples in buckets whose low bound is at or above
/// `threshold_us`. Zero when the threshold clears every bucket.
pub fn tail_events(histogram: &Histogram, threshold_us: u64) -> u64 {
    let start = first_bucket_at_or_above(threshold_us, histogram.slots());
    histogram.counts()[start as usize..].iter().sum()
}

/// Highest bucket with a non-zero count, or `None` for an all-zero
/// histogram.
pub fn max_bucket(histogram: &Histogram) -> Option<u32> {
    histogram
        .counts()
        .iter()
        .rposition(|&count| count > 0)
        .map(|i| i as u32)
}

/// One run's derived record. Built once after the histogram is read,
/// never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRecord {
    pub tool: &'static str,
    pub metric: &'static str,
    pub unit: &'static str,
    pub duration_sec: f64,
    pub total_events: u64,
    pub tail_threshold_us: u64,
    pub tail_events: u64,
    pub max_bucket: Option<u32>,
    pub notes: &'static str,
    pub generated_at: String,
}

impl SummaryRecord {
    pub fn build(
        tool: &Tool,
        duration: Duration,
        histogram: &Histogram,
        tail_threshold_us: u64,
    ) -> Self {
        Self {
            tool: tool.name,
            metric: tool.metric,
            unit: "microseconds",
            duration_sec: duration.as_secs_f64(),
            total_events: histogram.total(),
            tail_threshold_us,
            tail_events: tail_events(histogram, tail_threshold_us),
            max_bucket: max_bucket(histogram),
            notes: BUCKET_NOTE,
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools;

    fn sparse_histogram() -> Histogram {
        // Buckets 0 and 2 populated, everything else empty.
        let mut counts = vec![0u64; 26];
        counts[0] = 5;
        counts[2] = 3;
        Histogram::from_counts(counts)
    }

    #[test]
    fn tail_at_threshold_one_is_the_total() {
        let h = sparse_histogram();
        assert_eq!(tail_events(&h, 1), h.total());
    }

    #[test]
    fn tail_beyond_top_bucket_is_zero() {
        let h = sparse_histogram();
        assert_eq!(tail_events(&h, u64::MAX), 0);
    }

    #[test]
    fn tail_and_max_for_sparse_histogram() {
        // Threshold 4us starts the tail at bucket 2.
        let h = sparse_histogram();
        assert_eq!(tail_events(&h, 4), 3);
        assert_eq!(max_bucket(&h), Some(2));
        assert_eq!(h.total(), 8);
    }

    #[test]
    fn max_bucket_of_empty_histogram_is_none() {
        let h = Histogram::from_counts(vec![0; 64]);
        assert_eq!(max_bucket(&h), None);
    }

    #[test]
    fn summary_record_fields() {
        let h = sparse_histogram();
        let record = SummaryRecord::build(&tools::IOLAT, Duration::from_secs(2), &h, 4);

        assert_eq!(record.tool, "iolat");
        assert_eq!(record.metric, "block_io_completion_latency");
        assert_eq!(record.unit, "microseconds");
        assert_eq!(record.duration_sec, 2.0);
        assert_eq!(record.total_events, 8);
        assert_eq!(record.tail_events, 3);
        assert_eq!(record.max_bucket, Some(2));
        assert_eq!(record.notes, BUCKET_NOTE);
    }
}
