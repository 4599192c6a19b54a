//! Reading the kernel-maintained counter table.
//!
//! Each tool's eBPF side maintains a per-CPU array map with one slot per
//! latency bucket. The per-CPU dimension exists only to avoid write
//! contention in the kernel; userspace reduces it with a commutative sum
//! after the hooks are detached, so no slot can be mid-update while we
//! read it.

use std::io::Write;

use aya::Ebpf;
use aya::maps::{MapData, MapError, PerCpuArray, PerCpuValues};
use aya::util::nr_cpus;
use kernlat_common::bucket_range_us;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("map `{0}` not found in the loaded object")]
    MapNotFound(String),
    #[error("map `{name}` is not a per-CPU array: {source}")]
    MapType { name: String, source: MapError },
    #[error("failed to read bucket {index}: {source}")]
    Bucket { index: u32, source: MapError },
    #[error("failed to reset bucket {index}: {source}")]
    Reset { index: u32, source: MapError },
    #[error("could not determine the number of CPUs: {0}")]
    Cpus(String),
    #[error("could not build zeroed per-CPU values: {0}")]
    Zeroes(std::io::Error),
}

/// A complete, reduced latency histogram: one count per bucket plus the
/// grand total. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    counts: Vec<u64>,
    total: u64,
}

impl Histogram {
    pub fn from_counts(counts: Vec<u64>) -> Self {
        let total = counts.iter().sum();
        Self { counts, total }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn slots(&self) -> u32 {
        self.counts.len() as u32
    }

    /// Human-readable table, one row per bucket. Zero-count rows above
    /// bucket 25 are suppressed to keep 64-slot histograms readable.
    pub fn write_table(&self, w: &mut impl Write) -> std::io::Result<()> {
        writeln!(w, "bucket  range(us)            count")?;
        for (i, count) in self.counts.iter().enumerate() {
            if *count == 0 && i > 25 {
                continue;
            }
            let (lo, hi) = bucket_range_us(i as u32);
            writeln!(w, "{i:2}      [{lo:8}, {hi:8})   {count}")?;
        }
        Ok(())
    }
}

/// Read-only view of one tool's per-CPU histogram map.
pub struct CounterTable<'a> {
    map: PerCpuArray<&'a MapData, u64>,
    slots: u32,
}

impl<'a> CounterTable<'a> {
    pub fn open(bpf: &'a Ebpf, name: &str, slots: u32) -> Result<Self, ReadError> {
        let map = bpf
            .map(name)
            .ok_or_else(|| ReadError::MapNotFound(name.to_string()))?;
        let map = PerCpuArray::try_from(map).map_err(|source| ReadError::MapType {
            name: name.to_string(),
            source,
        })?;
        Ok(Self { map, slots })
    }

    /// Snapshot the whole table into a `Histogram`.
    ///
    /// Any failed slot fetch aborts the read and names the bucket: a
    /// partial histogram would silently understate tail latency, which
    /// is the statistic these tools exist to measure.
    pub fn read(&self) -> Result<Histogram, ReadError> {
        let counts = collect_buckets(self.slots, |index| {
            let shards: PerCpuValues<u64> = self.map.get(&index, 0)?;
            Ok(shards.iter().copied().sum())
        })
        .map_err(|(index, source)| ReadError::Bucket { index, source })?;
        Ok(Histogram::from_counts(counts))
    }
}

/// Fetch the logical count for every bucket in `0..slots`, aborting on
/// the first failure with the failing index.
fn collect_buckets<E, F>(slots: u32, mut fetch: F) -> Result<Vec<u64>, (u32, E)>
where
    F: FnMut(u32) -> Result<u64, E>,
{
    let mut counts = Vec::with_capacity(slots as usize);
    for index in 0..slots {
        counts.push(fetch(index).map_err(|err| (index, err))?);
    }
    Ok(counts)
}

/// Zero every slot of a tool's histogram map, across all shards. Run
/// before attaching so each collection window starts from a clean table.
pub fn reset(bpf: &mut Ebpf, name: &str, slots: u32) -> Result<(), ReadError> {
    let map = bpf
        .map_mut(name)
        .ok_or_else(|| ReadError::MapNotFound(name.to_string()))?;
    let mut map: PerCpuArray<&mut MapData, u64> =
        PerCpuArray::try_from(map).map_err(|source| ReadError::MapType {
            name: name.to_string(),
            source,
        })?;

    let cpus = nr_cpus().map_err(|(path, err)| ReadError::Cpus(format!("{path}: {err}")))?;
    for index in 0..slots {
        let zeroes = PerCpuValues::try_from(vec![0u64; cpus]).map_err(ReadError::Zeroes)?;
        map.set(index, zeroes, 0)
            .map_err(|source| ReadError::Reset { index, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_counts_precomputes_total() {
        let h = Histogram::from_counts(vec![5, 0, 3]);
        assert_eq!(h.total(), 8);
        assert_eq!(h.slots(), 3);
        assert_eq!(h.counts(), &[5, 0, 3]);
    }

    #[test]
    fn collect_buckets_sums_shards_per_index() {
        // Three shards per bucket, summed by the fetch closure the same
        // way `CounterTable::read` does.
        let shards = [[1u64, 2, 3], [0, 0, 0], [10, 0, 7]];
        let counts = collect_buckets(3, |i| {
            Ok::<u64, ()>(shards[i as usize].iter().sum())
        })
        .unwrap();
        assert_eq!(counts, vec![6, 0, 17]);
    }

    #[test]
    fn collect_buckets_aborts_on_first_failure() {
        let mut fetched = Vec::new();
        let result = collect_buckets(64, |i| {
            if i == 2 {
                return Err("lookup failed");
            }
            fetched.push(i);
            Ok(0u64)
        });

        // No partial histogram: the whole read fails, naming the bucket.
        let (index, err) = result.unwrap_err();
        assert_eq!(index, 2);
        assert_eq!(err, "lookup failed");
        assert_eq!(fetched, vec![0, 1]);
    }

    #[test]
    fn table_skips_zero_rows_above_bucket_25() {
        let mut counts = vec![0u64; 64];
        counts[0] = 5;
        counts[30] = 1;
        let h = Histogram::from_counts(counts);

        let mut out = Vec::new();
        h.write_table(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        // Header + buckets 0..=25 + the one populated high bucket.
        assert_eq!(text.lines().count(), 1 + 26 + 1);
        assert!(text.lines().any(|l| l.trim_start().starts_with("30 ")));
        assert!(!text.lines().any(|l| l.trim_start().starts_with("31 ")));
    }
}
