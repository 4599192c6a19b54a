#![no_std]

//! Types and bucket arithmetic shared between the kernlat userspace
//! collectors and the eBPF programs.
//!
//! Latency samples are binned into power-of-two microsecond buckets:
//! bucket `i` covers `[2^i, 2^(i+1))` microseconds. Keeping the codec in
//! one `no_std` crate means the kernel-side encoder and the userspace
//! decoder cannot drift apart.

/// Bucket count for the block I/O latency histogram.
pub const IOLAT_SLOTS: u32 = 26;

/// Bucket count for the page fault latency histogram.
pub const MEMLAT_SLOTS: u32 = 64;

/// Bucket count for the run queue wait latency histogram.
pub const RUNQLAT_SLOTS: u32 = 64;

/// Map names as exposed by the eBPF object. Each tool owns one per-CPU
/// histogram map and one start-timestamp map.
pub const IOLAT_HIST_MAP: &str = "IOLAT_HIST";
pub const MEMLAT_HIST_MAP: &str = "MEMLAT_HIST";
pub const RUNQLAT_HIST_MAP: &str = "RUNQLAT_HIST";

/// Log2 bucket index for a latency sample, clamped to `[0, slots)`.
///
/// A shift loop instead of `ilog2` so the same code passes the BPF
/// verifier. Zero maps to bucket 0.
#[inline(always)]
pub fn bucket_index(mut value_us: u64, slots: u32) -> u32 {
    let mut bucket = 0;
    while value_us > 1 {
        value_us >>= 1;
        bucket += 1;
        if bucket >= slots - 1 {
            break;
        }
    }
    bucket
}

/// Half-open microsecond range `[lo, hi)` covered by bucket `i`.
///
/// Bucket 63 has no representable upper bound; it saturates to
/// `u64::MAX` and is effectively `[2^63, u64::MAX]`.
#[inline]
pub const fn bucket_range_us(i: u32) -> (u64, u64) {
    let lo = 1u64 << i;
    let hi = if i >= 63 { u64::MAX } else { 1u64 << (i + 1) };
    (lo, hi)
}

/// Smallest bucket index whose low bound is at or above `threshold_us`,
/// or `slots` if the threshold clears every bucket (empty tail).
///
/// This converts a human latency threshold into the start index for
/// tail summation: every sample in buckets `>= first_bucket_at_or_above`
/// took at least `threshold_us` microseconds.
pub fn first_bucket_at_or_above(threshold_us: u64, slots: u32) -> u32 {
    let mut bucket = 0;
    while bucket < slots {
        let (lo, _) = bucket_range_us(bucket);
        if lo >= threshold_us {
            return bucket;
        }
        bucket += 1;
    }
    slots
}

/// Identity of an in-flight block request, keyed by device and start
/// sector. Used as the start-timestamp map key for iolat, where the
/// issue and completion tracepoints can fire on different CPUs and in
/// different task contexts.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockRequestKey {
    pub dev: u32,
    pub _pad: u32,
    pub sector: u64,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for BlockRequestKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_partition_without_gaps() {
        // Each bucket's high bound is the next bucket's low bound.
        for i in 0..62 {
            let (_, hi) = bucket_range_us(i);
            let (lo, _) = bucket_range_us(i + 1);
            assert_eq!(hi, lo, "gap or overlap between buckets {} and {}", i, i + 1);
        }
        assert_eq!(bucket_range_us(0), (1, 2));
        assert_eq!(bucket_range_us(63), (1 << 63, u64::MAX));
    }

    #[test]
    fn bucket_index_matches_ranges() {
        for i in 0..26 {
            let (lo, hi) = bucket_range_us(i);
            assert_eq!(bucket_index(lo, 64), i);
            assert_eq!(bucket_index(hi - 1, 64), i);
        }
    }

    #[test]
    fn bucket_index_edges() {
        assert_eq!(bucket_index(0, 64), 0);
        assert_eq!(bucket_index(1, 64), 0);
        assert_eq!(bucket_index(2, 64), 1);
        assert_eq!(bucket_index(3, 64), 1);
        assert_eq!(bucket_index(4, 64), 2);
        assert_eq!(bucket_index(u64::MAX, 64), 63);
        // Clamped to the top slot of a narrow histogram.
        assert_eq!(bucket_index(u64::MAX, IOLAT_SLOTS), IOLAT_SLOTS - 1);
    }

    #[test]
    fn first_bucket_is_monotonic_in_threshold() {
        let mut prev = 0;
        for threshold in [0, 1, 2, 3, 4, 7, 8, 9, 1000, 1 << 20, u64::MAX] {
            let b = first_bucket_at_or_above(threshold, 64);
            assert!(b >= prev, "not monotonic at threshold {threshold}");
            prev = b;
        }
    }

    #[test]
    fn first_bucket_known_values() {
        assert_eq!(first_bucket_at_or_above(1, 64), 0);
        assert_eq!(first_bucket_at_or_above(4, 64), 2);
        assert_eq!(first_bucket_at_or_above(8, 64), 3);
        assert_eq!(first_bucket_at_or_above(9, 64), 4);
        // Thresholds past the top bucket produce an empty tail.
        assert_eq!(first_bucket_at_or_above(u64::MAX, 26), 26);
    }
}
