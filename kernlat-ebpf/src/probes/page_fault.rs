//! Page fault handling latency.
//!
//! Entry/return probes on `handle_mm_fault`, keyed by pid_tgid: a fault is
//! handled start to finish in the context of the faulting task, so the
//! thread id uniquely identifies the in-flight measurement.

use aya_ebpf::{
    helpers::{bpf_get_current_pid_tgid, bpf_ktime_get_ns},
    macros::{kprobe, kretprobe, map},
    maps::{HashMap, PerCpuArray},
    programs::{ProbeContext, RetProbeContext},
};
use kernlat_common::{MEMLAT_SLOTS, bucket_index};

#[map]
static MEMLAT_START: HashMap<u64, u64> = HashMap::with_max_entries(8192, 0);

#[map]
static MEMLAT_HIST: PerCpuArray<u64> = PerCpuArray::with_max_entries(MEMLAT_SLOTS, 0);

#[kprobe]
pub fn memlat_entry(_ctx: ProbeContext) -> u32 {
    let key = bpf_get_current_pid_tgid();
    let now = unsafe { bpf_ktime_get_ns() };
    let _ = MEMLAT_START.insert(&key, &now, 0);
    0
}

#[kretprobe]
pub fn memlat_exit(_ctx: RetProbeContext) -> u32 {
    let key = bpf_get_current_pid_tgid();
    let Some(start) = (unsafe { MEMLAT_START.get(&key) }) else {
        return 0;
    };

    let delta_ns = unsafe { bpf_ktime_get_ns() }.wrapping_sub(*start);
    let _ = MEMLAT_START.remove(&key);

    // Sub-microsecond faults still count as one microsecond so they land
    // in bucket 0 rather than vanishing.
    let delta_us = (delta_ns / 1000).max(1);
    let bucket = bucket_index(delta_us, MEMLAT_SLOTS);
    if let Some(count) = MEMLAT_HIST.get_ptr_mut(bucket) {
        unsafe { *count += 1 };
    }
    0
}
