//! Bounded-window latency histogram collectors for kernel subsystems.
//!
//! Each tool attaches a pair of eBPF hooks, lets the kernel side
//! accumulate elapsed-time samples into a per-CPU histogram map for a
//! fixed collection window, then detaches, reduces the map to one
//! logical histogram, derives tail statistics, and optionally writes a
//! CSV/JSON artifact pair.

use aya::{Ebpf, EbpfError, include_bytes_aligned};
use log::warn;

pub mod artifact;
pub mod collector;
pub mod histogram;
pub mod session;
pub mod summary;
pub mod tools;

/// Load the embedded eBPF object.
///
/// eBPF maps live in locked kernel memory; on kernels without
/// memcg-based accounting, map creation fails unless RLIMIT_MEMLOCK is
/// lifted first.
pub fn load_bpf() -> Result<Ebpf, EbpfError> {
    bump_memlock_rlimit();
    Ebpf::load(include_bytes_aligned!(concat!(env!("OUT_DIR"), "/kernlat")))
}

fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to increase RLIMIT_MEMLOCK");
    }
}
