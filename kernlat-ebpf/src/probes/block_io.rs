//! Block I/O completion latency.
//!
//! `block:block_rq_issue` records a start timestamp keyed by the request's
//! (dev, sector) pair; `block:block_rq_complete` looks it up, bins the
//! elapsed time, and bumps the per-CPU histogram slot.

use aya_ebpf::{
    helpers::bpf_ktime_get_ns,
    macros::{map, tracepoint},
    maps::{HashMap, PerCpuArray},
    programs::TracePointContext,
};
use kernlat_common::{BlockRequestKey, IOLAT_SLOTS, bucket_index};

// Offsets from the block_rq_issue/block_rq_complete tracepoint formats
// (/sys/kernel/tracing/events/block/*/format). Both events lay out
// `dev` and `sector` identically after the 8-byte common header.
const DEV_OFFSET: usize = 8;
const SECTOR_OFFSET: usize = 16;

#[map]
static IOLAT_START: HashMap<BlockRequestKey, u64> = HashMap::with_max_entries(131072, 0);

#[map]
static IOLAT_HIST: PerCpuArray<u64> = PerCpuArray::with_max_entries(IOLAT_SLOTS, 0);

#[tracepoint]
pub fn iolat_issue(ctx: TracePointContext) -> u32 {
    match try_issue(&ctx) {
        Ok(()) => 0,
        Err(ret) => ret as u32,
    }
}

#[tracepoint]
pub fn iolat_complete(ctx: TracePointContext) -> u32 {
    match try_complete(&ctx) {
        Ok(()) => 0,
        Err(ret) => ret as u32,
    }
}

fn request_key(ctx: &TracePointContext) -> Result<BlockRequestKey, i64> {
    let dev: u32 = unsafe { ctx.read_at(DEV_OFFSET)? };
    let sector: u64 = unsafe { ctx.read_at(SECTOR_OFFSET)? };
    Ok(BlockRequestKey {
        dev,
        _pad: 0,
        sector,
    })
}

fn try_issue(ctx: &TracePointContext) -> Result<(), i64> {
    let key = request_key(ctx)?;
    let now = unsafe { bpf_ktime_get_ns() };
    IOLAT_START.insert(&key, &now, 0)?;
    Ok(())
}

fn try_complete(ctx: &TracePointContext) -> Result<(), i64> {
    let key = request_key(ctx)?;
    let Some(start) = (unsafe { IOLAT_START.get(&key) }) else {
        // Completion for a request issued before we attached.
        return Ok(());
    };

    let delta_us = (unsafe { bpf_ktime_get_ns() }.wrapping_sub(*start)) / 1000;
    let bucket = bucket_index(delta_us, IOLAT_SLOTS);
    if let Some(count) = IOLAT_HIST.get_ptr_mut(bucket) {
        unsafe { *count += 1 };
    }

    let _ = IOLAT_START.remove(&key);
    Ok(())
}
