//! Run queue wait latency.
//!
//! `sched:sched_wakeup` records when a task became runnable;
//! `sched:sched_switch` consumes that timestamp when the task is finally
//! given a CPU. The delta is the time spent waiting on the run queue.

use aya_ebpf::{
    helpers::bpf_ktime_get_ns,
    macros::{map, tracepoint},
    maps::{HashMap, PerCpuArray},
    programs::TracePointContext,
};
use kernlat_common::{RUNQLAT_SLOTS, bucket_index};

// Offsets from the sched tracepoint formats
// (/sys/kernel/tracing/events/sched/*/format): 8-byte common header,
// then a 16-byte comm. sched_wakeup's `pid` follows the comm;
// sched_switch's `next_pid` follows prev_comm/prev_pid/prev_prio/
// prev_state/next_comm.
const WAKEUP_PID_OFFSET: usize = 24;
const SWITCH_NEXT_PID_OFFSET: usize = 56;

#[map]
static RUNQLAT_START: HashMap<u32, u64> = HashMap::with_max_entries(16384, 0);

#[map]
static RUNQLAT_HIST: PerCpuArray<u64> = PerCpuArray::with_max_entries(RUNQLAT_SLOTS, 0);

#[tracepoint]
pub fn runqlat_wakeup(ctx: TracePointContext) -> u32 {
    match try_wakeup(&ctx) {
        Ok(()) => 0,
        Err(ret) => ret as u32,
    }
}

#[tracepoint]
pub fn runqlat_switch(ctx: TracePointContext) -> u32 {
    match try_switch(&ctx) {
        Ok(()) => 0,
        Err(ret) => ret as u32,
    }
}

fn try_wakeup(ctx: &TracePointContext) -> Result<(), i64> {
    let pid: i32 = unsafe { ctx.read_at(WAKEUP_PID_OFFSET)? };
    let now = unsafe { bpf_ktime_get_ns() };
    RUNQLAT_START.insert(&(pid as u32), &now, 0)?;
    Ok(())
}

fn try_switch(ctx: &TracePointContext) -> Result<(), i64> {
    let next_pid: i32 = unsafe { ctx.read_at(SWITCH_NEXT_PID_OFFSET)? };
    let key = next_pid as u32;

    let Some(woken_at) = (unsafe { RUNQLAT_START.get(&key) }) else {
        // Task was already on-CPU or woke before we attached.
        return Ok(());
    };

    let delta_us = (unsafe { bpf_ktime_get_ns() }.wrapping_sub(*woken_at)) / 1000;
    let bucket = bucket_index(delta_us, RUNQLAT_SLOTS);
    if let Some(count) = RUNQLAT_HIST.get_ptr_mut(bucket) {
        unsafe { *count += 1 };
    }

    let _ = RUNQLAT_START.remove(&key);
    Ok(())
}
