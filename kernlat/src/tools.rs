//! Per-tool measurement presets: which hooks to attach, which map to
//! read, and how many buckets the kernel side maintains.

use kernlat_common::{
    IOLAT_HIST_MAP, IOLAT_SLOTS, MEMLAT_HIST_MAP, MEMLAT_SLOTS, RUNQLAT_HIST_MAP, RUNQLAT_SLOTS,
};

use crate::session::HookSpec;

/// Static description of one measurement tool.
pub struct Tool {
    pub name: &'static str,
    pub metric: &'static str,
    pub slots: u32,
    pub hist_map: &'static str,
    /// Attachment order is fixed: the start-side hook first, so the
    /// completion side never observes a request we did not time.
    pub hooks: &'static [HookSpec],
}

/// Block I/O completion latency: issue to completion of each request.
pub const IOLAT: Tool = Tool {
    name: "iolat",
    metric: "block_io_completion_latency",
    slots: IOLAT_SLOTS,
    hist_map: IOLAT_HIST_MAP,
    hooks: &[
        HookSpec::Tracepoint {
            program: "iolat_issue",
            category: "block",
            name: "block_rq_issue",
        },
        HookSpec::Tracepoint {
            program: "iolat_complete",
            category: "block",
            name: "block_rq_complete",
        },
    ],
};

/// Page fault handling latency: entry to return of handle_mm_fault.
pub const MEMLAT: Tool = Tool {
    name: "memlat",
    metric: "page_fault_latency",
    slots: MEMLAT_SLOTS,
    hist_map: MEMLAT_HIST_MAP,
    hooks: &[
        HookSpec::Kprobe {
            program: "memlat_entry",
            symbol: "handle_mm_fault",
        },
        HookSpec::Kretprobe {
            program: "memlat_exit",
            symbol: "handle_mm_fault",
        },
    ],
};

/// Run queue wait latency: wakeup to on-CPU for each task.
pub const RUNQLAT: Tool = Tool {
    name: "runqlat",
    metric: "runqueue_wait_latency",
    slots: RUNQLAT_SLOTS,
    hist_map: RUNQLAT_HIST_MAP,
    hooks: &[
        HookSpec::Tracepoint {
            program: "runqlat_wakeup",
            category: "sched",
            name: "sched_wakeup",
        },
        HookSpec::Tracepoint {
            program: "runqlat_switch",
            category: "sched",
            name: "sched_switch",
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_attaches_a_hook_pair() {
        for tool in [&IOLAT, &MEMLAT, &RUNQLAT] {
            assert_eq!(tool.hooks.len(), 2, "{} must attach both sides", tool.name);
            assert!(tool.slots == 26 || tool.slots == 64);
        }
    }
}
