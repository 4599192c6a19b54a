//! Instrumentation session: attaches a tool's hooks and guarantees
//! clean teardown.
//!
//! Every tool needs both of its hooks live before the collection window
//! starts; a one-sided attachment would measure a meaningless signal.
//! `Session::open` therefore attaches in fixed order and rolls back
//! everything already attached when any hook fails.

use std::fmt;
use std::path::Path;

use aya::Ebpf;
use aya::programs::kprobe::KProbeLink;
use aya::programs::trace_point::TracePointLink;
use aya::programs::{KProbe, ProgramError, TracePoint, links::Link};
use log::{info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("program `{0}` not found in the loaded object")]
    ProgramNotFound(String),
    #[error("program `{program}` has the wrong type for {target}: {source}")]
    ProgramType {
        program: String,
        target: String,
        source: ProgramError,
    },
    #[error("tracepoint {category}:{name} is not present on this kernel")]
    TracepointMissing { category: String, name: String },
    #[error("failed to load program `{program}`: {source}")]
    Load {
        program: String,
        source: ProgramError,
    },
    #[error("failed to attach `{program}` to {target}: {source}")]
    Attach {
        program: String,
        target: String,
        source: ProgramError,
    },
}

/// One hook to attach: which program in the eBPF object, and the kernel
/// target it binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookSpec {
    Tracepoint {
        program: &'static str,
        category: &'static str,
        name: &'static str,
    },
    Kprobe {
        program: &'static str,
        symbol: &'static str,
    },
    Kretprobe {
        program: &'static str,
        symbol: &'static str,
    },
}

impl HookSpec {
    pub fn program(&self) -> &'static str {
        match self {
            HookSpec::Tracepoint { program, .. }
            | HookSpec::Kprobe { program, .. }
            | HookSpec::Kretprobe { program, .. } => program,
        }
    }

    pub fn target(&self) -> String {
        match self {
            HookSpec::Tracepoint { category, name, .. } => format!("{category}:{name}"),
            HookSpec::Kprobe { symbol, .. } | HookSpec::Kretprobe { symbol, .. } => {
                (*symbol).to_string()
            }
        }
    }
}

impl fmt::Display for HookSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookSpec::Tracepoint { category, name, .. } => {
                write!(f, "tracepoint {category}:{name}")
            }
            HookSpec::Kprobe { symbol, .. } => write!(f, "kprobe {symbol}"),
            HookSpec::Kretprobe { symbol, .. } => write!(f, "kretprobe {symbol}"),
        }
    }
}

enum HookLink {
    Tracepoint(TracePointLink),
    KProbe(KProbeLink),
}

impl HookLink {
    fn detach(self) -> Result<(), ProgramError> {
        match self {
            HookLink::Tracepoint(link) => link.detach(),
            HookLink::KProbe(link) => link.detach(),
        }
    }
}

struct AttachedHook {
    desc: String,
    link: HookLink,
}

/// A set of live attachments. Owns every link it created; links detach
/// when dropped, so a session cannot leak hooks past its own lifetime.
pub struct Session {
    hooks: Vec<AttachedHook>,
}

impl Session {
    /// Attach every hook in order. On the first failure all previously
    /// attached hooks are released before the error is returned.
    pub fn open(bpf: &mut Ebpf, hooks: &[HookSpec]) -> Result<Self, AttachError> {
        let hooks = attach_all(hooks, |hook| attach_hook(bpf, hook))?;
        Ok(Self { hooks })
    }

    pub fn active_hooks(&self) -> usize {
        self.hooks.len()
    }

    /// Release every hook, in reverse order of attachment. Best effort:
    /// a failed detach is logged and the rest are still attempted.
    pub fn close(mut self) {
        while let Some(hook) = self.hooks.pop() {
            match hook.link.detach() {
                Ok(()) => info!("detached {}", hook.desc),
                Err(err) => warn!("failed to detach {}: {err}", hook.desc),
            }
        }
    }
}

/// Attach hooks one by one; on failure, drop the already-acquired
/// handles in reverse order so no partial session escapes.
fn attach_all<H, F>(hooks: &[HookSpec], mut attach_one: F) -> Result<Vec<H>, AttachError>
where
    F: FnMut(&HookSpec) -> Result<H, AttachError>,
{
    let mut attached = Vec::with_capacity(hooks.len());
    for hook in hooks {
        match attach_one(hook) {
            Ok(handle) => attached.push(handle),
            Err(err) => {
                while attached.pop().is_some() {}
                return Err(err);
            }
        }
    }
    Ok(attached)
}

fn attach_hook(bpf: &mut Ebpf, hook: &HookSpec) -> Result<AttachedHook, AttachError> {
    let desc = hook.to_string();
    let program = hook.program();

    let link = match *hook {
        HookSpec::Tracepoint { category, name, .. } => {
            if !tracepoint_exists(category, name) {
                return Err(AttachError::TracepointMissing {
                    category: category.to_string(),
                    name: name.to_string(),
                });
            }

            let tp: &mut TracePoint = bpf
                .program_mut(program)
                .ok_or_else(|| AttachError::ProgramNotFound(program.to_string()))?
                .try_into()
                .map_err(|source| AttachError::ProgramType {
                    program: program.to_string(),
                    target: hook.target(),
                    source,
                })?;
            tp.load().map_err(|source| AttachError::Load {
                program: program.to_string(),
                source,
            })?;
            let link_id = tp
                .attach(category, name)
                .map_err(|source| attach_err(hook, source))?;
            HookLink::Tracepoint(
                tp.take_link(link_id)
                    .map_err(|source| attach_err(hook, source))?,
            )
        }
        HookSpec::Kprobe { symbol, .. } | HookSpec::Kretprobe { symbol, .. } => {
            let kp: &mut KProbe = bpf
                .program_mut(program)
                .ok_or_else(|| AttachError::ProgramNotFound(program.to_string()))?
                .try_into()
                .map_err(|source| AttachError::ProgramType {
                    program: program.to_string(),
                    target: hook.target(),
                    source,
                })?;
            kp.load().map_err(|source| AttachError::Load {
                program: program.to_string(),
                source,
            })?;
            let link_id = kp
                .attach(symbol, 0)
                .map_err(|source| attach_err(hook, source))?;
            HookLink::KProbe(
                kp.take_link(link_id)
                    .map_err(|source| attach_err(hook, source))?,
            )
        }
    };

    info!("attached {desc}");
    Ok(AttachedHook { desc, link })
}

fn attach_err(hook: &HookSpec, source: ProgramError) -> AttachError {
    AttachError::Attach {
        program: hook.program().to_string(),
        target: hook.target(),
        source,
    }
}

fn tracepoint_exists(category: &str, name: &str) -> bool {
    const TRACEFS_MOUNT_POINTS: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

    TRACEFS_MOUNT_POINTS.iter().any(|base| {
        Path::new(base)
            .join("events")
            .join(category)
            .join(name)
            .exists()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOOKS: [HookSpec; 2] = [
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
    ];

    /// Handle whose drop mirrors a detach, so the rollback path can be
    /// observed without a kernel.
    struct Handle(Arc<AtomicUsize>);

    impl Drop for Handle {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn attach_all_keeps_every_handle_on_success() {
        let live = Arc::new(AtomicUsize::new(0));
        let handles = attach_all(&HOOKS, |_| {
            live.fetch_add(1, Ordering::SeqCst);
            Ok(Handle(live.clone()))
        })
        .unwrap();

        assert_eq!(handles.len(), 2);
        assert_eq!(live.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failure_on_second_hook_releases_the_first() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut calls = 0;
        let result = attach_all(&HOOKS, |hook| {
            calls += 1;
            if calls == 2 {
                return Err(AttachError::TracepointMissing {
                    category: "block".into(),
                    name: hook.target(),
                });
            }
            live.fetch_add(1, Ordering::SeqCst);
            Ok(Handle(live.clone()))
        });

        assert!(matches!(
            result,
            Err(AttachError::TracepointMissing { .. })
        ));
        // No residual attachment survives an aborted open.
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn attach_order_is_the_declared_order() {
        let mut seen = Vec::new();
        let _ = attach_all(&HOOKS, |hook| {
            seen.push(hook.program());
            Ok(())
        });
        assert_eq!(seen, vec!["iolat_issue", "iolat_complete"]);
    }

    #[test]
    fn hook_spec_targets() {
        assert_eq!(HOOKS[0].target(), "block:block_rq_issue");
        let kp = HookSpec::Kretprobe {
            program: "memlat_exit",
            symbol: "handle_mm_fault",
        };
        assert_eq!(kp.target(), "handle_mm_fault");
        assert_eq!(kp.to_string(), "kretprobe handle_mm_fault");
    }
}
