//! Internal, feature-gated event log.
//!
//! Mirrors `rayon-core`'s own `log` feature: every hot path logs through
//! [`Logger::log`], which is a plain closure call when the `log` feature is
//! enabled and compiles away to nothing otherwise. Nothing in this crate
//! should ever branch on whether logging is enabled; the macro and the
//! `Logger` type exist purely to make the call sites read the same either
//! way.

use std::fmt;

/// One observable thing that happened inside the runtime.
///
/// This is deliberately not `pub` outside the crate: it is an internal
/// observability seam, not part of the stable API.
#[derive(Debug)]
pub(crate) enum Event {
    FabricStarted { workers: usize },
    FabricTerminated,
    WorkerStarted { worker: usize },
    WorkerStopped { worker: usize },
    WorkerPaused { worker: usize },
    WorkerResumed { worker: usize },
    JobPushed { worker: usize },
    JobPopped { worker: usize },
    JobStolen { worker: usize, victim: usize },
    JobsInjected { count: usize },
    JobUninjected { worker: usize },
    SysmonReplacing { worker: usize, cooperative: bool },
    ChannelClosed { capacity: usize },
    DeadlockDetected { mutexes: usize, threads: usize },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug formatting is good enough for a structured-ish trace; no
        // external formatting crate is pulled in for this.
        write!(f, "{:?}", self)
    }
}

/// A cheap, cloneable handle that records events.
///
/// When the `log` feature is off, `log()` is `#[inline(always)]` and its
/// body never runs — the closure passed in is not even called, so building
/// the `Event` itself never happens on the hot path.
#[derive(Clone, Debug, Default)]
pub(crate) struct Logger {
    #[cfg(feature = "log")]
    enabled: bool,
}

impl Logger {
    pub(crate) fn new() -> Self {
        #[cfg(feature = "log")]
        {
            Logger {
                enabled: std::env::var_os("MN_LOG").is_some(),
            }
        }
        #[cfg(not(feature = "log"))]
        {
            Logger {}
        }
    }

    #[cfg(feature = "log")]
    #[inline]
    pub(crate) fn log(&self, event: impl FnOnce() -> Event) {
        if self.enabled {
            eprintln!("[mn] {}", event());
        }
    }

    #[cfg(not(feature = "log"))]
    #[inline(always)]
    pub(crate) fn log(&self, _event: impl FnOnce() -> Event) {}
}
