//! Crash analysis for worker subprocesses.
//!
//! Turns a raw wait status into a reason that can be reported back to the
//! client when a worker dies in the middle of a call.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Segmentation fault, usually from native code in the converter stack.
    Segfault,
    /// Bus error (misaligned access, or stack overflow on macOS).
    BusError,
    /// `abort()` was called, e.g. a failed C assertion or a Rust double panic.
    Aborted,
    /// SIGKILL: pool recycle or the OOM killer.
    Killed,
    /// Any other signal.
    Signaled(Signal),
    /// Process is still running.
    StillAlive,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Whether the worker died from a fault rather than exiting or being told to stop.
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Segfault | Self::BusError | Self::Aborted)
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Segfault => "crashed with a segmentation fault (SIGSEGV)".to_string(),
            Self::BusError => "crashed with a bus error (SIGBUS)".to_string(),
            Self::Aborted => "aborted (SIGABRT)".to_string(),
            Self::Killed => "was killed (SIGKILL)".to_string(),
            Self::Signaled(sig) => format!("was killed by signal {:?}", sig),
            Self::StillAlive => "is still running".to_string(),
            Self::Unknown => "terminated for an unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => match signal {
            Signal::SIGSEGV => TerminationReason::Segfault,
            Signal::SIGBUS => TerminationReason::BusError,
            Signal::SIGABRT => TerminationReason::Aborted,
            Signal::SIGKILL => TerminationReason::Killed,
            other => TerminationReason::Signaled(other),
        },
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}
