use serde::{Deserialize, Serialize};

/// Why a monitored run ended, as reported in [`LifecycleEvent::Exiting`]
/// and [`LifecycleEvent::Exited`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The process ran to completion or was killed by an ordinary signal.
    Normal,
    /// A denied syscall forced termination.
    Protection,
}

/// The monitor's sole output stream.
///
/// Ordering is part of the contract: `Protection` always precedes the
/// `Exiting` it causes, and `Exiting` always precedes `Exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// First stop of the traced process was observed.
    Attach,
    /// A non-syscall signal arrived and will be redelivered.
    Signal { signal: i32 },
    /// A syscall was denied by policy.
    Protection { syscall: i64 },
    /// The process is about to terminate.
    Exiting { reason: ExitReason },
    /// Terminal: the process is gone.
    Exited { reason: ExitReason },
}
