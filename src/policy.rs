use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};

/// Number of slots in a [`HandlerTable`]. Linux syscall numbers on the
/// supported architectures stay well below this bound.
pub const MAX_SYSCALL: usize = 512;

/// Policy tag attached to one syscall number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyscallPolicy {
    /// The syscall proceeds unmodified.
    Allow,
    /// Allowed only when the first argument is descriptor 1 or 2.
    StdoutStderrOnly,
    /// The decision is deferred to the host's decision callback.
    Callback,
    /// Protection fault. The default for every unset entry.
    #[default]
    Deny,
}

/// Per-syscall policy table, owned by one monitor.
///
/// Every slot starts as [`SyscallPolicy::Deny`]: a syscall nobody thought
/// about is never silently permitted. Lookups outside the table deny for
/// the same reason.
#[derive(Debug, Clone)]
pub struct HandlerTable {
    handlers: [SyscallPolicy; MAX_SYSCALL],
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            handlers: [SyscallPolicy::Deny; MAX_SYSCALL],
        }
    }

    /// Sets the policy for one syscall number, overwriting the previous
    /// tag. Errors on numbers outside `[0, MAX_SYSCALL)` without touching
    /// the table.
    pub fn set(&mut self, syscall: i64, policy: SyscallPolicy) -> Result<()> {
        let slot = usize::try_from(syscall)
            .ok()
            .filter(|&n| n < MAX_SYSCALL)
            .ok_or(MonitorError::SyscallOutOfRange(syscall))?;
        self.handlers[slot] = policy;
        Ok(())
    }

    /// Policy for one syscall number. Out-of-range numbers are denied.
    pub fn policy(&self, syscall: i64) -> SyscallPolicy {
        usize::try_from(syscall)
            .ok()
            .and_then(|n| self.handlers.get(n).copied())
            .unwrap_or(SyscallPolicy::Deny)
    }

    /// Sets every slot to `policy`.
    pub fn fill(&mut self, policy: SyscallPolicy) {
        self.handlers = [policy; MAX_SYSCALL];
    }
}
