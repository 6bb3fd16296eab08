use crate::error::{MonitorError, Result};
use nix::unistd::Pid;

pub mod arch;

use arch::Architecture;

/// One-shot hook fired at the next syscall-exit with the syscall number,
/// then cleared.
pub type ReturnCallback = Box<dyn FnOnce(i64) + Send>;

/// Register-level access to the traced process, as the monitor loop
/// consumes it.
///
/// The monitor never touches registers directly; everything it knows
/// about "which syscall, with what arguments" comes through this trait.
/// [`PtraceDebugger`] is the stock implementation; a host embedding the
/// monitor for tests can substitute its own.
pub trait Debugger: Send {
    /// Syscall number at the current syscall-stop.
    fn current_syscall(&mut self) -> Result<i64>;

    /// First argument of the syscall at the current syscall-stop.
    fn first_argument(&mut self) -> Result<u64>;

    /// Number of `execve` on this platform.
    fn execve_syscall_number(&self) -> i64;

    /// Installs the one-shot syscall-exit hook, replacing any pending one.
    fn install_return_callback(&mut self, callback: ReturnCallback);

    /// Removes and returns the pending one-shot hook, if any.
    fn take_return_callback(&mut self) -> Option<ReturnCallback>;

    /// Tells the debugger a new traced process exists, so register access
    /// can be (re)initialized for that pid.
    fn notify_new_process(&mut self, pid: Pid);
}

/// [`Debugger`] backed by ptrace register reads on the running
/// architecture.
pub struct PtraceDebugger {
    pid: Option<Pid>,
    arch: Box<dyn Architecture>,
    on_return: Option<ReturnCallback>,
}

impl PtraceDebugger {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pid: None,
            arch: arch::detect_architecture()?,
            on_return: None,
        })
    }

    pub fn arch_name(&self) -> &'static str {
        self.arch.name()
    }

    fn registers(&self) -> Result<arch::Registers> {
        let pid = self.pid.ok_or(MonitorError::NotSpawned)?;
        arch::read_registers(pid)
    }
}

impl Debugger for PtraceDebugger {
    fn current_syscall(&mut self) -> Result<i64> {
        let regs = self.registers()?;
        Ok(self.arch.syscall_number(&regs))
    }

    fn first_argument(&mut self) -> Result<u64> {
        let regs = self.registers()?;
        Ok(self.arch.syscall_args(&regs)[0])
    }

    fn execve_syscall_number(&self) -> i64 {
        self.arch.execve_syscall()
    }

    fn install_return_callback(&mut self, callback: ReturnCallback) {
        self.on_return = Some(callback);
    }

    fn take_return_callback(&mut self) -> Option<ReturnCallback> {
        self.on_return.take()
    }

    fn notify_new_process(&mut self, pid: Pid) {
        self.pid = Some(pid);
    }
}
