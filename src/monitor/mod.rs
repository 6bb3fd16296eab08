use crate::debugger::Debugger;
use crate::error::{MonitorError, Result};
use crate::event::{ExitReason, LifecycleEvent};
use crate::policy::{HandlerTable, SyscallPolicy};
use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::{fork, ForkResult, Pid};
use std::time::{Duration, Instant};

pub mod state;

use state::{SyscallPhase, SyscallSide};

/// Decision hook for syscalls tagged [`SyscallPolicy::Callback`].
///
/// Receives the debugger so it can inspect arguments or install the
/// one-shot return hook; returning `false` is a protection fault.
pub type DecisionCallback = Box<dyn FnMut(&mut dyn Debugger, i64) -> bool + Send>;

/// Sink for the lifecycle event stream.
pub type EventCallback = Box<dyn FnMut(LifecycleEvent) + Send>;

/// One traced process: its policy table, callbacks, accounting, and the
/// wait/classify/resume loop that enforces the policy.
///
/// Lifecycle: configure (policies, callbacks), [`spawn`](Monitor::spawn)
/// exactly once, then [`monitor`](Monitor::monitor) until the child is
/// gone. Everything runs synchronously on the calling thread; callbacks
/// are invoked inline between stops and must not block indefinitely.
pub struct Monitor {
    pid: Option<Pid>,
    handlers: HandlerTable,
    debugger: Box<dyn Debugger>,
    decision: Option<DecisionCallback>,
    event_sink: Option<EventCallback>,
    trace_syscalls: bool,
    initialized: bool,
    exec_time: Duration,
    rusage: libc::rusage,
}

impl Monitor {
    pub fn new(debugger: Box<dyn Debugger>) -> Self {
        Self {
            pid: None,
            handlers: HandlerTable::new(),
            debugger,
            decision: None,
            event_sink: None,
            trace_syscalls: true,
            initialized: false,
            exec_time: Duration::ZERO,
            rusage: unsafe { std::mem::zeroed() },
        }
    }

    /// Sets the policy for one syscall number. See [`HandlerTable::set`].
    pub fn set_policy(&mut self, syscall: i64, policy: SyscallPolicy) -> Result<()> {
        self.handlers.set(syscall, policy)
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Must not be called while `monitor` is running; the loop reads the
    /// table between stops.
    pub fn handlers_mut(&mut self) -> &mut HandlerTable {
        &mut self.handlers
    }

    /// Registers the decision callback consulted for
    /// [`SyscallPolicy::Callback`] syscalls.
    pub fn on_syscall<F>(&mut self, decision: F)
    where
        F: FnMut(&mut dyn Debugger, i64) -> bool + Send + 'static,
    {
        self.decision = Some(Box::new(decision));
    }

    /// Registers the lifecycle event sink. Without one, events are
    /// dropped unhandled.
    pub fn on_event<F>(&mut self, sink: F)
    where
        F: FnMut(LifecycleEvent) + Send + 'static,
    {
        self.event_sink = Some(Box::new(sink));
    }

    /// When false, the child free-runs between signals instead of
    /// stopping at every syscall boundary, and no policy is applied.
    pub fn set_trace_syscalls(&mut self, trace: bool) {
        self.trace_syscalls = trace;
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// True once the traced process has returned from its `execve`, i.e.
    /// the real workload is running. Pre-exec bootstrap syscalls are
    /// never policy-checked.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Wall-clock time spent waiting on the tracee, summed over every
    /// stop. Approximates time the child held control or was scheduled;
    /// it is not a precise CPU accounting.
    pub fn exec_time(&self) -> Duration {
        self.exec_time
    }

    /// Peak resident set size of the tracee in kilobytes, from the most
    /// recent wait.
    pub fn max_memory(&self) -> i64 {
        self.rusage.ru_maxrss
    }

    pub fn debugger_mut(&mut self) -> &mut dyn Debugger {
        self.debugger.as_mut()
    }

    /// Forks; the child branch runs `entry` and exits immediately with
    /// its return value, nothing else. The parent records the pid and
    /// notifies the debugger.
    ///
    /// The caller's entry point is expected to request tracing and stop
    /// itself (traceme + SIGSTOP) before exec, so the monitor observes a
    /// well-defined first stop.
    pub fn spawn<F>(&mut self, entry: F) -> Result<()>
    where
        F: FnOnce() -> i32,
    {
        match unsafe { fork() }.map_err(MonitorError::Fork)? {
            ForkResult::Child => {
                let code = entry();
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child } => {
                log::debug!("spawned child pid {child}");
                self.pid = Some(child);
                self.debugger.notify_new_process(child);
                Ok(())
            }
        }
    }

    /// Runs the monitoring state machine until the traced process is
    /// gone. Returns the child's exit code, or the negated signal number
    /// if a signal terminated it.
    pub fn monitor(&mut self) -> Result<i32> {
        let pid = self.pid.ok_or(MonitorError::NotSpawned)?;
        let mut phase = SyscallPhase::new();
        let mut first = true;
        let mut exit_reason = ExitReason::Normal;

        let exit_code = loop {
            let status = self.wait_for_stop(pid)?;

            match status {
                WaitStatus::Exited(_, code) => break code,
                WaitStatus::Signaled(_, signal, _) => break -(signal as i32),
                _ => {}
            }

            if first {
                log::debug!("attached to pid {pid}");
                self.dispatch(LifecycleEvent::Attach);
                // TRACESYSGOOD makes syscall-stops distinguishable from
                // signal-stops, TRACEEXIT announces the tracee's death
                // while it can still be observed, TRACEEXEC suppresses
                // the legacy SIGTRAP the kernel would otherwise deliver
                // after a successful execve.
                ptrace::setoptions(
                    pid,
                    ptrace::Options::PTRACE_O_TRACESYSGOOD
                        | ptrace::Options::PTRACE_O_TRACEEXIT
                        | ptrace::Options::PTRACE_O_TRACEEXEC,
                )
                .map_err(MonitorError::Ptrace)?;
            }

            let mut deliver: Option<Signal> = None;

            match status {
                WaitStatus::PtraceSyscall(_) => {
                    let side = phase.flip();
                    let syscall = self.debugger.current_syscall()?;

                    if !self.initialized {
                        // execve does not return to the tracer if the
                        // kernel kills the image during setup (say, an
                        // rlimit hit), so there is no missed enter half
                        // to pair against: the exit of execve is itself
                        // the earliest reliable "workload is live"
                        // signal.
                        if side == SyscallSide::Exit
                            && syscall == self.debugger.execve_syscall_number()
                        {
                            log::debug!("pid {pid}: execve returned, enforcing policy");
                            self.initialized = true;
                        }
                    } else if side == SyscallSide::Enter {
                        exit_reason = self.enforce(syscall, exit_reason)?;
                    } else if let Some(callback) = self.debugger.take_return_callback() {
                        callback(syscall);
                    }
                }
                WaitStatus::PtraceEvent(_, _, event) if event == libc::PTRACE_EVENT_EXIT => {
                    // The tracee is about to die of its own accord. If a
                    // protection fault already claimed the exit, tell the
                    // controller the normal exit it would otherwise have
                    // seen was preempted.
                    if exit_reason != ExitReason::Normal {
                        self.dispatch(LifecycleEvent::Exiting {
                            reason: ExitReason::Normal,
                        });
                    }
                }
                WaitStatus::PtraceEvent(..) => {
                    // Exec notification, or an event stop this kernel
                    // added that we do not know. No signal caused it, so
                    // there is nothing to forward.
                }
                WaitStatus::Stopped(_, signal) => {
                    // The first stop is the bootstrap SIGSTOP; many
                    // runtimes catch a redelivered stop signal, print,
                    // and re-raise it, so it is suppressed entirely.
                    if !first {
                        if signal != Signal::SIGTRAP {
                            deliver = Some(signal);
                        }
                        log::trace!("pid {pid}: forwarding signal {signal}");
                        self.dispatch(LifecycleEvent::Signal {
                            signal: signal as i32,
                        });
                    }
                }
                _ => {}
            }

            self.resume(pid, deliver)?;
            first = false;
        };

        log::debug!("pid {pid} gone: status {exit_code}, reason {exit_reason:?}");
        self.dispatch(LifecycleEvent::Exited {
            reason: exit_reason,
        });
        Ok(exit_code)
    }

    /// Applies the handler table to one initialized syscall-enter.
    /// Returns the exit reason the loop should carry forward.
    fn enforce(&mut self, syscall: i64, current: ExitReason) -> Result<ExitReason> {
        match self.handlers.policy(syscall) {
            SyscallPolicy::Allow => Ok(current),
            SyscallPolicy::StdoutStderrOnly => {
                let fd = self.debugger.first_argument()?;
                if fd == 1 || fd == 2 {
                    Ok(current)
                } else {
                    Ok(self.protection_fault(syscall))
                }
            }
            SyscallPolicy::Callback => {
                // No registered callback denies: a deferred decision
                // nobody answers must fail closed.
                let allowed = match self.decision.as_mut() {
                    Some(decision) => decision(self.debugger.as_mut(), syscall),
                    None => false,
                };
                if allowed {
                    Ok(current)
                } else {
                    Ok(self.protection_fault(syscall))
                }
            }
            SyscallPolicy::Deny => Ok(self.protection_fault(syscall)),
        }
    }

    /// The single path by which a policy violation becomes process death.
    /// Dispatches `Protection` then `Exiting`, kills the tracee, and
    /// hands back the protection exit reason. Control must still reach
    /// the loop's resume step so the kill signal is delivered.
    fn protection_fault(&mut self, syscall: i64) -> ExitReason {
        log::debug!("pid {:?}: protection fault on syscall {syscall}", self.pid);
        self.dispatch(LifecycleEvent::Protection { syscall });
        self.dispatch(LifecycleEvent::Exiting {
            reason: ExitReason::Protection,
        });
        if let Some(pid) = self.pid {
            // SIGKILL delivery can only fail if the process is already
            // gone, which is the outcome we want anyway.
            let _ = kill(pid, Signal::SIGKILL);
        }
        ExitReason::Protection
    }

    /// Forwards one lifecycle event to the host. Returns whether a sink
    /// consumed it.
    fn dispatch(&mut self, event: LifecycleEvent) -> bool {
        match self.event_sink.as_mut() {
            Some(sink) => {
                sink(event);
                true
            }
            None => false,
        }
    }

    /// Blocks until the tracee changes state, charging the elapsed wall
    /// clock to `exec_time` and keeping the rusage the kernel reports.
    fn wait_for_stop(&mut self, pid: Pid) -> Result<WaitStatus> {
        let mut status: libc::c_int = 0;
        let started = Instant::now();

        let waited = loop {
            // wait4 rather than waitpid: the rusage is part of the
            // accounting surface.
            let waited =
                unsafe { libc::wait4(pid.as_raw(), &mut status, 0, &mut self.rusage) };
            if waited != -1 {
                break waited;
            }
            let errno = nix::Error::last();
            if errno != nix::Error::EINTR {
                self.exec_time += started.elapsed();
                return Err(MonitorError::Wait(errno));
            }
        };
        self.exec_time += started.elapsed();

        WaitStatus::from_raw(Pid::from_raw(waited), status).map_err(MonitorError::Wait)
    }

    fn resume(&mut self, pid: Pid, signal: Option<Signal>) -> Result<()> {
        let resumed = if self.trace_syscalls {
            ptrace::syscall(pid, signal)
        } else {
            ptrace::cont(pid, signal)
        };
        match resumed {
            Ok(()) => Ok(()),
            // The tracee can disappear between a kill and this resume.
            Err(nix::Error::ESRCH) => Ok(()),
            Err(errno) => Err(MonitorError::Ptrace(errno)),
        }
    }
}
