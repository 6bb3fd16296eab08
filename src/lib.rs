//! Syscall-level process sandbox monitor.
//!
//! `syscage` attaches to a freshly spawned child process, stops it at
//! every syscall boundary, applies a per-syscall policy, and reports an
//! ordered lifecycle event stream to the embedding host. A denied
//! syscall is a protection fault: the tracee is killed and the host is
//! told why.
//!
//! ```no_run
//! use syscage::{Monitor, PtraceDebugger, SyscallPolicy};
//!
//! # fn main() -> syscage::Result<()> {
//! let mut monitor = Monitor::new(Box::new(PtraceDebugger::new()?));
//! monitor.handlers_mut().fill(SyscallPolicy::Allow);
//! monitor.set_policy(libc::SYS_write, SyscallPolicy::StdoutStderrOnly)?;
//! monitor.on_event(|event| eprintln!("{event:?}"));
//!
//! monitor.spawn(|| {
//!     // child: request tracing, stop for the attach, then exec
//!     let _ = nix::sys::ptrace::traceme();
//!     let _ = nix::sys::signal::raise(nix::sys::signal::Signal::SIGSTOP);
//!     let argv = [std::ffi::CString::new("/bin/echo").unwrap()];
//!     let _ = nix::unistd::execv(&argv[0], &argv);
//!     127
//! })?;
//! let status = monitor.monitor()?;
//! # let _ = status;
//! # Ok(())
//! # }
//! ```

pub mod debugger;
pub mod error;
pub mod event;
pub mod monitor;
pub mod policy;

pub use debugger::{Debugger, PtraceDebugger, ReturnCallback};
pub use error::{MonitorError, Result};
pub use event::{ExitReason, LifecycleEvent};
pub use monitor::{DecisionCallback, EventCallback, Monitor};
pub use policy::{HandlerTable, SyscallPolicy, MAX_SYSCALL};
