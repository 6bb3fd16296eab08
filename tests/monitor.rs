//! End-to-end scenarios against real traced children.
//!
//! Each test forks a child that requests tracing, stops itself so the
//! monitor observes a clean first stop, and execs a small system binary.
//! Policy only applies after the execve returns, so the binaries below
//! are what actually exercises it.

use nix::sys::ptrace;
use nix::sys::signal::{raise, Signal};
use nix::unistd::execv;
use std::ffi::CString;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use syscage::{
    ExitReason, LifecycleEvent, Monitor, MonitorError, PtraceDebugger, SyscallPolicy,
};

fn new_monitor() -> Monitor {
    Monitor::new(Box::new(
        PtraceDebugger::new().expect("unsupported architecture"),
    ))
}

fn allow_everything(monitor: &mut Monitor) {
    monitor.handlers_mut().fill(SyscallPolicy::Allow);
}

/// Registers a collecting event sink and returns the shared buffer.
fn collect_events(monitor: &mut Monitor) -> Arc<Mutex<Vec<LifecycleEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    monitor.on_event(move |event| sink.lock().unwrap().push(event));
    events
}

/// Spawns `argv` under the monitor: the child requests tracing, raises
/// SIGSTOP so the parent observes a well-defined first stop, then execs.
fn spawn_traced(monitor: &mut Monitor, argv: &[&str]) {
    let argv: Vec<CString> = argv
        .iter()
        .map(|arg| CString::new(*arg).unwrap())
        .collect();
    monitor
        .spawn(move || {
            if ptrace::traceme().is_err() {
                return 126;
            }
            if raise(Signal::SIGSTOP).is_err() {
                return 126;
            }
            let _ = execv(&argv[0], &argv);
            127
        })
        .expect("spawn failed");
}

fn protections(events: &[LifecycleEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|event| match event {
            LifecycleEvent::Protection { syscall } => Some(*syscall),
            _ => None,
        })
        .collect()
}

// ========== Scenario: everything allowed ==========

#[test]
fn allow_all_child_exits_cleanly() {
    let mut monitor = new_monitor();
    allow_everything(&mut monitor);
    let events = collect_events(&mut monitor);

    spawn_traced(&mut monitor, &["/bin/true"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, 0);
    assert_eq!(
        &*events.lock().unwrap(),
        &[
            LifecycleEvent::Attach,
            LifecycleEvent::Exited {
                reason: ExitReason::Normal
            },
        ],
        "bootstrap SIGSTOP and trace machinery must not leak into the stream"
    );
}

#[test]
fn run_accounts_time_and_marks_initialized() {
    let mut monitor = new_monitor();
    allow_everything(&mut monitor);

    assert!(!monitor.is_initialized());
    assert_eq!(monitor.exec_time(), Duration::ZERO);

    spawn_traced(&mut monitor, &["/bin/true"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, 0);
    assert!(monitor.is_initialized(), "execve exit must set initialized");
    assert!(monitor.exec_time() > Duration::ZERO);
    assert!(monitor.max_memory() > 0, "rusage should report a peak rss");
}

// ========== Scenario: default deny ==========

#[test]
fn unconfigured_table_faults_the_first_workload_syscall() {
    let mut monitor = new_monitor();
    let events = collect_events(&mut monitor);

    spawn_traced(&mut monitor, &["/bin/true"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, -(Signal::SIGKILL as i32));

    let events = events.lock().unwrap();
    assert_eq!(events[0], LifecycleEvent::Attach);
    assert!(
        matches!(events[1], LifecycleEvent::Protection { .. }),
        "pre-exec bootstrap syscalls must not fault; the first post-exec one must"
    );
    assert_eq!(
        events[2],
        LifecycleEvent::Exiting {
            reason: ExitReason::Protection
        }
    );
    assert_eq!(
        events.last(),
        Some(&LifecycleEvent::Exited {
            reason: ExitReason::Protection
        })
    );
}

// ========== Scenario: one syscall denied ==========

#[test]
fn denied_write_kills_with_ordered_stream() {
    let mut monitor = new_monitor();
    allow_everything(&mut monitor);
    monitor
        .set_policy(libc::SYS_write, SyscallPolicy::Deny)
        .unwrap();
    let events = collect_events(&mut monitor);

    spawn_traced(&mut monitor, &["/bin/echo", "hello"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, -(Signal::SIGKILL as i32));

    let events = events.lock().unwrap();
    assert_eq!(protections(&events), vec![libc::SYS_write]);

    // The fault, the exit announcement it causes, and the terminal event
    // must arrive in exactly that order.
    let fault_at = events
        .iter()
        .position(|event| matches!(event, LifecycleEvent::Protection { .. }))
        .unwrap();
    assert_eq!(events[fault_at - 1], LifecycleEvent::Attach);
    assert_eq!(
        events[fault_at + 1],
        LifecycleEvent::Exiting {
            reason: ExitReason::Protection
        }
    );
    assert_eq!(
        events.last(),
        Some(&LifecycleEvent::Exited {
            reason: ExitReason::Protection
        })
    );
}

// ========== Scenario: restricted to stdout/stderr ==========

#[test]
fn restricted_write_to_stdout_proceeds() {
    let mut monitor = new_monitor();
    allow_everything(&mut monitor);
    monitor
        .set_policy(libc::SYS_write, SyscallPolicy::StdoutStderrOnly)
        .unwrap();
    let events = collect_events(&mut monitor);

    spawn_traced(&mut monitor, &["/bin/echo", "ok"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, 0);
    assert!(protections(&events.lock().unwrap()).is_empty());
}

#[test]
fn restricted_syscall_on_other_descriptor_faults() {
    // The dynamic loader reads the ELF header of libc from a freshly
    // opened descriptor (3), which is exactly the "first argument is not
    // stdout or stderr" case.
    let mut monitor = new_monitor();
    allow_everything(&mut monitor);
    monitor
        .set_policy(libc::SYS_read, SyscallPolicy::StdoutStderrOnly)
        .unwrap();
    let events = collect_events(&mut monitor);

    spawn_traced(&mut monitor, &["/bin/echo", "never printed"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, -(Signal::SIGKILL as i32));

    let events = events.lock().unwrap();
    assert_eq!(protections(&events), vec![libc::SYS_read]);
    assert_eq!(
        events.last(),
        Some(&LifecycleEvent::Exited {
            reason: ExitReason::Protection
        })
    );
}

// ========== Scenario: callback decisions ==========

#[test]
fn callback_allow_lets_the_syscall_proceed() {
    let mut monitor = new_monitor();
    allow_everything(&mut monitor);
    monitor
        .set_policy(libc::SYS_write, SyscallPolicy::Callback)
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    monitor.on_syscall(move |_debugger, syscall| {
        recorder.lock().unwrap().push(syscall);
        true
    });
    let events = collect_events(&mut monitor);

    spawn_traced(&mut monitor, &["/bin/echo", "hi"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, 0);
    assert!(seen.lock().unwrap().contains(&libc::SYS_write));
    assert!(protections(&events.lock().unwrap()).is_empty());
}

#[test]
fn callback_deny_is_a_protection_fault() {
    let mut monitor = new_monitor();
    allow_everything(&mut monitor);
    monitor
        .set_policy(libc::SYS_write, SyscallPolicy::Callback)
        .unwrap();
    monitor.on_syscall(|_debugger, _syscall| false);
    let events = collect_events(&mut monitor);

    spawn_traced(&mut monitor, &["/bin/echo", "hi"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, -(Signal::SIGKILL as i32));

    let events = events.lock().unwrap();
    assert_eq!(protections(&events), vec![libc::SYS_write]);
    let fault_at = events
        .iter()
        .position(|event| matches!(event, LifecycleEvent::Protection { .. }))
        .unwrap();
    assert_eq!(
        events[fault_at + 1],
        LifecycleEvent::Exiting {
            reason: ExitReason::Protection
        }
    );
}

#[test]
fn callback_policy_without_callback_fails_closed() {
    let mut monitor = new_monitor();
    allow_everything(&mut monitor);
    monitor
        .set_policy(libc::SYS_write, SyscallPolicy::Callback)
        .unwrap();
    let events = collect_events(&mut monitor);

    spawn_traced(&mut monitor, &["/bin/echo", "hi"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, -(Signal::SIGKILL as i32));
    assert_eq!(
        protections(&events.lock().unwrap()),
        vec![libc::SYS_write]
    );
}

#[test]
fn return_callback_fires_once_at_syscall_exit() {
    let mut monitor = new_monitor();
    allow_everything(&mut monitor);
    monitor
        .set_policy(libc::SYS_write, SyscallPolicy::Callback)
        .unwrap();

    let fired = Arc::new(Mutex::new(Vec::new()));
    let recorder = fired.clone();
    monitor.on_syscall(move |debugger, _syscall| {
        let recorder = recorder.clone();
        debugger.install_return_callback(Box::new(move |returned| {
            recorder.lock().unwrap().push(returned);
        }));
        true
    });

    spawn_traced(&mut monitor, &["/bin/echo", "hi"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, 0);
    // Installed at the write enter, so it fires at the write exit, once.
    assert_eq!(&*fired.lock().unwrap(), &[libc::SYS_write]);
}

// ========== Scenario: signal forwarding ==========

#[test]
fn signals_are_reported_and_redelivered() {
    let mut monitor = new_monitor();
    allow_everything(&mut monitor);
    let events = collect_events(&mut monitor);

    spawn_traced(&mut monitor, &["/bin/sh", "-c", "kill -USR1 $$"]);
    let status = monitor.monitor().expect("monitor failed");

    // SIGUSR1's default disposition terminates the shell.
    assert_eq!(status, -(Signal::SIGUSR1 as i32));

    let events = events.lock().unwrap();
    assert!(events.contains(&LifecycleEvent::Signal {
        signal: Signal::SIGUSR1 as i32
    }));
    assert!(
        !events.contains(&LifecycleEvent::Signal {
            signal: Signal::SIGSTOP as i32
        }),
        "the bootstrap SIGSTOP must never be reported"
    );
    assert_eq!(
        events.last(),
        Some(&LifecycleEvent::Exited {
            reason: ExitReason::Normal
        })
    );
}

// ========== Scenario: free-running mode ==========

#[test]
fn free_run_mode_skips_syscall_policy() {
    let mut monitor = new_monitor();
    // Deny-all table, but without syscall stepping nothing consults it.
    monitor.set_trace_syscalls(false);
    let events = collect_events(&mut monitor);

    spawn_traced(&mut monitor, &["/bin/true"]);
    let status = monitor.monitor().expect("monitor failed");

    assert_eq!(status, 0);
    assert!(protections(&events.lock().unwrap()).is_empty());
}

// ========== Misuse ==========

#[test]
fn monitor_before_spawn_is_an_error() {
    let mut monitor = new_monitor();
    assert!(matches!(monitor.monitor(), Err(MonitorError::NotSpawned)));
}
