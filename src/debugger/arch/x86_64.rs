use super::{Architecture, Registers};
use crate::error::{MonitorError, Result};
use nix::unistd::Pid;
use std::mem;

/// The slice of the x86_64 register file a syscall stop is decoded from.
///
/// `orig_rax` holds the syscall number on both entry and exit; `rax` is
/// clobbered to the return value by the time the exit stop is observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallRegs {
    pub orig_rax: u64,
    pub rax: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub r10: u64,
    pub r8: u64,
    pub r9: u64,
}

pub struct X86_64Arch;

impl Architecture for X86_64Arch {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn syscall_number(&self, regs: &Registers) -> i64 {
        match regs {
            Registers::X86_64(r) => r.orig_rax as i64,
        }
    }

    fn syscall_args(&self, regs: &Registers) -> [u64; 6] {
        match regs {
            Registers::X86_64(r) => [r.rdi, r.rsi, r.rdx, r.r10, r.r8, r.r9],
        }
    }

    fn return_value(&self, regs: &Registers) -> i64 {
        match regs {
            Registers::X86_64(r) => r.rax as i64,
        }
    }

    fn execve_syscall(&self) -> i64 {
        libc::SYS_execve
    }
}

pub fn read_registers(pid: Pid) -> Result<SyscallRegs> {
    let mut regs: libc::user_regs_struct = unsafe { mem::zeroed() };

    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGS,
            pid.as_raw(),
            std::ptr::null_mut::<libc::c_void>(),
            &mut regs as *mut libc::user_regs_struct,
        )
    };
    if res < 0 {
        return Err(MonitorError::RegisterRead {
            pid: pid.as_raw(),
            source: nix::Error::last(),
        });
    }

    Ok(SyscallRegs {
        orig_rax: regs.orig_rax,
        rax: regs.rax,
        rdi: regs.rdi,
        rsi: regs.rsi,
        rdx: regs.rdx,
        r10: regs.r10,
        r8: regs.r8,
        r9: regs.r9,
    })
}
