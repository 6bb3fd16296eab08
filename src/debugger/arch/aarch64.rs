use super::{Architecture, Registers};
use crate::error::{MonitorError, Result};
use nix::unistd::Pid;
use std::mem;

/// The slice of the aarch64 register file a syscall stop is decoded from.
///
/// `x8` holds the syscall number; `x0` holds the first argument on entry
/// and the return value on exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallRegs {
    pub x8: u64,
    pub args: [u64; 6],
}

pub struct Aarch64Arch;

impl Architecture for Aarch64Arch {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn syscall_number(&self, regs: &Registers) -> i64 {
        match regs {
            Registers::Aarch64(r) => r.x8 as i64,
        }
    }

    fn syscall_args(&self, regs: &Registers) -> [u64; 6] {
        match regs {
            Registers::Aarch64(r) => r.args,
        }
    }

    fn return_value(&self, regs: &Registers) -> i64 {
        match regs {
            Registers::Aarch64(r) => r.args[0] as i64,
        }
    }

    fn execve_syscall(&self) -> i64 {
        libc::SYS_execve
    }
}

pub fn read_registers(pid: Pid) -> Result<SyscallRegs> {
    // No PTRACE_GETREGS on aarch64; the register set is fetched with
    // PTRACE_GETREGSET and the NT_PRSTATUS note type.
    let mut regs: libc::user_regs_struct = unsafe { mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: &mut regs as *mut _ as *mut libc::c_void,
        iov_len: mem::size_of::<libc::user_regs_struct>(),
    };

    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            pid.as_raw(),
            libc::NT_PRSTATUS as *mut libc::c_void,
            &mut iov as *mut libc::iovec,
        )
    };
    if res < 0 {
        return Err(MonitorError::RegisterRead {
            pid: pid.as_raw(),
            source: nix::Error::last(),
        });
    }

    Ok(SyscallRegs {
        x8: regs.regs[8],
        args: [
            regs.regs[0],
            regs.regs[1],
            regs.regs[2],
            regs.regs[3],
            regs.regs[4],
            regs.regs[5],
        ],
    })
}
