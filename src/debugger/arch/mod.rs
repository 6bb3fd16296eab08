use crate::error::Result;
use nix::unistd::Pid;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "x86_64")]
pub mod x86_64;

/// Register-level decoding of one syscall stop.
pub trait Architecture: Send + Sync {
    fn name(&self) -> &'static str;

    /// Syscall number, valid on both the entry and the exit stop.
    fn syscall_number(&self, regs: &Registers) -> i64;

    fn syscall_args(&self, regs: &Registers) -> [u64; 6];

    /// Return value, valid on the exit stop.
    fn return_value(&self, regs: &Registers) -> i64;

    /// Number of `execve` on this architecture.
    fn execve_syscall(&self) -> i64;
}

/// Raw register snapshot for the running architecture.
#[derive(Debug, Clone, Copy)]
pub enum Registers {
    #[cfg(target_arch = "x86_64")]
    X86_64(x86_64::SyscallRegs),
    #[cfg(target_arch = "aarch64")]
    Aarch64(aarch64::SyscallRegs),
}

pub fn detect_architecture() -> Result<Box<dyn Architecture>> {
    #[cfg(target_arch = "x86_64")]
    {
        Ok(Box::new(x86_64::X86_64Arch))
    }

    #[cfg(target_arch = "aarch64")]
    {
        Ok(Box::new(aarch64::Aarch64Arch))
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        Err(crate::error::MonitorError::UnsupportedArch(
            std::env::consts::ARCH.to_string(),
        ))
    }
}

pub fn read_registers(pid: Pid) -> Result<Registers> {
    #[cfg(target_arch = "x86_64")]
    {
        x86_64::read_registers(pid).map(Registers::X86_64)
    }

    #[cfg(target_arch = "aarch64")]
    {
        aarch64::read_registers(pid).map(Registers::Aarch64)
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = pid;
        Err(crate::error::MonitorError::UnsupportedArch(
            std::env::consts::ARCH.to_string(),
        ))
    }
}
