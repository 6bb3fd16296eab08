use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("wait failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("ptrace error: {0}")]
    Ptrace(#[source] nix::Error),

    #[error("failed to read registers of pid {pid}: {source}")]
    RegisterRead {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("architecture not supported: {0}")]
    UnsupportedArch(String),

    #[error("syscall number {0} is outside the handler table")]
    SyscallOutOfRange(i64),

    #[error("no traced process: spawn was not called or did not succeed")]
    NotSpawned,
}

pub type Result<T> = std::result::Result<T, MonitorError>;
