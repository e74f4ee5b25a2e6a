use thiserror::Error;

/// The four stable result codes exposed across the public surface.
///
/// Callers that only care about the coarse outcome can match on this; the
/// full [`Error`] carries the underlying cause for logging/debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    Inval,
    Nomem,
    Unknown,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("pathname pattern, symbol name and replacement function are required")]
    InvalidArgument,
    #[error("failed to compile pathname pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("allocation failed while registering a hook")]
    Nomem,
    #[error("engine initialization failed and has not been cleared")]
    NotInitialized,
    #[error("failed to spawn the asynchronous refresh worker")]
    WorkerSpawnFailed(#[source] std::io::Error),
    #[error("failed to install the probe guard signal handler")]
    ProbeGuardInstallFailed,
    #[error("/proc/self/maps (or equivalent) is unavailable: {0}")]
    MapsUnavailable(#[source] std::io::Error),
    #[error("malformed ELF header at {0:#x}")]
    MalformedElfHeader(usize),
    #[error("missing mandatory dynamic tag {0:#x}")]
    MissingDynamicTag(u64),
    #[error("a fault was raised while probing memory at {0:#x}")]
    ProbeFault(usize),
    #[error("memory protection change denied for range {0:#x}..{1:#x}")]
    ProtectionDenied(usize, usize, #[source] std::io::Error),
    #[error("a pointer-sized store would straddle a page boundary at {0:#x}")]
    UnalignedStraddle(usize),
}

impl Error {
    /// Collapse the rich cause down to the stable code in spec.md §6.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument | Error::InvalidRegex(_) => ErrorCode::Inval,
            Error::Nomem => ErrorCode::Nomem,
            Error::NotInitialized
            | Error::WorkerSpawnFailed(_)
            | Error::ProbeGuardInstallFailed
            | Error::MapsUnavailable(_)
            | Error::MalformedElfHeader(_)
            | Error::MissingDynamicTag(_)
            | Error::ProbeFault(_)
            | Error::ProtectionDenied(_, _, _)
            | Error::UnalignedStraddle(_) => ErrorCode::Unknown,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
