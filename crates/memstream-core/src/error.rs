use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Offset {0:#x} was never pushed")]
    UnknownOffset(u32),

    #[error("Size mismatch at offset {offset:#x}: stored {stored} bytes, requested {requested}")]
    SizeMismatch {
        offset: u32,
        stored: usize,
        requested: usize,
    },

    #[error("Failed to initialize scatter session for pid {pid}")]
    ScatterInit { pid: u32 },

    #[error("Device unavailable for pid {pid}")]
    DeviceUnavailable { pid: u32 },

    #[error("Scatter session is closed")]
    SessionClosed,

    #[error("Failed to prepare scatter op at {address:#x} ({size} bytes)")]
    PrepareFailed { address: u64, size: usize },

    #[error("Failed to read process memory at address {address:#x} ({size} bytes)")]
    MemoryReadFailed { address: u64, size: usize },

    #[error("Failed to write process memory at address {address:#x} ({size} bytes)")]
    MemoryWriteFailed { address: u64, size: usize },

    #[error("Partial transfer at {address:#x}: expected {expected} bytes, got {actual}")]
    PartialTransfer {
        address: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Failed to open process {pid}: {message}")]
    ProcessOpenFailed { pid: u32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors caused by the caller's arguments; retrying cannot help.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_) | Error::UnknownOffset(_) | Error::SizeMismatch { .. }
        )
    }
}
