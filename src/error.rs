//! Error types for ggateu

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end a command or a session.
///
/// Per-request provider failures are not represented here: they travel back
/// to the kernel as errno codes and the session keeps serving.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid media sizes: {0}")]
    MediaSize(String),

    #[error("Cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot allocate {0} bytes for the request buffer")]
    OutOfMemory(usize),

    #[error("ioctl(/dev/ggctl): {}", errno_message(.0))]
    Gate(i32),

    #[error("Malformed request from the gate channel: {0}")]
    GateProtocol(String),

    #[error("Not supported on this platform: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an `Open` error for `path`
    pub fn open(path: &std::path::Path, source: io::Error) -> Self {
        Error::Open {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Translate an I/O error into the errno reported back to the kernel
pub fn errno_from_io(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or_else(|| match err.kind() {
        io::ErrorKind::Unsupported => libc::EOPNOTSUPP,
        io::ErrorKind::PermissionDenied => libc::EACCES,
        io::ErrorKind::NotFound => libc::ENOENT,
        io::ErrorKind::InvalidInput => libc::EINVAL,
        io::ErrorKind::OutOfMemory => libc::ENOMEM,
        _ => libc::EIO,
    })
}

fn errno_message(errno: &i32) -> String {
    io::Error::from_raw_os_error(*errno).to_string()
}
