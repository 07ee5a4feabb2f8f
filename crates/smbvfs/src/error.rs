//! Error type shared by every layer of the virtual filesystem.

use std::io;

/// Failure of a filesystem, registry or file handle operation.
///
/// No operation in this crate is fatal to the process: every failure is
/// reported through this type to the immediate caller and never retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed path, or a path whose `..` segments escape the root.
    #[error("invalid path: {0}")]
    PathInvalid(String),

    /// The transport could not establish a connection to the server.
    #[error("server unreachable: {server}: {source}")]
    ServerUnreachable {
        server: String,
        #[source]
        source: io::Error,
    },

    /// Login failed, or explicit credentials were silently demoted to guest.
    #[error("authentication rejected by {0}")]
    AuthRejected(String),

    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("not connected to {0}")]
    NotConnected(String),

    /// Tree connect to the named share failed.
    #[error("share unavailable: {0}")]
    ShareUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A transport call failed mid-operation.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// The file handle was closed before this operation.
    #[error("file handle is closed")]
    Closed,
}

impl Error {
    /// Map a transport error raised while touching `path`.
    ///
    /// `NotFound` keeps its meaning, everything else is an I/O failure.
    pub(crate) fn from_transport(path: &str, err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.to_owned()),
            _ => Error::IoFailure(err),
        }
    }

    /// Whether the error reports an absent stat/open target.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
