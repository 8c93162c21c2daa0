use crate::content_range::ContentRangeError;
use std::path::PathBuf;

/// Which side of the transfer a sink write failure belongs to.
///
/// The distinction matters because a failed write to the target file and a
/// failed write to stdout or the upload pipe map to different process exit
/// codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFault {
    File,
    Stream,
}

/// Failure of a single range request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("source http status {0}")]
    HttpStatus(u16),

    #[error(transparent)]
    InvalidContentRange(#[from] ContentRangeError),

    #[error("truncated transfer")]
    Truncated,

    #[error("request timeout")]
    Timeout,

    #[error("{0}")]
    Network(#[from] reqwest::Error),

    #[error("{source}")]
    Sink {
        fault: SinkFault,
        #[source]
        source: std::io::Error,
    },

    #[error("transfer aborted")]
    Cancelled,
}

impl RequestError {
    /// A transient failure is worth retrying from the current watermark; a
    /// permanent one (unexpected status, malformed Content-Range, sink I/O)
    /// aborts the transfer immediately.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            RequestError::Truncated | RequestError::Timeout | RequestError::Network(_)
        )
    }
}

/// Local failures detected before any worker runs.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("invalid target url {url:?}: {source}")]
    InvalidTargetUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("cannot create {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot open {path:?}: {source}")]
    OpenTarget {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot allocate {path:?}: {source}")]
    Allocate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0}")]
    Client(reqwest::Error),
}

/// Transfer outcome, carrying the process exit code contract.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The probe request failed; nothing was transferred.
    #[error("{0}")]
    Probe(RequestError),

    /// Local setup failed (target path, file creation, client construction).
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// A worker exhausted its retries or hit a permanent source error.
    #[error("{0}")]
    Worker(RequestError),

    /// The upload target rejected the transfer.
    #[error("target http status {0}")]
    TargetStatus(u16),

    /// Writing to stdout or the upload pipe failed.
    #[error("{0}")]
    TargetIo(std::io::Error),

    /// The upload request itself failed.
    #[error("{0}")]
    TargetRequest(reqwest::Error),

    /// Writing to the target file failed.
    #[error("{0}")]
    FileSink(std::io::Error),
}

impl TransferError {
    pub fn exit_code(&self) -> i32 {
        match self {
            TransferError::Probe(_) => 1,
            TransferError::Setup(_) => 2,
            TransferError::Worker(_) => 3,
            TransferError::TargetStatus(_)
            | TransferError::TargetIo(_)
            | TransferError::TargetRequest(_) => 4,
            TransferError::FileSink(_) => 5,
        }
    }
}
