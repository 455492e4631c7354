//! The raw transfer primitive the engine drives.
//!
//! `Transfer` downloads one URL to one local path, resuming from a partial
//! file when the remote size is known, reporting progress per chunk, and
//! honoring the `TransferSignal` (cancellation + rate cap) between chunks.
//! `CurlTransfer` is the libcurl-backed implementation.

mod http;
mod pacer;
mod parse;
mod signal;

use std::path::Path;

pub use http::CurlTransfer;
pub use pacer::Pacer;
pub use signal::{CancelReason, TransferSignal};

/// One download request.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    pub url: &'a str,
    pub destination: &'a Path,
    /// Resolved remote size. Byte-range resume is only attempted when known.
    pub known_size: Option<u64>,
}

/// Reported after every written chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes on disk for this file, including any resumed prefix.
    pub downloaded: u64,
    /// Total size if known (from the request or the response headers).
    pub total: Option<u64>,
}

/// How a transfer ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Cancelled(CancelReason),
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Curl reported an error (timeout, connection, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// The server closed early; fewer bytes arrived than announced.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Disk write failed (disk full, permission denied).
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),
    /// HEAD succeeded but carried no usable Content-Length.
    #[error("no Content-Length for {0}")]
    UnknownSize(String),
    /// Anything else reported by a transfer implementation.
    #[error("{0}")]
    Other(String),
}

pub trait Transfer: Send + Sync {
    /// Download `request.url` into `request.destination`.
    ///
    /// Must check `signal` at least once per chunk and return
    /// `Ok(TransferOutcome::Cancelled(reason))` once it is cancelled.
    fn download(
        &self,
        request: &TransferRequest<'_>,
        signal: &TransferSignal,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<TransferOutcome, TransferError>;

    /// Remote size in bytes (HEAD, following redirects).
    fn resolve_remote_size(&self, url: &str) -> Result<u64, TransferError>;
}
