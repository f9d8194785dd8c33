use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;

/// Errors produced while reading, writing or canonicalizing archives.
#[derive(Debug, Error)]
pub enum TorrentZipError {
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Malformed or truncated container structure.
    #[error("invalid zip: {0}")]
    Format(String),

    #[error("deflate error: {0}")]
    Codec(#[from] CodecError),

    #[error("entry name is {0} bytes, longer than the 65535 allowed")]
    NameTooLong(usize),

    /// A re-canonicalized archive did not hash to the original bytes.
    #[error("produced torrentzip for {} differs from original (expected {expected}, got {actual})", path.display())]
    Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

impl TorrentZipError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        TorrentZipError::Format(msg.into())
    }
}

impl From<io::Error> for TorrentZipError {
    fn from(err: io::Error) -> Self {
        // Codec failures raised inside Read/Write impls travel as io::Error.
        let codec = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<CodecError>())
            .cloned();
        match codec {
            Some(codec) => TorrentZipError::Codec(codec),
            None => TorrentZipError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, TorrentZipError>;
