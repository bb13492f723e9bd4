use std::fmt::Debug;
use std::path::PathBuf;
use std::result;
use std::time::Duration;

use thiserror::Error;

use crate::PeerAddress;

pub type Result<T> = result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("an error happened when converting a value to {0}")]
    ConversionError(&'static str),
    #[error("bad configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("not a file path: {0:?}")]
    InvalidPath(PathBuf),
    #[error("refusing to fragment an empty file")]
    EmptyInput,
    #[error("wrong block index: {index}. Total number of blocks: {total}")]
    InvalidBlockIndex { index: u32, total: u32 },
    #[error("'{filename}' can't be reassembled: missing blocks {missing:?}")]
    IncompleteRecord { filename: String, missing: Vec<u32> },
    #[error("none of the neighbors has '{filename}'")]
    FileNotFound { filename: String },
    #[error("download of '{filename}' is incomplete: have {have}/{total} blocks, missing {missing:?}")]
    IncompleteDownload {
        filename: String,
        have: usize,
        total: u32,
        missing: Vec<u32>,
    },
    #[error("downloaded '{filename}' has incorrect hash: expected {expected}, got {actual}")]
    Integrity {
        filename: String,
        expected: String,
        actual: String,
    },
    #[error(
        "'{filename}' is already known with {local_blocks} blocks and hash {local_hash}, \
         but neighbors advertise {remote_blocks} blocks and hash {remote_hash}"
    )]
    ConflictingFileInfo {
        filename: String,
        local_blocks: u32,
        local_hash: String,
        remote_blocks: u32,
        remote_hash: String,
    },
    #[error("error while encoding or decoding a message: {0}")]
    ProtocolError(#[from] block_exchange_protocol::Error),
}

/// A failed query against a single neighbor. Never fatal for a download: the neighbor is
/// simply treated as having nothing to offer.
#[derive(Error, Debug)]
#[error("query to {peer} failed: {kind}")]
pub struct RemoteQueryError {
    pub peer: PeerAddress,
    pub kind: QueryErrorKind,
}

#[derive(Error, Debug)]
pub enum QueryErrorKind {
    #[error("'{operation}' timed out after {timeout:?}")]
    Timeout { operation: &'static str, timeout: Duration },
    #[error("can't connect: {0}")]
    Connect(#[source] std::io::Error),
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] block_exchange_protocol::Error),
}
