use std::fmt::Debug;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("an IO error happened: {0}")]
    IoError(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("error while serializing a message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("an error happened when converting a value: {0}")]
    ConversionError(&'static str),
    #[error("expected at least {expected} bytes while got {got}")]
    BadLength { expected: usize, got: usize },
    #[error("message of {length} bytes exceeds the limit of {max} bytes")]
    MessageTooLarge { length: usize, max: usize },
}

impl Error {
    /// Whether the peer sent something that isn't a valid message, as opposed to a transport failure
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Error::Decode(_) | Error::BadLength { .. } | Error::MessageTooLarge { .. }
        )
    }
}
