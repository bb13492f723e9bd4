#[macro_use]
mod macros;
mod error;
mod messages;

use std::future::Future;

pub use error::Error;
pub use messages::{frame_length, BlockResponse, FileInfoResponse, Request, WireMessage};
use tokio::io::AsyncWriteExt;

pub type Result<T> = std::result::Result<T, Error>;

/// Every message is preceded by its length encoded as a big-endian u32
pub const LENGTH_PREFIX_LENGTH: usize = 4;

pub trait Encode {
    fn encode<T>(&self, dst: &mut T) -> impl Future<Output = Result<()>>
    where
        T: AsyncWriteExt + Unpin;
}

pub trait Decode<'a> {
    fn decode(src: &'a [u8]) -> Result<Self>
    where
        Self: Sized;
}
