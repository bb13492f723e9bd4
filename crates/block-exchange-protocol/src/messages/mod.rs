mod request;
mod response;

use bytes::Buf;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

pub use request::Request;
pub use response::{BlockResponse, FileInfoResponse};

use crate::{Decode, Encode, Error, Result, LENGTH_PREFIX_LENGTH};

/// Marker for types that travel over the wire as a single length-prefixed JSON object
pub trait WireMessage: Serialize + DeserializeOwned {}

impl WireMessage for Request {}
impl WireMessage for BlockResponse {}
impl WireMessage for FileInfoResponse {}

/// Returns the full length of a message (prefix included) given its length prefix.
pub fn frame_length(mut prefix: &[u8]) -> Result<usize> {
    check_length!(prefix.remaining(), LENGTH_PREFIX_LENGTH);

    let payload_length = usize::try_from(prefix.get_u32())
        .map_err(|_| Error::ConversionError("message length doesn't fit in a usize"))?;

    Ok(LENGTH_PREFIX_LENGTH + payload_length)
}

impl<M: WireMessage> Encode for M {
    async fn encode<T>(&self, dst: &mut T) -> Result<()>
    where
        T: AsyncWriteExt + Unpin,
    {
        let payload = serde_json::to_vec(self).map_err(Error::Encode)?;
        let length =
            u32::try_from(payload.len()).map_err(|_| Error::ConversionError("message length doesn't fit in a u32"))?;

        dst.write_all(&length.to_be_bytes()).await?;
        dst.write_all(&payload).await?;

        Ok(())
    }
}

impl<'a, M: WireMessage> Decode<'a> for M {
    fn decode(src: &'a [u8]) -> Result<Self> {
        let length = frame_length(src)?;
        check_length!(src.len(), length);

        serde_json::from_slice(&src[LENGTH_PREFIX_LENGTH..length]).map_err(Error::Decode)
    }
}
