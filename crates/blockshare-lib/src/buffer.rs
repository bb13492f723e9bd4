use block_exchange_protocol::{frame_length, Decode, Error, WireMessage, LENGTH_PREFIX_LENGTH};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Accumulates bytes from a stream until a whole length-prefixed message is available
pub struct ReadBuf {
    inner: Vec<u8>,
    // Filled bytes
    offset: usize,
    max_message_length: usize,
}

impl ReadBuf {
    const DEFAULT_BUFFER_CAPACITY: usize = 4_096;

    pub fn new(max_message_length: usize) -> Self {
        ReadBuf {
            inner: vec![0; ReadBuf::DEFAULT_BUFFER_CAPACITY.min(max_message_length.max(LENGTH_PREFIX_LENGTH))],
            offset: 0,
            max_message_length,
        }
    }

    #[tracing::instrument(level = "trace", err(level = "debug"), skip_all)]
    pub async fn read_message<M, S>(&mut self, stream: &mut S) -> block_exchange_protocol::Result<M>
    where
        M: WireMessage,
        S: AsyncRead + Unpin,
    {
        loop {
            let expected_length = if self.offset >= LENGTH_PREFIX_LENGTH {
                let message_length = frame_length(&self.inner[..LENGTH_PREFIX_LENGTH])?;
                if message_length > self.max_message_length {
                    return Err(Error::MessageTooLarge {
                        length: message_length,
                        max: self.max_message_length,
                    });
                }

                if self.offset >= message_length {
                    return M::decode(&self.inner[..self.offset]);
                }

                // Account for messages that are larger than the default buffer (e.g. a huge block)
                if message_length > self.inner.len() {
                    tracing::trace!("resizing the buffer: {} -> {}", self.inner.len(), message_length);
                    self.inner.resize(message_length, 0);
                }

                message_length
            } else {
                LENGTH_PREFIX_LENGTH
            };

            let read = stream.read(&mut self.inner[self.offset..]).await?;
            if read == 0 {
                // The remote side closed the connection in the middle of a message
                return Err(Error::BadLength {
                    expected: expected_length,
                    got: self.offset,
                });
            }
            self.offset += read;
        }
    }
}
