use std::time::Duration;

use block_exchange_protocol::{BlockResponse, Encode, FileInfoResponse, Request, WireMessage};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::buffer::ReadBuf;
use crate::{PeerAddress, PeerConfig, QueryErrorKind, RemoteQueryError, WithTimeout};

/// Queries a single neighbor. Every query uses its own short-lived connection.
#[derive(Debug, Clone)]
pub struct TransferClient {
    request_timeout: Duration,
    max_message_length: usize,
}

impl TransferClient {
    pub fn new(request_timeout: Duration, max_message_length: usize) -> Self {
        TransferClient {
            request_timeout,
            max_message_length,
        }
    }

    pub fn from_config(config: &PeerConfig) -> Self {
        TransferClient::new(config.request_timeout, config.max_message_length)
    }

    #[tracing::instrument(level = "error", err(level = "debug"), skip(self), fields(%peer))]
    pub async fn get_file_info(&self, peer: &PeerAddress, filename: &str) -> Result<FileInfoResponse, RemoteQueryError> {
        let request = Request::GetFileInfo {
            filename: filename.to_string(),
        };

        self.exchange(peer, &request).await
    }

    #[tracing::instrument(level = "error", err(level = "debug"), skip(self), fields(%peer))]
    pub async fn get_block(
        &self,
        peer: &PeerAddress,
        filename: &str,
        block_id: u32,
    ) -> Result<BlockResponse, RemoteQueryError> {
        let request = Request::GetBlock {
            filename: filename.to_string(),
            block_id,
        };

        self.exchange(peer, &request).await
    }

    async fn exchange<R>(&self, peer: &PeerAddress, request: &Request) -> Result<R, RemoteQueryError>
    where
        R: WireMessage + Send,
    {
        self.query(peer, request).await.map_err(|kind| RemoteQueryError {
            peer: peer.clone(),
            kind,
        })
    }

    async fn query<R>(&self, peer: &PeerAddress, request: &Request) -> Result<R, QueryErrorKind>
    where
        R: WireMessage + Send,
    {
        let mut stream = async {
            TcpStream::connect((peer.host(), peer.port()))
                .await
                .map_err(QueryErrorKind::Connect)
        }
        .with_timeout("connect", self.request_timeout)
        .await?;

        tracing::trace!("connected to a neighbor");

        let mut output = Vec::new();
        request.encode(&mut output).await?;
        stream
            .write_all(&output)
            .with_timeout("write request", self.request_timeout)
            .await?;

        let mut read_buf = ReadBuf::new(self.max_message_length);
        read_buf
            .read_message::<R, _>(&mut stream)
            .with_timeout("read response", self.request_timeout)
            .await
    }
}
