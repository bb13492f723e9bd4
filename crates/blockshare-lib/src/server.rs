use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use block_exchange_protocol::{BlockResponse, Encode, FileInfoResponse, Request};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::buffer::ReadBuf;
use crate::{FileTable, PeerAddress, PeerConfig};

const LISTEN_BACKLOG: u32 = 1024;

/// Answers `get_block` and `get_file_info` requests from the local file table.
///
/// Every inbound connection carries exactly one request and gets exactly one response.
#[derive(Debug)]
pub struct TransferServer {
    listener: TcpListener,
    files: Arc<FileTable>,
    request_timeout: Duration,
    max_message_length: usize,
    max_connections: Option<NonZeroUsize>,
}

impl TransferServer {
    pub async fn bind(config: &PeerConfig, files: Arc<FileTable>) -> crate::Result<Self> {
        let listener = bind_listener(&config.bind_addr).await?;

        Ok(TransferServer {
            listener,
            files,
            request_timeout: config.request_timeout,
            max_message_length: config.max_message_length,
            max_connections: config.max_connections,
        })
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `cancel_rx` fires or its sender is dropped
    #[tracing::instrument(level = "error", err(level = "debug"), skip_all, fields(addr = ?self.listener.local_addr().ok()))]
    pub async fn run(self, mut cancel_rx: oneshot::Receiver<()>) -> anyhow::Result<()> {
        let mut handler_tasks = JoinSet::new();

        loop {
            let can_accept = self
                .max_connections
                .map_or(true, |max_connections| handler_tasks.len() < max_connections.get());

            tokio::select! {
                accepted = self.listener.accept(), if can_accept => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("failed to accept a connection: {}", e);
                            continue;
                        }
                    };

                    handler_tasks.spawn(handle_connection(
                        stream,
                        remote_addr,
                        self.files.clone(),
                        self.request_timeout,
                        self.max_message_length,
                    ));
                }
                Some(handler_result) = handler_tasks.join_next() => {
                    match handler_result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::debug!("an error happened while serving a connection: {:#}", e),
                        Err(e) => tracing::error!("bug: connection handler task panicked? {}", e),
                    }
                }
                _ = &mut cancel_rx => {
                    tracing::debug!("cancellation requested, no longer accepting connections");
                    break;
                }
            }
        }

        // Connections that were already accepted still get their response
        handler_tasks.detach_all();

        Ok(())
    }
}

async fn bind_listener(addr: &PeerAddress) -> crate::Result<TcpListener> {
    let socket_addr = tokio::net::lookup_host((addr.host(), addr.port()))
        .await?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, format!("can't resolve {}", addr)))?;

    let socket = if socket_addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    // Allows restarting a peer on the same port right away
    socket.set_reuseaddr(true)?;
    socket.bind(socket_addr)?;

    Ok(socket.listen(LISTEN_BACKLOG)?)
}

#[tracing::instrument(level = "error", err(level = "debug"), skip(stream, files, request_timeout, max_message_length))]
async fn handle_connection(
    mut stream: TcpStream,
    remote_addr: SocketAddr,
    files: Arc<FileTable>,
    request_timeout: Duration,
    max_message_length: usize,
) -> anyhow::Result<()> {
    let mut read_buf = ReadBuf::new(max_message_length);
    let request = match tokio::time::timeout(request_timeout, read_buf.read_message::<Request, _>(&mut stream)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) if e.is_decode_error() => {
            tracing::warn!("dropping a malformed request: {}", e);
            return Ok(());
        }
        Ok(Err(e)) => return Err(e).context("reading a request"),
        Err(_) => anyhow::bail!("no request received in {:?}", request_timeout),
    };

    tracing::debug!(?request, "received a request");

    let mut output = Vec::new();
    match request {
        Request::GetBlock { filename, block_id } => {
            block_response(&files, &filename, block_id).await.encode(&mut output).await?;
        }
        Request::GetFileInfo { filename } => {
            file_info_response(&files, &filename).await.encode(&mut output).await?;
        }
    }

    stream.write_all(&output).await.context("writing the response")?;
    stream.shutdown().await.context("closing the connection")?;

    Ok(())
}

pub(crate) async fn block_response(files: &FileTable, filename: &str, block_id: u32) -> BlockResponse {
    let Some(record) = files.get(filename).await else {
        return BlockResponse::NotFound;
    };

    let record = record.read().await;
    match record.block(block_id) {
        Some(block) => BlockResponse::Success {
            block_data: block.to_vec(),
        },
        None => BlockResponse::NotFound,
    }
}

pub(crate) async fn file_info_response(files: &FileTable, filename: &str) -> FileInfoResponse {
    let Some(record) = files.get(filename).await else {
        return FileInfoResponse::NotFound;
    };

    let record = record.read().await;
    FileInfoResponse::Success {
        total_blocks: record.total_blocks(),
        file_hash: record.content_hash().to_string(),
        available_blocks: record.available_blocks(),
    }
}

#[cfg(test)]
mod tests {
    use block_exchange_protocol::Decode;
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::FileRecord;

    async fn seeded_table() -> Arc<FileTable> {
        let files = Arc::new(FileTable::new());
        let mut partial = FileRecord::new("partial.bin", 3, "abcd");
        partial.insert_block(1, Bytes::from_static(b"middle")).unwrap();
        files.insert(partial).await;
        files
    }

    #[tokio::test]
    async fn answers_from_the_file_table() {
        let files = seeded_table().await;

        assert_eq!(
            block_response(&files, "partial.bin", 1).await,
            BlockResponse::Success {
                block_data: b"middle".to_vec()
            }
        );
        assert_eq!(
            file_info_response(&files, "partial.bin").await,
            FileInfoResponse::Success {
                total_blocks: 3,
                file_hash: "abcd".to_string(),
                available_blocks: vec![1],
            }
        );
    }

    #[tokio::test]
    async fn unknown_files_and_blocks_are_not_found() {
        let files = seeded_table().await;

        assert_eq!(block_response(&files, "partial.bin", 0).await, BlockResponse::NotFound);
        assert_eq!(block_response(&files, "partial.bin", 99).await, BlockResponse::NotFound);
        assert_eq!(block_response(&files, "missing.bin", 0).await, BlockResponse::NotFound);
        assert_eq!(file_info_response(&files, "missing.bin").await, FileInfoResponse::NotFound);
    }

    #[tokio::test]
    async fn survives_malformed_requests() {
        let files = seeded_table().await;
        let config = PeerConfig::new(PeerAddress::new("127.0.0.1", 0), vec![]);
        let server = TransferServer::bind(&config, files).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let server_task = tokio::spawn(server.run(cancel_rx));

        // Not JSON
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut garbage = 9u32.to_be_bytes().to_vec();
        garbage.extend_from_slice(b"not json!");
        stream.write_all(&garbage).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());

        // The server keeps answering afterwards
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut request = Vec::new();
        Request::GetBlock {
            filename: "partial.bin".to_string(),
            block_id: 1,
        }
        .encode(&mut request)
        .await
        .unwrap();
        stream.write_all(&request).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert_eq!(
            BlockResponse::decode(&response).unwrap(),
            BlockResponse::Success {
                block_data: b"middle".to_vec()
            }
        );

        cancel_tx.send(()).unwrap();
        server_task.await.unwrap().unwrap();
    }
}
