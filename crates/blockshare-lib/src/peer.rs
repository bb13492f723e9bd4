use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument as _;

use crate::{
    DownloadReport, Downloader, Error, FileRecord, FileStatus, FileTable, PeerConfig, Result, TransferClient,
    TransferServer,
};

/// A file that was fragmented and registered for sharing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFile {
    pub filename: String,
    pub total_blocks: u32,
    pub content_hash: String,
}

/// A running peer: the transfer server in the background plus the operations that the shell calls
#[derive(Debug)]
pub struct Peer {
    config: PeerConfig,
    files: Arc<FileTable>,
    client: TransferClient,
    local_addr: SocketAddr,
    server_task: Option<(oneshot::Sender<()>, JoinHandle<anyhow::Result<()>>)>,
}

impl Peer {
    /// Binds the listener and starts serving requests in the background
    #[tracing::instrument(level = "error", err, skip_all, fields(bind_addr = %config.bind_addr))]
    pub async fn start(config: PeerConfig) -> Result<Self> {
        config.validate()?;

        let files = Arc::new(FileTable::new());
        let server = TransferServer::bind(&config, files.clone()).await?;
        let local_addr = server.local_addr()?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let server_task = tokio::spawn(server.run(cancel_rx).in_current_span());

        tracing::info!(%local_addr, neighbors = config.neighbors.len(), "peer started");

        Ok(Peer {
            client: TransferClient::from_config(&config),
            config,
            files,
            local_addr,
            server_task: Some((cancel_tx, server_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// The peer's file table. Shared with the transfer server.
    pub fn files(&self) -> &Arc<FileTable> {
        &self.files
    }

    /// Fragments a file from disk and shares it under its base name
    #[tracing::instrument(level = "error", err, skip(self))]
    pub async fn load(&self, path: &Path) -> Result<LoadedFile> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))?
            .to_string();

        let data = tokio::fs::read(path).await?;

        self.share(filename, &data).await
    }

    /// Fragments in-memory contents and shares them as `filename`. Replaces a file with the same name.
    pub async fn share(&self, filename: String, data: &[u8]) -> Result<LoadedFile> {
        let record = FileRecord::fragment(filename, data, self.config.block_size)?;
        let loaded = LoadedFile {
            filename: record.filename().to_string(),
            total_blocks: record.total_blocks(),
            content_hash: record.content_hash().to_string(),
        };

        self.files.insert(record).await;
        tracing::info!(
            filename = %loaded.filename,
            total_blocks = loaded.total_blocks,
            content_hash = %loaded.content_hash,
            "file loaded"
        );

        Ok(loaded)
    }

    /// Downloads a file from the neighbors. `output` defaults to the filename in the working directory.
    pub async fn download(&self, filename: &str, output: Option<&Path>) -> Result<DownloadReport> {
        let output = output.map_or_else(|| PathBuf::from(filename), Path::to_path_buf);

        Downloader::new(&self.files, &self.client, &self.config)
            .download(filename, &output)
            .await
    }

    pub async fn status(&self) -> BTreeMap<String, FileStatus> {
        self.files.snapshot().await
    }

    /// Stops accepting connections. Does nothing if the peer is already stopped.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        let Some((cancel_tx, server_task)) = self.server_task.take() else {
            return Ok(());
        };

        // The server may have exited on its own, in which case there is nobody to notify
        let _ = cancel_tx.send(());

        server_task
            .await
            .context("bug: transfer server task panicked?")?
            .context("error while running the transfer server")?;

        tracing::info!(local_addr = %self.local_addr, "peer stopped");

        Ok(())
    }
}
