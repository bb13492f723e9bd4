#[macro_use]
pub mod macros;

pub mod client;
pub mod config;
pub mod download;
pub mod peer;
pub mod server;
pub mod util;

mod buffer;
mod error;
mod storage;

use std::future::Future;
use std::time::Duration;

pub use client::TransferClient;
pub use config::{FetchPolicy, PeerAddress, PeerConfig};
pub use download::{DownloadReport, DownloadState, Downloader};
pub use error::{Error, QueryErrorKind, RemoteQueryError, Result};
pub use peer::{LoadedFile, Peer};
pub use server::TransferServer;
pub use storage::{verify, FileRecord, FileStatus, FileTable, SharedRecord};

pub trait WithTimeout<T, E> {
    fn with_timeout(
        self,
        name: &'static str,
        timeout: Duration,
    ) -> impl Future<Output = std::result::Result<T, QueryErrorKind>> + Send
    where
        Self: Future<Output = std::result::Result<T, E>>;
}

impl<F, T, E> WithTimeout<T, E> for F
where
    F: Future<Output = std::result::Result<T, E>> + Send,
    QueryErrorKind: From<E>,
{
    async fn with_timeout(self, name: &'static str, timeout: Duration) -> std::result::Result<T, QueryErrorKind> {
        match tokio::time::timeout(timeout, self).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(QueryErrorKind::Timeout {
                operation: name,
                timeout,
            }),
        }
    }
}
