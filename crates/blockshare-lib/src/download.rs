use std::path::{Path, PathBuf};

use bitvec::order::Msb0;
use bitvec::vec::BitVec;
use block_exchange_protocol::{BlockResponse, FileInfoResponse};
use bytes::Bytes;
use tokio::fs;
use tokio::task::JoinSet;

use crate::storage::verify;
use crate::{
    Error, FetchPolicy, FileRecord, FileTable, PeerAddress, PeerConfig, QueryErrorKind, Result, SharedRecord,
    TransferClient,
};

/// States of a single download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Discovering,
    Fetching,
    Verifying,
    Complete,
    Failed,
}

/// Summary of a successful download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub filename: String,
    pub total_blocks: u32,
    /// Blocks that were fetched during this attempt, the rest were already held locally
    pub fetched_blocks: usize,
    /// How many blocks every neighbor contributed, in neighbor order
    pub sources: Vec<(PeerAddress, usize)>,
    pub output: PathBuf,
}

/// File layout as advertised by a neighbor
#[derive(Debug, Clone, PartialEq, Eq)]
struct Advertisement {
    total_blocks: u32,
    file_hash: String,
}

/// Blocks that a neighbor claimed to have at discovery time
#[derive(Debug)]
struct Availability {
    peer: PeerAddress,
    blocks: BitVec<u8, Msb0>,
    /// Number of blocks fetched from this neighbor
    fetched: usize,
}

/// Drives a download of one file from the configured neighbors into the local file table
#[derive(Debug)]
pub struct Downloader<'a> {
    files: &'a FileTable,
    client: &'a TransferClient,
    config: &'a PeerConfig,
}

impl<'a> Downloader<'a> {
    pub fn new(files: &'a FileTable, client: &'a TransferClient, config: &'a PeerConfig) -> Self {
        Downloader { files, client, config }
    }

    /// Downloads `filename` and writes it to `output` once its hash is verified.
    ///
    /// Nothing is written to `output` unless the download completes.
    #[tracing::instrument(level = "error", skip(self), fields(output = %output.display()))]
    pub async fn download(&self, filename: &str, output: &Path) -> Result<DownloadReport> {
        match self.run(filename, output).await {
            Ok(report) => {
                tracing::info!(
                    state = ?DownloadState::Complete,
                    fetched = report.fetched_blocks,
                    total = report.total_blocks,
                    "file saved (hash verified)"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(state = ?DownloadState::Failed, "download failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run(&self, filename: &str, output: &Path) -> Result<DownloadReport> {
        tracing::info!(state = ?DownloadState::Discovering, neighbors = self.config.neighbors.len(), "looking for the file");
        let responses = self.discover(filename).await;
        let Some((advertisement, mut availability)) =
            select_advertisement(&self.config.neighbors, responses, self.config.max_total_blocks)
        else {
            return Err(Error::FileNotFound {
                filename: filename.to_string(),
            });
        };

        let record = self
            .files
            .get_or_create(filename, advertisement.total_blocks, &advertisement.file_hash)
            .await?;

        let missing = record.read().await.missing_blocks();
        tracing::info!(
            state = ?DownloadState::Fetching,
            missing = missing.len(),
            total = advertisement.total_blocks,
            holders = availability.len(),
            "fetching missing blocks"
        );
        let fetched = self.fetch(filename, &record, &missing, &mut availability).await?;

        tracing::info!(state = ?DownloadState::Verifying, "verifying the file");
        let data = {
            let mut record = record.write().await;
            if !record.is_complete() {
                return Err(Error::IncompleteDownload {
                    filename: filename.to_string(),
                    have: record.held_blocks(),
                    total: record.total_blocks(),
                    missing: record.missing_blocks(),
                });
            }

            match verify(&record) {
                Ok(data) => data,
                Err(e) => {
                    // Any held block may be the bad one, including those kept from earlier attempts.
                    // Start over with the same layout so that they aren't served to anyone either.
                    *record = FileRecord::new(filename, advertisement.total_blocks, &advertisement.file_hash);
                    return Err(e);
                }
            }
        };

        persist(output, &data).await?;

        Ok(DownloadReport {
            filename: filename.to_string(),
            total_blocks: advertisement.total_blocks,
            fetched_blocks: fetched.len(),
            sources: availability
                .into_iter()
                .map(|holder| (holder.peer, holder.fetched))
                .collect(),
            output: output.to_path_buf(),
        })
    }

    /// Asks every neighbor about the file at once. Responses are returned in neighbor order.
    async fn discover(&self, filename: &str) -> Vec<Option<FileInfoResponse>> {
        let neighbors = &self.config.neighbors;
        let mut queries = JoinSet::new();
        for (idx, peer) in neighbors.iter().enumerate() {
            let client = self.client.clone();
            let peer = peer.clone();
            let filename = filename.to_string();
            queries.spawn(async move { (idx, client.get_file_info(&peer, &filename).await) });
        }

        let mut responses = vec![None; neighbors.len()];
        while let Some(result) = queries.join_next().await {
            match result {
                Ok((idx, Ok(response))) => responses[idx] = Some(response),
                Ok((idx, Err(e))) => {
                    tracing::warn!(peer = %neighbors[idx], "neighbor is treated as having nothing: {}", e.kind)
                }
                Err(e) => tracing::error!("bug: file info query task panicked? {}", e),
            }
        }

        responses
    }

    /// Makes a single pass over the missing blocks. Returns indexes of the fetched ones.
    async fn fetch(
        &self,
        filename: &str,
        record: &SharedRecord,
        missing: &[u32],
        availability: &mut [Availability],
    ) -> Result<Vec<u32>> {
        let total_blocks = record.read().await.total_blocks();
        let mut fetched = Vec::with_capacity(missing.len());

        for &index in missing.iter() {
            let mut attempted = false;
            for holder in availability.iter_mut() {
                if !holder.blocks.get(index as usize).as_deref().is_some_and(|&has| has) {
                    continue;
                }
                if attempted && self.config.fetch_policy == FetchPolicy::SinglePass {
                    break;
                }
                attempted = true;

                match self.client.get_block(&holder.peer, filename, index).await {
                    Ok(BlockResponse::Success { block_data })
                        if !has_expected_length(index, total_blocks, block_data.len(), self.config.block_size) =>
                    {
                        tracing::warn!(
                            index,
                            peer = %holder.peer,
                            length = block_data.len(),
                            "neighbor sent a block of unexpected length, discarding it"
                        );
                    }
                    Ok(BlockResponse::Success { block_data }) => {
                        record.write().await.insert_block(index, Bytes::from(block_data))?;
                        holder.fetched += 1;
                        fetched.push(index);
                        tracing::debug!(index, peer = %holder.peer, "block downloaded");
                        break;
                    }
                    Ok(BlockResponse::NotFound) => {
                        tracing::warn!(index, peer = %holder.peer, "neighbor no longer has the block");
                    }
                    Err(e) => log_block_failure(index, &holder.peer, &e.kind),
                }
            }

            if !attempted {
                tracing::warn!(index, "no neighbor has the block");
            }
        }

        Ok(fetched)
    }
}

fn log_block_failure(index: u32, peer: &PeerAddress, e: &QueryErrorKind) {
    tracing::warn!(index, %peer, "failed to fetch the block: {}", e);
}

/// Every block of a file has `block_size` bytes, except the last one, which may be shorter
fn has_expected_length(index: u32, total_blocks: u32, length: usize, block_size: usize) -> bool {
    if index + 1 == total_blocks {
        length > 0 && length <= block_size
    } else {
        length == block_size
    }
}

/// Picks the layout of the first neighbor (in neighbor order) that has the file and collects
/// the blocks of every neighbor that agrees with it.
fn select_advertisement(
    neighbors: &[PeerAddress],
    responses: Vec<Option<FileInfoResponse>>,
    max_total_blocks: u32,
) -> Option<(Advertisement, Vec<Availability>)> {
    let mut selected: Option<Advertisement> = None;
    let mut availability = Vec::new();

    for (peer, response) in neighbors.iter().zip(responses) {
        let Some(FileInfoResponse::Success {
            total_blocks,
            file_hash,
            available_blocks,
        }) = response
        else {
            continue;
        };

        if total_blocks == 0 {
            tracing::warn!(%peer, "neighbor advertised a file without blocks, ignoring it");
            continue;
        }
        if total_blocks > max_total_blocks {
            tracing::warn!(%peer, total_blocks, max_total_blocks, "neighbor advertised too many blocks, ignoring it");
            continue;
        }

        let advertisement = Advertisement {
            total_blocks,
            file_hash,
        };
        let selected = selected.get_or_insert_with(|| advertisement.clone());
        if selected.total_blocks != advertisement.total_blocks
            || !selected.file_hash.eq_ignore_ascii_case(&advertisement.file_hash)
        {
            tracing::warn!(
                %peer,
                total_blocks = advertisement.total_blocks,
                file_hash = %advertisement.file_hash,
                "neighbor advertises a different version of the file, ignoring it"
            );
            continue;
        }

        let mut blocks: BitVec<u8, Msb0> = BitVec::repeat(false, total_blocks as usize);
        for index in available_blocks {
            // Indexes past the end would never be inserted anyway
            if let Some(mut bit) = blocks.get_mut(index as usize) {
                *bit = true;
            }
        }

        availability.push(Availability {
            peer: peer.clone(),
            blocks,
            fetched: 0,
        });
    }

    selected.map(|advertisement| (advertisement, availability))
}

/// Writes the file next to its final location first, so that a failed write never leaves a
/// partial file at `output`
async fn persist(output: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut partial = output.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let written = match fs::write(&partial, data).await {
        Ok(()) => fs::rename(&partial, output).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(cleanup_error) = fs::remove_file(&partial).await {
            tracing::debug!(partial = %partial.display(), "failed to remove a partial file: {}", cleanup_error);
        }
        return Err(e.into());
    }

    Ok(())
}
