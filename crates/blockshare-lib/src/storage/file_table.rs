use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::FileRecord;
use crate::{Error, Result};

pub type SharedRecord = Arc<RwLock<FileRecord>>;

/// How much of a file a peer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    pub held_blocks: usize,
    pub total_blocks: u32,
}

/// All files known to a peer.
///
/// Each record has its own lock, so the transfer server can keep serving blocks of one file while
/// a download is writing into another one (or into the same one).
/// Locking order: the table first, then a record.
#[derive(Debug, Default)]
pub struct FileTable {
    files: RwLock<HashMap<String, SharedRecord>>,
}

impl FileTable {
    pub fn new() -> Self {
        FileTable::default()
    }

    /// Registers a record, replacing a previous record with the same filename
    pub async fn insert(&self, record: FileRecord) -> SharedRecord {
        let filename = record.filename().to_string();
        let record = Arc::new(RwLock::new(record));

        self.files.write().await.insert(filename, record.clone());

        record
    }

    pub async fn get(&self, filename: &str) -> Option<SharedRecord> {
        self.files.read().await.get(filename).cloned()
    }

    /// Returns the record for `filename`, creating an empty one if the file is unknown.
    ///
    /// An existing record must describe the same file, otherwise blocks of two different files
    /// could end up mixed together.
    pub async fn get_or_create(&self, filename: &str, total_blocks: u32, content_hash: &str) -> Result<SharedRecord> {
        let mut files = self.files.write().await;

        if let Some(existing) = files.get(filename) {
            let record = existing.read().await;
            if record.total_blocks() != total_blocks || !record.content_hash().eq_ignore_ascii_case(content_hash) {
                return Err(Error::ConflictingFileInfo {
                    filename: filename.to_string(),
                    local_blocks: record.total_blocks(),
                    local_hash: record.content_hash().to_string(),
                    remote_blocks: total_blocks,
                    remote_hash: content_hash.to_string(),
                });
            }
            drop(record);

            return Ok(existing.clone());
        }

        let record = Arc::new(RwLock::new(FileRecord::new(filename, total_blocks, content_hash)));
        files.insert(filename.to_string(), record.clone());

        Ok(record)
    }

    /// A point-in-time view of how much of every known file is held
    pub async fn snapshot(&self) -> BTreeMap<String, FileStatus> {
        let files = self.files.read().await;

        let mut snapshot = BTreeMap::new();
        for (filename, record) in files.iter() {
            let record = record.read().await;
            snapshot.insert(
                filename.clone(),
                FileStatus {
                    held_blocks: record.held_blocks(),
                    total_blocks: record.total_blocks(),
                },
            );
        }

        snapshot
    }
}
