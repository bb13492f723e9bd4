mod file_table;
mod verifier;

use std::collections::BTreeMap;

use bytes::Bytes;

pub use file_table::{FileStatus, FileTable, SharedRecord};
pub use verifier::verify;

use crate::util::{content_hash, number_of_blocks};
use crate::{Error, Result};

/// One named file known to a peer, either as a source or as an (in-progress) download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    filename: String,
    total_blocks: u32,
    /// Hex-encoded SHA-256 of the whole file
    content_hash: String,
    /// Only contains blocks that are already held
    blocks: BTreeMap<u32, Bytes>,
}

impl FileRecord {
    /// Creates a record without any blocks, e.g. for a file that is about to be downloaded
    pub fn new(filename: impl Into<String>, total_blocks: u32, content_hash: impl Into<String>) -> Self {
        FileRecord {
            filename: filename.into(),
            total_blocks,
            content_hash: content_hash.into(),
            blocks: BTreeMap::new(),
        }
    }

    /// Splits `data` into consecutive blocks of `block_size` bytes. The last block may be shorter.
    #[tracing::instrument(level = "debug", err, skip(data), fields(length = data.len()))]
    pub fn fragment(filename: impl Into<String> + std::fmt::Debug, data: &[u8], block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidConfig("block size must be greater than zero"));
        }
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }

        let total_blocks = try_into!(number_of_blocks(data.len(), block_size), u32)?;
        let mut record = FileRecord::new(filename, total_blocks, content_hash(data));
        for (index, chunk) in (0..total_blocks).zip(data.chunks(block_size)) {
            record.blocks.insert(index, Bytes::copy_from_slice(chunk));
        }

        Ok(record)
    }

    /// Stores a block, replacing the previous data at the same index if there was any
    pub fn insert_block(&mut self, index: u32, data: Bytes) -> Result<()> {
        if index >= self.total_blocks {
            return Err(Error::InvalidBlockIndex {
                index,
                total: self.total_blocks,
            });
        }

        self.blocks.insert(index, data);

        Ok(())
    }

    /// Concatenates all blocks in order
    pub fn reassemble(&self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(Error::IncompleteRecord {
                filename: self.filename.clone(),
                missing: self.missing_blocks(),
            });
        }

        let mut data = Vec::with_capacity(self.blocks.values().map(Bytes::len).sum());
        for block in self.blocks.values() {
            data.extend_from_slice(block);
        }

        Ok(data)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn block(&self, index: u32) -> Option<&Bytes> {
        self.blocks.get(&index)
    }

    pub fn held_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Indexes of held blocks in ascending order
    pub fn available_blocks(&self) -> Vec<u32> {
        self.blocks.keys().copied().collect()
    }

    /// Indexes of blocks that aren't held yet, in ascending order
    pub fn missing_blocks(&self) -> Vec<u32> {
        (0..self.total_blocks)
            .filter(|index| !self.blocks.contains_key(index))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        // Indexes are validated on insertion, so this can't be satisfied by bogus blocks
        self.blocks.len() == self.total_blocks as usize
    }
}
