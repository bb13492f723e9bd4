use serde::{Deserialize, Serialize};

/// Answer to [crate::Request::GetBlock]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockResponse {
    Success {
        /// Raw block bytes, hex-encoded on the wire
        #[serde(with = "hex::serde")]
        block_data: Vec<u8>,
    },
    /// Either the file or the requested block isn't held by the remote peer
    NotFound,
}

/// Answer to [crate::Request::GetFileInfo]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileInfoResponse {
    Success {
        total_blocks: u32,
        /// Hex-encoded SHA-256 of the whole file
        file_hash: String,
        /// Indexes of the blocks that the remote peer holds right now
        available_blocks: Vec<u32>,
    },
    NotFound,
}
