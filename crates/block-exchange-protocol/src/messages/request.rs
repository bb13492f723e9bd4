use serde::{Deserialize, Serialize};

/// A request sent by a downloading peer. Exactly one request is sent per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Asks for the raw contents of a single block
    GetBlock { filename: String, block_id: u32 },
    /// Asks for the file's layout and the blocks that the remote peer currently holds
    GetFileInfo { filename: String },
}

impl Request {
    pub fn filename(&self) -> &str {
        match self {
            Request::GetBlock { filename, .. } | Request::GetFileInfo { filename } => filename,
        }
    }
}
