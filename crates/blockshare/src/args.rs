use std::num::NonZeroUsize;

use blockshare_lib::config::{DEFAULT_BLOCK_SIZE, DEFAULT_MAX_TOTAL_BLOCKS, DEFAULT_REQUEST_TIMEOUT};
use blockshare_lib::PeerAddress;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(version)]
pub struct Arguments {
    /// IP address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: String,
    /// Port to listen on
    #[arg(long)]
    pub port: u16,
    /// Neighbors to download from, e.g. 127.0.0.1:8080,127.0.0.1:8081
    #[arg(long, value_name = "HOST:PORT", value_delimiter = ',')]
    pub neighbors: Vec<PeerAddress>,
    /// Size of the blocks that loaded files are split into
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,
    /// How long to wait for a neighbor to connect and to respond
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    pub timeout_secs: u64,
    /// Maximum number of inbound connections served at once
    #[arg(long)]
    pub max_connections: Option<NonZeroUsize>,
    /// Try other neighbors that have a block when the first one fails to deliver it
    #[arg(long)]
    pub retry_alternates: bool,
    /// Files that neighbors advertise with more blocks than this are not downloaded
    #[arg(long, default_value_t = DEFAULT_MAX_TOTAL_BLOCKS)]
    pub max_total_blocks: u32,
}
