use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_BLOCK_SIZE: usize = 1024;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4 * 1024 * 1024;
/// 1 GiB worth of blocks with the default block size
pub const DEFAULT_MAX_TOTAL_BLOCKS: u32 = 1024 * 1024;

/// A `host:port` pair identifying a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        PeerAddress {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("expected an address in the 'host:port' form, got '{0}'")]
pub struct ParseAddressError(String);

impl FromStr for PeerAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(|| ParseAddressError(s.to_string()))?;
        let port = port.parse::<u16>().map_err(|_| ParseAddressError(s.to_string()))?;

        // IPv6 hosts are written as [::1]:8080
        let host = host
            .strip_prefix('[')
            .and_then(|host| host.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(ParseAddressError(s.to_string()));
        }

        Ok(PeerAddress::new(host, port))
    }
}

/// What to do when a block can't be fetched from the first neighbor that advertised it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Every missing block is requested from exactly one holder per download attempt
    #[default]
    SinglePass,
    /// Remaining holders are tried in neighbor order before the block is given up on
    RetryAlternateHolders,
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Where the transfer server listens
    pub bind_addr: PeerAddress,
    /// Size of every block except, possibly, the last one of a file
    pub block_size: usize,
    /// Statically configured neighbors. Their order is the tie-break order when several of them hold a block
    pub neighbors: Vec<PeerAddress>,
    /// Bounds connecting to a neighbor and waiting for its response, separately
    pub request_timeout: Duration,
    /// The largest single message that is accepted from the wire, length prefix included
    pub max_message_length: usize,
    /// Limits the number of inbound connections handled at once. Unbounded if not set
    pub max_connections: Option<NonZeroUsize>,
    pub fetch_policy: FetchPolicy,
    /// Advertisements of files with more blocks than this are ignored
    pub max_total_blocks: u32,
}

impl PeerConfig {
    pub fn new(bind_addr: PeerAddress, neighbors: Vec<PeerAddress>) -> Self {
        PeerConfig {
            bind_addr,
            block_size: DEFAULT_BLOCK_SIZE,
            neighbors,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            max_connections: None,
            fetch_policy: FetchPolicy::default(),
            max_total_blocks: DEFAULT_MAX_TOTAL_BLOCKS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("block size must be greater than zero"));
        }
        // A hex-encoded block plus some room for the JSON envelope must fit into a single message
        if self.block_size.saturating_mul(2).saturating_add(256) > self.max_message_length {
            return Err(Error::InvalidConfig("max message length is too small for the block size"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfig("request timeout must be greater than zero"));
        }
        if self.max_total_blocks == 0 {
            return Err(Error::InvalidConfig("max total blocks must be greater than zero"));
        }

        Ok(())
    }
}
