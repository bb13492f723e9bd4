use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `data`
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();

    hasher.update(data);

    hex::encode(hasher.finalize())
}

pub fn number_of_blocks(total_length: usize, block_size: usize) -> usize {
    // Round upwards
    total_length / block_size + (total_length % block_size != 0) as usize
}
