use super::FileRecord;
use crate::util::content_hash;
use crate::{Error, Result};

/// Reassembles a complete record and checks it against its advertised hash.
///
/// Returns the file contents only if they match, so callers can't persist an unverified file.
#[tracing::instrument(level = "debug", err, skip_all, fields(filename = record.filename()))]
pub fn verify(record: &FileRecord) -> Result<Vec<u8>> {
    let data = record.reassemble()?;

    let actual = content_hash(&data);
    if !actual.eq_ignore_ascii_case(record.content_hash()) {
        return Err(Error::Integrity {
            filename: record.filename().to_string(),
            expected: record.content_hash().to_string(),
            actual,
        });
    }

    Ok(data)
}
