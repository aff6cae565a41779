//! Reproducibility Normalizer
//!
//! Works on finished archive bytes: every entry timestamp is overwritten with
//! one fixed date and the signature is recomputed, so the same tree built on
//! different machines yields the same file.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::hashing::SignatureAlgorithm;
use crate::phar::{append_signature, read_manifest, split_signature, PharError};

/// Rewrite all entry timestamps to `date` and re-sign with `signature`.
pub fn normalize(
    bytes: &[u8],
    date: DateTime<Utc>,
    signature: SignatureAlgorithm,
) -> Result<Vec<u8>, PharError> {
    let timestamp = u32::try_from(date.timestamp())
        .map_err(|_| PharError::TimestampOutOfRange(date.timestamp()))?;

    let (unsigned, _, _) = split_signature(bytes)?;
    let layout = read_manifest(unsigned)?;

    let mut out = unsigned.to_vec();
    for entry in &layout.entries {
        let at = entry.timestamp_offset;
        out[at..at + 4].copy_from_slice(&timestamp.to_le_bytes());
    }
    append_signature(&mut out, signature);
    Ok(out)
}

/// Normalize the archive at `path` in place.
pub fn resign(
    path: &Path,
    date: DateTime<Utc>,
    signature: SignatureAlgorithm,
) -> Result<(), PharError> {
    let io_err = |source| PharError::Io { path: path.to_path_buf(), source };
    let bytes = fs::read(path).map_err(io_err)?;
    let normalized = normalize(&bytes, date, signature)?;
    fs::write(path, normalized).map_err(io_err)?;

    info!(path = %path.display(), date = %date, %signature, "re-signed archive");
    Ok(())
}
