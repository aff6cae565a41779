//! Phar Container - Writer and Reader
//!
//! Layout (all integers little-endian u32 unless noted):
//!
//! ```text
//! stub ... __HALT_COMPILER(); ?>\r\n
//! manifest length | file count | api version (2 bytes) | global flags
//! alias length | alias | metadata length | metadata
//! per entry: name length | name | size | timestamp | compressed size
//!            | crc32 | flags | metadata length | metadata
//! entry bodies, in manifest order
//! digest | signature flag | "GBMB"
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

use crate::hashing::{entry_crc32, SignatureAlgorithm};
use crate::stub::HALT_COMPILER;

pub const API_VERSION: [u8; 2] = [0x11, 0x10];
pub const FLAG_SIGNED: u32 = 0x0001_0000;
/// Default permission bits of an entry (0666).
pub const ENTRY_PERMISSIONS: u32 = 0o666;
pub const SIGNATURE_MAGIC: &[u8; 4] = b"GBMB";
const STUB_CLOSE: &[u8] = b" ?>\r\n";

#[derive(Debug, Error)]
pub enum PharError {
    #[error("Stub must contain __HALT_COMPILER();")]
    InvalidStub,

    #[error("Cannot {action} while the archive is {state:?}")]
    InvalidState { action: &'static str, state: ArchiveState },

    #[error("Entry name too long: {0}")]
    NameTooLong(String),

    #[error("Entry too large for the container: {0}")]
    EntryTooLarge(String),

    #[error("Malformed archive: {0}")]
    Malformed(String),

    #[error("Unsupported signature flag {0:#06x}")]
    UnsupportedSignature(u32),

    #[error("Timestamp {0} does not fit the container")]
    TimestampOutOfRange(i64),

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle of an archive being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveState {
    Created,
    Buffering,
    Finalized,
    Resigned,
}

struct PendingEntry {
    name: String,
    content: Vec<u8>,
    timestamp: u32,
}

/// Writes a phar file. Entries keep insertion order; re-adding a name
/// replaces the content in place.
pub struct PharBuilder {
    path: PathBuf,
    alias: String,
    signature: SignatureAlgorithm,
    stub: Option<Vec<u8>>,
    entries: Vec<PendingEntry>,
    index: HashMap<String, usize>,
    state: ArchiveState,
}

impl PharBuilder {
    pub fn create(
        path: impl Into<PathBuf>,
        alias: impl Into<String>,
        signature: SignatureAlgorithm,
    ) -> Self {
        let path = path.into();
        debug!(path = %path.display(), %signature, "creating archive");
        Self {
            path,
            alias: alias.into(),
            signature,
            stub: None,
            entries: Vec::new(),
            index: HashMap::new(),
            state: ArchiveState::Created,
        }
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn start_buffering(&mut self) -> Result<(), PharError> {
        if self.state != ArchiveState::Created {
            return Err(PharError::InvalidState { action: "start buffering", state: self.state });
        }
        self.state = ArchiveState::Buffering;
        Ok(())
    }

    /// Add or replace an entry. Outside of buffering the file is rewritten
    /// immediately.
    pub fn add_from_string(&mut self, name: &str, content: impl Into<Vec<u8>>) -> Result<(), PharError> {
        let name = name.replace('\\', "/").trim_start_matches('/').to_string();
        let entry = PendingEntry {
            name: name.clone(),
            content: content.into(),
            timestamp: now_timestamp(),
        };
        match self.index.get(&name) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(name, self.entries.len());
                self.entries.push(entry);
            }
        }
        if self.state != ArchiveState::Buffering {
            self.flush()?;
        }
        Ok(())
    }

    pub fn set_stub(&mut self, stub: impl Into<Vec<u8>>) -> Result<(), PharError> {
        let stub = stub.into();
        find_ignore_case(&stub, HALT_COMPILER.as_bytes()).ok_or(PharError::InvalidStub)?;
        self.stub = Some(stub);
        if self.state != ArchiveState::Buffering {
            self.flush()?;
        }
        Ok(())
    }

    /// Write everything buffered so far and leave buffering mode.
    pub fn stop_buffering(&mut self) -> Result<(), PharError> {
        if self.state != ArchiveState::Buffering {
            return Err(PharError::InvalidState { action: "stop buffering", state: self.state });
        }
        self.flush()?;
        self.state = ArchiveState::Finalized;
        Ok(())
    }

    /// Release the archive, returning its path.
    pub fn close(self) -> Result<PathBuf, PharError> {
        if self.state == ArchiveState::Buffering {
            return Err(PharError::InvalidState { action: "close", state: self.state });
        }
        Ok(self.path)
    }

    fn flush(&mut self) -> Result<(), PharError> {
        let bytes = self.to_bytes()?;
        debug!(path = %self.path.display(), entries = self.entries.len(), bytes = bytes.len(), "flushing archive");
        fs::write(&self.path, bytes).map_err(|source| PharError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>, PharError> {
        let default_stub = format!("<?php {}", HALT_COMPILER).into_bytes();
        let stub = self.stub.as_deref().unwrap_or(default_stub.as_slice());
        let halt = find_ignore_case(stub, HALT_COMPILER.as_bytes()).ok_or(PharError::InvalidStub)?;

        let mut out = Vec::new();
        out.extend_from_slice(&stub[..halt + HALT_COMPILER.len()]);
        out.extend_from_slice(STUB_CLOSE);

        let mut manifest = Vec::new();
        put_u32(&mut manifest, len_u32(self.entries.len(), "file count")?);
        manifest.extend_from_slice(&API_VERSION);
        put_u32(&mut manifest, FLAG_SIGNED);
        put_u32(&mut manifest, len_u32(self.alias.len(), &self.alias)?);
        manifest.extend_from_slice(self.alias.as_bytes());
        put_u32(&mut manifest, 0);

        for entry in &self.entries {
            let name_len = u32::try_from(entry.name.len())
                .map_err(|_| PharError::NameTooLong(entry.name.clone()))?;
            let size = u32::try_from(entry.content.len())
                .map_err(|_| PharError::EntryTooLarge(entry.name.clone()))?;
            put_u32(&mut manifest, name_len);
            manifest.extend_from_slice(entry.name.as_bytes());
            put_u32(&mut manifest, size);
            put_u32(&mut manifest, entry.timestamp);
            put_u32(&mut manifest, size);
            put_u32(&mut manifest, entry_crc32(&entry.content));
            put_u32(&mut manifest, ENTRY_PERMISSIONS);
            put_u32(&mut manifest, 0);
        }

        put_u32(&mut out, len_u32(manifest.len(), "manifest")?);
        out.extend_from_slice(&manifest);
        for entry in &self.entries {
            out.extend_from_slice(&entry.content);
        }

        append_signature(&mut out, self.signature);
        Ok(out)
    }
}

/// Digest everything so far and append the signature trailer.
pub fn append_signature(out: &mut Vec<u8>, signature: SignatureAlgorithm) {
    let digest = signature.digest(out);
    out.extend_from_slice(&digest);
    put_u32(out, signature.flag());
    out.extend_from_slice(SIGNATURE_MAGIC);
}

fn now_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

fn len_u32(len: usize, what: &str) -> Result<u32, PharError> {
    u32::try_from(len).map_err(|_| PharError::EntryTooLarge(what.to_string()))
}

pub(crate) fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

// --- Reading ---

/// Byte-level cursor over a container.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pub(crate) pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    pub(crate) fn u32(&mut self, what: &str) -> Result<u32, PharError> {
        let raw = self.take(4, what)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub(crate) fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], PharError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| PharError::Malformed(format!("truncated {}", what)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// Where the manifest of a container sits and where each entry's fields are.
pub(crate) struct ManifestLayout {
    pub(crate) stub_len: usize,
    pub(crate) alias: String,
    pub(crate) entries: Vec<EntryLayout>,
    /// Offset of the first entry body.
    pub(crate) data_start: usize,
}

pub(crate) struct EntryLayout {
    pub(crate) name: String,
    pub(crate) size: u32,
    pub(crate) timestamp: u32,
    pub(crate) timestamp_offset: usize,
    pub(crate) compressed_size: u32,
    pub(crate) crc32: u32,
    pub(crate) flags: u32,
}

/// Find the end of the stub: the halt marker, an optional ` ?>`, and an
/// optional line break.
pub(crate) fn stub_end(bytes: &[u8]) -> Result<usize, PharError> {
    let halt = find_ignore_case(bytes, HALT_COMPILER.as_bytes())
        .ok_or_else(|| PharError::Malformed("no __HALT_COMPILER(); marker".to_string()))?;
    let mut pos = halt + HALT_COMPILER.len();
    if bytes[pos..].starts_with(b" ?>") {
        pos += 3;
    }
    if bytes[pos..].starts_with(b"\r\n") {
        pos += 2;
    } else if bytes[pos..].starts_with(b"\n") {
        pos += 1;
    }
    Ok(pos)
}

pub(crate) fn read_manifest(bytes: &[u8]) -> Result<ManifestLayout, PharError> {
    let stub_len = stub_end(bytes)?;
    let mut cur = Cursor::new(bytes, stub_len);

    let manifest_len = cur.u32("manifest length")? as usize;
    let manifest_end = cur
        .pos
        .checked_add(manifest_len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| PharError::Malformed("manifest length exceeds file".to_string()))?;

    let count = cur.u32("file count")?;
    cur.take(2, "api version")?;
    cur.u32("global flags")?;
    let alias_len = cur.u32("alias length")? as usize;
    let alias = String::from_utf8_lossy(cur.take(alias_len, "alias")?).into_owned();
    let meta_len = cur.u32("metadata length")? as usize;
    cur.take(meta_len, "metadata")?;

    let mut entries = Vec::new();
    while cur.pos < manifest_end {
        let name_len = cur.u32("entry name length")? as usize;
        let name = String::from_utf8_lossy(cur.take(name_len, "entry name")?).into_owned();
        let size = cur.u32("entry size")?;
        let timestamp_offset = cur.pos;
        let timestamp = cur.u32("entry timestamp")?;
        let compressed_size = cur.u32("entry compressed size")?;
        let crc32 = cur.u32("entry crc32")?;
        let flags = cur.u32("entry flags")?;
        let meta_len = cur.u32("entry metadata length")? as usize;
        cur.take(meta_len, "entry metadata")?;
        entries.push(EntryLayout {
            name,
            size,
            timestamp,
            timestamp_offset,
            compressed_size,
            crc32,
            flags,
        });
    }

    if cur.pos != manifest_end || entries.len() != count as usize {
        return Err(PharError::Malformed(format!(
            "manifest declares {} entries, found {}",
            count,
            entries.len()
        )));
    }

    Ok(ManifestLayout {
        stub_len,
        alias,
        entries,
        data_start: manifest_end,
    })
}

/// Split a signed container into (signed bytes, algorithm, stored digest).
pub(crate) fn split_signature(bytes: &[u8]) -> Result<(&[u8], SignatureAlgorithm, &[u8]), PharError> {
    if bytes.len() < 8 || &bytes[bytes.len() - 4..] != SIGNATURE_MAGIC {
        return Err(PharError::Malformed("missing GBMB signature trailer".to_string()));
    }
    let flag = u32::from_le_bytes([
        bytes[bytes.len() - 8],
        bytes[bytes.len() - 7],
        bytes[bytes.len() - 6],
        bytes[bytes.len() - 5],
    ]);
    let algo = SignatureAlgorithm::from_flag(flag).ok_or(PharError::UnsupportedSignature(flag))?;
    let sig_start = (bytes.len() - 8)
        .checked_sub(algo.digest_len())
        .ok_or_else(|| PharError::Malformed("signature longer than archive".to_string()))?;
    Ok((&bytes[..sig_start], algo, &bytes[sig_start..bytes.len() - 8]))
}

/// One entry read back from a container.
#[derive(Debug, Clone, Serialize)]
pub struct PharEntry {
    pub name: String,
    pub size: u32,
    pub timestamp: u32,
    pub crc32: u32,
    pub crc_valid: bool,
    pub flags: u32,
    #[serde(skip)]
    pub content: Vec<u8>,
}

/// A parsed container.
#[derive(Debug, Clone, Serialize)]
pub struct PharArchive {
    #[serde(skip)]
    pub stub: Vec<u8>,
    pub alias: String,
    pub signature: SignatureAlgorithm,
    pub signature_valid: bool,
    pub entries: Vec<PharEntry>,
}

impl PharArchive {
    pub fn open(path: &Path) -> Result<Self, PharError> {
        let bytes = fs::read(path).map_err(|source| PharError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, PharError> {
        let (signed, signature, digest) = split_signature(bytes)?;
        let layout = read_manifest(signed)?;

        let mut cur = Cursor::new(signed, layout.data_start);
        let mut entries = Vec::with_capacity(layout.entries.len());
        for e in layout.entries {
            if e.compressed_size != e.size {
                return Err(PharError::Malformed(format!("compressed entry {} is not supported", e.name)));
            }
            let content = cur.take(e.size as usize, &e.name)?.to_vec();
            let crc_valid = entry_crc32(&content) == e.crc32;
            if !crc_valid {
                warn!(entry = %e.name, "CRC mismatch");
            }
            entries.push(PharEntry {
                name: e.name,
                size: e.size,
                timestamp: e.timestamp,
                crc32: e.crc32,
                crc_valid,
                flags: e.flags,
                content,
            });
        }
        if cur.pos != signed.len() {
            return Err(PharError::Malformed("trailing bytes before signature".to_string()));
        }

        Ok(Self {
            stub: signed[..layout.stub_len].to_vec(),
            alias: layout.alias,
            signature,
            signature_valid: signature.digest(signed) == digest,
            entries,
        })
    }

    /// Signature matches and every entry body matches its CRC.
    pub fn is_intact(&self) -> bool {
        self.signature_valid && self.entries.iter().all(|e| e.crc_valid)
    }

    pub fn entry(&self, name: &str) -> Option<&PharEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}
