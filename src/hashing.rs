//! Hashing System - Signature Digests for Archives
//!
//! Provides the digests used to sign phar containers and to fingerprint
//! finished builds.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// Signature algorithms understood by the phar container.
///
/// SHA-1 is the default for compatibility with old PHP runtimes, not for
/// strength.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl SignatureAlgorithm {
    /// Flag written before the `GBMB` trailer.
    pub fn flag(self) -> u32 {
        match self {
            Self::Sha1 => 0x0002,
            Self::Sha256 => 0x0003,
            Self::Sha512 => 0x0004,
        }
    }

    pub fn from_flag(flag: u32) -> Option<Self> {
        match flag {
            0x0002 => Some(Self::Sha1),
            0x0003 => Some(Self::Sha256),
            0x0004 => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// CRC32 of an entry's uncompressed content, as stored in the manifest.
pub fn entry_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
