//! KN-005: Content checksums — sha256 (default) or BLAKE3.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Both supported digests are 256 bits.
const HEX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Blake3,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

/// An expected digest. Parsed from bare hex (sha256), `sha256:<hex>` or
/// `blake3:<hex>`; hex is stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: Algorithm,
    pub hex: String,
}

impl Checksum {
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (algorithm, hex) = match trimmed.split_once(':') {
            Some((prefix, hex)) if prefix.eq_ignore_ascii_case("sha256") => (Algorithm::Sha256, hex),
            Some((prefix, hex)) if prefix.eq_ignore_ascii_case("blake3") => (Algorithm::Blake3, hex),
            Some(_) => return Err(Error::InvalidChecksum(s.to_string())),
            None => (Algorithm::Sha256, trimmed),
        };
        if hex.len() != HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidChecksum(s.to_string()));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Whether a computed hex digest equals this checksum.
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual_hex)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// Incremental hasher over either algorithm.
pub enum Hasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => Self::Sha256(Sha256::new()),
            Algorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Hash a file's contents. Returns lowercase hex.
pub fn hash_file(path: &Path, algorithm: Algorithm) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

/// sha256 hex of a string.
pub fn sha256_hex(s: &str) -> String {
    format!("{:x}", Sha256::digest(s.as_bytes()))
}

/// Fail with [`Error::ChecksumMismatch`] unless `path` hashes to `expected`.
pub fn verify_file(path: &Path, expected: &Checksum) -> Result<()> {
    let actual = hash_file(path, expected.algorithm)?;
    if expected.matches(&actual) {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: format!("{}:{}", expected.algorithm, actual),
        })
    }
}
