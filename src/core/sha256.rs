//! SHA-256 identities for scanned content.
//!
//! The verdict service keys every file on its SHA-256 digest. This module
//! provides the `Sha256` newtype, which guarantees that a contained value is
//! a well-formed 64-character lowercase hex string, plus helpers to digest
//! bytes, readers, and files.

use crate::core::error::{VerdictError, VerdictResult};

use sha2::Digest;
use std::fmt;
use std::io::Read;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A SHA-256 hash in its canonical lowercase hexadecimal form.
///
/// Construction always validates, so holding a `Sha256` means holding a
/// well-formed digest. Uppercase input is accepted and normalized.
///
/// # Examples
///
/// ```rust
/// use verdictwire::Sha256;
///
/// let sha256: Sha256 =
///     "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f".parse()?;
/// assert_eq!(sha256.len(), 64);
/// # Ok::<(), verdictwire::VerdictError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sha256(String);

impl Sha256 {
    /// Digests the file at `path`.
    ///
    /// The file is streamed in 64 KiB chunks, so arbitrarily large files can
    /// be hashed without loading them into memory.
    pub fn digest_file(path: &Path) -> VerdictResult<Self> {
        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(file);
        Self::digest_reader(&mut reader)
    }

    /// Digests all bytes from a synchronous reader in a single pass.
    pub fn digest_reader<R: Read>(reader: &mut R) -> VerdictResult<Self> {
        let mut hasher = sha2::Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(Self::from_digest(&hasher.finalize()))
    }

    /// Asynchronously digests the file at `path`.
    pub async fn digest_file_async(path: &Path) -> VerdictResult<Self> {
        use tokio::io::AsyncReadExt;

        let file = tokio::fs::File::open(path).await?;
        let mut reader = tokio::io::BufReader::new(file);
        let mut hasher = sha2::Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let bytes_read = reader.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(Self::from_digest(&hasher.finalize()))
    }

    fn from_digest(digest: &[u8]) -> Self {
        use std::fmt::Write;

        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Returns the digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&[u8]> for Sha256 {
    fn from(data: &[u8]) -> Self {
        let mut hasher = sha2::Sha256::new();
        hasher.update(data);
        Self::from_digest(&hasher.finalize())
    }
}

impl TryFrom<&str> for Sha256 {
    type Error = VerdictError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(VerdictError::invalid_argument(format!(
                "not a valid SHA-256 hash: '{value}'"
            )));
        }
        Ok(Self(value.to_lowercase()))
    }
}

impl FromStr for Sha256 {
    type Err = VerdictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

impl TryFrom<&Path> for Sha256 {
    type Error = VerdictError;

    fn try_from(path: &Path) -> Result<Self, Self::Error> {
        Self::digest_file(path)
    }
}

impl TryFrom<&PathBuf> for Sha256 {
    type Error = VerdictError;

    fn try_from(path: &PathBuf) -> Result<Self, Self::Error> {
        Self::digest_file(path)
    }
}

impl Deref for Sha256 {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
