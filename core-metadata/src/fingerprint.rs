//! # Content Fingerprints
//!
//! Streams a file through a digest and returns the lowercase hex string
//! stored in `files.fingerprint`. Two files are duplicates exactly when
//! their fingerprints are equal.

use crate::error::{MetadataError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Read size used while streaming file contents.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Digest used for fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Length of the hex digest produced by this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::Blake3 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(MetadataError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum DigestState {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl DigestState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => DigestState::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => DigestState::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            DigestState::Sha256(hasher) => hasher.update(data),
            DigestState::Sha512(hasher) => hasher.update(data),
            DigestState::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            DigestState::Sha256(hasher) => format!("{:x}", hasher.finalize()),
            DigestState::Sha512(hasher) => format!("{:x}", hasher.finalize()),
            DigestState::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
        }
    }
}

/// Computes content fingerprints with a fixed algorithm.
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Build a hasher from a configured algorithm name.
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(Self::new(name.parse()?))
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Fingerprint the file at `path`.
    ///
    /// # Errors
    ///
    /// [`MetadataError::FileNotFound`] when the file disappeared, any other
    /// read failure as [`MetadataError::Io`].
    pub fn hash_file(&self, path: &Path) -> Result<String> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => MetadataError::FileNotFound(path.display().to_string()),
            _ => MetadataError::Io(e),
        })?;
        self.hash_reader(file)
    }

    /// Fingerprint everything `reader` yields.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> Result<String> {
        let mut state = DigestState::new(self.algorithm);
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            state.update(&buffer[..read]);
        }

        Ok(state.finalize_hex())
    }

    pub fn hash_bytes(&self, data: &[u8]) -> String {
        let mut state = DigestState::new(self.algorithm);
        state.update(data);
        state.finalize_hex()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_known_sha256_digest() {
        let hasher = ContentHasher::default();
        assert_eq!(
            hasher.hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_lengths() {
        for algorithm in [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha512,
            HashAlgorithm::Blake3,
        ] {
            let hash = ContentHasher::new(algorithm).hash_bytes(b"test data");
            assert_eq!(hash.len(), algorithm.hex_len(), "{}", algorithm);
            assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(hash, hash.to_lowercase());
        }
    }

    #[test]
    fn test_streaming_matches_single_shot() {
        let hasher = ContentHasher::new(HashAlgorithm::Blake3);
        let data = vec![7u8; CHUNK_SIZE * 2 + 17];
        assert_eq!(
            hasher.hash_reader(Cursor::new(&data)).unwrap(),
            hasher.hash_bytes(&data)
        );
    }

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        std::fs::write(&a, b"same").unwrap();
        std::fs::write(&b, b"same").unwrap();

        let hasher = ContentHasher::default();
        assert_eq!(hasher.hash_file(&a).unwrap(), hasher.hash_file(&b).unwrap());
        assert!(matches!(
            hasher.hash_file(&dir.path().join("missing.jpg")),
            Err(MetadataError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("blake3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        assert!(matches!(
            ContentHasher::from_name("md5"),
            Err(MetadataError::UnsupportedAlgorithm(_))
        ));
    }
}
