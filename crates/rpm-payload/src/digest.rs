//! File digests recorded for payload content.

use crate::resolve::Content;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error returned for an unsupported digest name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown digest algorithm '{0}', expected one of: MD5, SHA-224, SHA-256, SHA-384, SHA-512")]
pub struct UnknownDigestError(pub String);

/// Digest algorithm used for file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestAlgorithm {
    /// MD5, for compatibility with old package tooling.
    Md5,
    /// SHA-224.
    Sha224,
    /// SHA-256.
    #[default]
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Returns the canonical name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Hex digest of in-memory bytes.
    #[must_use]
    pub fn digest_bytes(self, data: &[u8]) -> String {
        match self {
            Self::Md5 => hex::encode(md5::Md5::digest(data)),
            Self::Sha224 => hex::encode(sha2::Sha224::digest(data)),
            Self::Sha256 => hex::encode(sha2::Sha256::digest(data)),
            Self::Sha384 => hex::encode(sha2::Sha384::digest(data)),
            Self::Sha512 => hex::encode(sha2::Sha512::digest(data)),
        }
    }

    /// Hex digest of everything a reader yields.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn digest_reader(self, reader: impl Read) -> io::Result<String> {
        match self {
            Self::Md5 => stream::<md5::Md5>(reader),
            Self::Sha224 => stream::<sha2::Sha224>(reader),
            Self::Sha256 => stream::<sha2::Sha256>(reader),
            Self::Sha384 => stream::<sha2::Sha384>(reader),
            Self::Sha512 => stream::<sha2::Sha512>(reader),
        }
    }
}

fn stream<D: Digest + io::Write>(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = UnknownDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "md5" => Ok(Self::Md5),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(UnknownDigestError(s.to_string())),
        }
    }
}

impl Serialize for DigestAlgorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DigestAlgorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Memoized digests of source files for one build.
#[derive(Debug, Default)]
pub struct DigestCache {
    digests: HashMap<(PathBuf, DigestAlgorithm), String>,
    hits: usize,
}

impl DigestCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest of a source file, read at most once per algorithm.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn file_digest(&mut self, path: &Path, algorithm: DigestAlgorithm) -> io::Result<String> {
        let key = (path.to_path_buf(), algorithm);
        if let Some(digest) = self.digests.get(&key) {
            self.hits += 1;
            return Ok(digest.clone());
        }

        let digest = algorithm.digest_reader(File::open(path)?)?;
        self.digests.insert(key, digest.clone());
        Ok(digest)
    }

    /// Digest of descriptor content. Only file paths and bytes have one.
    ///
    /// # Errors
    ///
    /// Returns an error if a source file cannot be read.
    pub fn content_digest(
        &mut self,
        content: &Content,
        algorithm: DigestAlgorithm,
    ) -> io::Result<Option<String>> {
        match content {
            Content::Path(path) => self.file_digest(path, algorithm).map(Some),
            Content::Bytes(bytes) => Ok(Some(algorithm.digest_bytes(bytes))),
            Content::LinkTarget(_) | Content::None => Ok(None),
        }
    }

    /// Number of cached file digests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Number of lookups answered from the cache.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits
    }
}
