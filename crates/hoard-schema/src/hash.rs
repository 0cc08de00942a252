//! Archive integrity (SRI) and per-file content hashes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

/// Errors produced while parsing an integrity string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// The string has no `<algorithm>-<digest>` separator.
    #[error("Invalid integrity '{0}': expected '<algorithm>-<base64 digest>'")]
    Malformed(String),

    /// The algorithm prefix is not one the store can verify.
    #[error("Unsupported integrity algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// The digest is not valid base64 or has the wrong length.
    #[error("Invalid {algorithm} digest in '{input}'")]
    BadDigest {
        /// Algorithm named by the prefix.
        algorithm: &'static str,
        /// The full input string.
        input: String,
    },
}

/// Hash algorithms accepted in tarball integrity strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityAlgorithm {
    /// SHA-256 (32 byte digest).
    Sha256,
    /// SHA-512 (64 byte digest), what registries publish today.
    Sha512,
}

impl IntegrityAlgorithm {
    /// Prefix used in the textual form, e.g. `sha512`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }
}

/// A subresource-integrity string such as `sha512-<base64>`.
///
/// This is what a registry resolution carries to pin the exact archive bytes.
/// Parsing validates the digest length, so an `Integrity` that exists is
/// always comparable against a freshly computed one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Integrity {
    algorithm: IntegrityAlgorithm,
    digest: Vec<u8>,
}

impl Integrity {
    /// Parse an integrity string.
    ///
    /// # Errors
    ///
    /// Returns an [`IntegrityError`] if the string is malformed, names an
    /// unsupported algorithm, or carries a digest of the wrong length.
    pub fn parse(s: &str) -> Result<Self, IntegrityError> {
        let (algorithm, encoded) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| IntegrityError::Malformed(s.to_string()))?;

        let algorithm = match algorithm {
            "sha256" => IntegrityAlgorithm::Sha256,
            "sha512" => IntegrityAlgorithm::Sha512,
            other => return Err(IntegrityError::UnsupportedAlgorithm(other.to_string())),
        };

        let digest = STANDARD
            .decode(encoded)
            .ok()
            .filter(|d| d.len() == algorithm.digest_len())
            .ok_or_else(|| IntegrityError::BadDigest {
                algorithm: algorithm.as_str(),
                input: s.to_string(),
            })?;

        Ok(Self { algorithm, digest })
    }

    /// Compute the integrity of `data` with the given algorithm.
    pub fn compute(algorithm: IntegrityAlgorithm, data: &[u8]) -> Self {
        let mut hasher = IntegrityHasher::new(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    /// The algorithm this integrity was produced with.
    pub fn algorithm(&self) -> IntegrityAlgorithm {
        self.algorithm
    }
}

impl std::fmt::Display for Integrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            self.algorithm.as_str(),
            STANDARD.encode(&self.digest)
        )
    }
}

impl std::str::FromStr for Integrity {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Integrity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Integrity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Streaming hasher producing an [`Integrity`].
#[derive(Debug, Clone)]
pub enum IntegrityHasher {
    /// SHA-256 state.
    Sha256(Sha256),
    /// SHA-512 state.
    Sha512(Sha512),
}

impl IntegrityHasher {
    /// Start hashing with the given algorithm.
    pub fn new(algorithm: IntegrityAlgorithm) -> Self {
        match algorithm {
            IntegrityAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            IntegrityAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> Integrity {
        match self {
            Self::Sha256(h) => Integrity {
                algorithm: IntegrityAlgorithm::Sha256,
                digest: h.finalize().to_vec(),
            },
            Self::Sha512(h) => Integrity {
                algorithm: IntegrityAlgorithm::Sha512,
                digest: h.finalize().to_vec(),
            },
        }
    }
}

/// BLAKE3 hash for fast internal operations (per-file store records).
///
/// BLAKE3 is much faster than SHA-2 on modern CPUs. The store uses it to
/// fingerprint every extracted file, while SRI strings are used for upstream
/// archive verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blake3Hash(String);

impl Blake3Hash {
    /// Create a new `Blake3Hash` from a raw hex string (64 hex chars).
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Compute BLAKE3 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(hash.to_hex().to_string())
    }

    /// Compute BLAKE3 hash of a file, streaming it through the hasher.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(path: &std::path::Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Blake3Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
