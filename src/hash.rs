//! Content hashes
//!
//! SHA-256 digests used to name transactions. Externally a hash is
//! always rendered as standard padded base64 (44 characters).

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::CodecError;

/// Digest length in bytes.
pub const HASH_LEN: usize = 32;

/// 256-bit content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// SHA-256 of `data`
    pub fn digest(data: &[u8]) -> Self {
        let result = Sha256::digest(data);
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&result);
        Self(out)
    }

    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parse the base64 form. Anything that is not exactly 32 bytes is rejected.
    pub fn from_base64(s: &str) -> Result<Self, CodecError> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|_| CodecError::InvalidHash(s.to_owned()))?;
        let bytes: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidHash(s.to_owned()))?;
        Ok(Self(bytes))
    }

    /// First 8 characters of the base64 form, for log lines.
    pub fn short(&self) -> String {
        let mut s = self.to_base64();
        s.truncate(8);
        s
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl FromStr for Hash {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}
