//! Content-addressed record identity.

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::{CanonicalRecord, CoreError, Record};

pub const KEY_HASH_PREFIX: &str = "RFP_Content_";

/// Characters of question/response kept in the human-readable key.
pub const KEY_SNIPPET_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    pub fn hex_digest(self, bytes: &[u8]) -> String {
        match self {
            Self::Md5 => hex::encode(Md5::digest(bytes)),
            Self::Sha1 => hex::encode(Sha1::digest(bytes)),
            Self::Sha256 => hex::encode(Sha256::digest(bytes)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            _ => Err(CoreError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeriver {
    algorithm: HashAlgorithm,
}

impl KeyDeriver {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        Ok(Self::new(name.parse()?))
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Audit-friendly composite key. Not unique: long texts are clipped.
    pub fn readable_key(record: &Record) -> String {
        let question = snippet(record.question.trim());
        let response = snippet(record.response.trim());
        format!(
            "{}_{}_{}_{}_{}_{}",
            record.client.trim(),
            record.date_string(),
            record.rfp_type.trim(),
            record.consultant.trim(),
            question,
            response
        )
    }

    /// Full, unclipped field values joined by `|`. Whitespace is kept as-is.
    pub fn hash_input(record: &Record) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            record.client,
            record.date_string(),
            record.rfp_type,
            record.consultant,
            record.question,
            record.response
        )
    }

    pub fn key_hash(&self, record: &Record) -> String {
        let digest = self
            .algorithm
            .hex_digest(Self::hash_input(record).as_bytes());
        format!("{KEY_HASH_PREFIX}{digest}")
    }

    pub fn derive(&self, record: Record) -> CanonicalRecord {
        let key = Self::readable_key(&record);
        let key_hash = self.key_hash(&record);
        CanonicalRecord {
            record,
            key,
            key_hash,
        }
    }
}

fn snippet(text: &str) -> &str {
    match text.char_indices().nth(KEY_SNIPPET_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
