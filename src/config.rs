//! Encryption options

use crate::error::{ErrorCategory, ErrorKind, Result, SealstreamError};
use crate::header::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, UNKNOWN_LENGTH};
use crate::kdf::KdfParams;

/// Parameters chosen by the encrypting side.
///
/// Everything here ends up in the container header, so the decrypting side
/// needs no options of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOptions {
    pub chunk_size: u32,
    pub kdf: KdfParams,
    /// Exact plaintext length if the caller knows it ahead of time. The
    /// input must then produce exactly this many bytes.
    pub plaintext_len: Option<u64>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf: KdfParams::default(),
            plaintext_len: None,
        }
    }
}

impl EncryptOptions {
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_plaintext_len(mut self, len: Option<u64>) -> Self {
        self.plaintext_len = len;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(SealstreamError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidArgument,
                format!(
                    "chunk size {} outside supported range {}..={}",
                    self.chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
                ),
            ));
        }
        if self.plaintext_len == Some(UNKNOWN_LENGTH) {
            return Err(SealstreamError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidArgument,
                "plaintext length collides with the unknown-length marker",
            ));
        }
        self.kdf.validate().map_err(|msg| {
            SealstreamError::with_kind(ErrorCategory::User, ErrorKind::InvalidArgument, msg)
        })
    }
}
