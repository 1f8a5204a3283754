//! Container header encoding and validation
//!
//! The header layout (all integers big-endian) is:
//! - magic: 4 bytes (`SLST`)
//! - version: 1 byte
//! - kdf work factor: 4 bytes (log_n, r, p, reserved)
//! - salt: 16 bytes
//! - nonce base: 12 bytes
//! - chunk size: 4 bytes
//! - plaintext length: 8 bytes, all ones when unknown
//!
//! The encoded header is also the associated data prefix of every chunk, so
//! any modification of it fails authentication.

use std::io::{self, Read};

use crate::error::{ErrorCategory, ErrorKind, Result, SealstreamError};
use crate::kdf::{KdfParams, SALT_LEN};

/// Container magic
pub const MAGIC: [u8; 4] = *b"SLST";

/// The only container version this crate reads and writes
pub const VERSION: u8 = 1;

/// Length of the per-container nonce base in bytes
pub const NONCE_LEN: usize = 12;

/// Total encoded header length in bytes
pub const HEADER_LEN: usize = 4 + 1 + 4 + SALT_LEN + NONCE_LEN + 4 + 8;

/// Plaintext length marker for streams whose size was not known up front
pub const UNKNOWN_LENGTH: u64 = u64::MAX;

/// Smallest accepted chunk size in bytes
pub const MIN_CHUNK_SIZE: u32 = 64;

/// Largest accepted chunk size in bytes
pub const MAX_CHUNK_SIZE: u32 = 8 * 1024 * 1024;

/// Chunk size used unless the caller picks another
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

const PREFIX_LEN: usize = MAGIC.len() + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kdf: KdfParams,
    pub salt: [u8; SALT_LEN],
    pub nonce_base: [u8; NONCE_LEN],
    pub chunk_size: u32,
    /// `None` when the plaintext was streamed without a known length.
    pub plaintext_len: Option<u64>,
}

impl Header {
    pub fn version(&self) -> u8 {
        VERSION
    }

    /// Number of chunks a container with this header must hold, when the
    /// plaintext length is known.
    ///
    /// There is always at least one chunk; empty input is carried by a single
    /// empty final chunk.
    pub fn expected_chunks(&self) -> Option<u64> {
        self.plaintext_len
            .map(|len| len.div_ceil(u64::from(self.chunk_size)).max(1))
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut pos = 0;
        let mut put = |bytes: &[u8]| {
            out[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        };
        put(&MAGIC);
        put(&[VERSION]);
        put(&self.kdf.to_bytes());
        put(&self.salt);
        put(&self.nonce_base);
        put(&self.chunk_size.to_be_bytes());
        put(&self.plaintext_len.unwrap_or(UNKNOWN_LENGTH).to_be_bytes());
        out
    }

    /// Reads and validates a header from the start of a container stream.
    ///
    /// The version is checked after the first five bytes, before any other
    /// field is read, so containers from a future version are reported as
    /// such even if their header layout differs.
    pub fn read_from(reader: &mut dyn Read) -> Result<Self> {
        let mut prefix = [0u8; PREFIX_LEN];
        read_header_bytes(reader, &mut prefix, "magic and version")?;

        if prefix[..MAGIC.len()] != MAGIC {
            return Err(SealstreamError::malformed(
                "input unrecognized as a sealstream container",
            ));
        }
        let version = prefix[MAGIC.len()];
        if version != VERSION {
            return Err(SealstreamError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnsupportedVersion,
                format!(
                    "container version {} is not supported (expected {})",
                    version, VERSION
                ),
            ));
        }

        let mut rest = [0u8; HEADER_LEN - PREFIX_LEN];
        read_header_bytes(reader, &mut rest, "header fields")?;

        let (kdf_bytes, rest) = rest.split_at(4);
        let (salt, rest) = rest.split_at(SALT_LEN);
        let (nonce_base, rest) = rest.split_at(NONCE_LEN);
        let (chunk_size, plaintext_len) = rest.split_at(4);

        let kdf = KdfParams::from_bytes(to_array(kdf_bytes)?)
            .and_then(|kdf| kdf.validate().map(|_| kdf))
            .map_err(|msg| SealstreamError::malformed(format!("invalid header: {}", msg)))?;

        let chunk_size = u32::from_be_bytes(to_array(chunk_size)?);
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(SealstreamError::malformed(format!(
                "invalid header: chunk size {} outside supported range {}..={}",
                chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )));
        }

        let plaintext_len = match u64::from_be_bytes(to_array(plaintext_len)?) {
            UNKNOWN_LENGTH => None,
            len => Some(len),
        };

        Ok(Self {
            kdf,
            salt: to_array(salt)?,
            nonce_base: to_array(nonce_base)?,
            chunk_size,
            plaintext_len,
        })
    }
}

fn read_header_bytes(reader: &mut dyn Read, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SealstreamError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::MalformedContainer,
                format!("input likely truncated while reading {}", what),
                e,
            )
        } else {
            SealstreamError::io(format!("failed to read {}", what), e)
        }
    })
}

fn to_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        SealstreamError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "header field length mismatch",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header {
            kdf: KdfParams::new(10, 8, 1),
            salt: [0x11; SALT_LEN],
            nonce_base: [0x22; NONCE_LEN],
            chunk_size: 4096,
            plaintext_len: Some(10_000),
        }
    }

    fn decode(bytes: &[u8]) -> Result<Header> {
        let mut reader = bytes;
        Header::read_from(&mut reader)
    }

    #[test]
    fn test_header_len() {
        assert_eq!(HEADER_LEN, 49);
    }

    #[test]
    fn test_encode_layout() {
        let bytes = sample().encode();
        assert_eq!(&bytes[0..4], b"SLST");
        assert_eq!(bytes[4], VERSION);
        assert_eq!(&bytes[5..9], &[10, 8, 1, 0]);
        assert_eq!(&bytes[9..25], &[0x11; 16]);
        assert_eq!(&bytes[25..37], &[0x22; 12]);
        assert_eq!(&bytes[37..41], &4096u32.to_be_bytes());
        assert_eq!(&bytes[41..49], &10_000u64.to_be_bytes());
    }

    #[test]
    fn test_decode_encoded() {
        let header = sample();
        assert_eq!(decode(&header.encode()).unwrap(), header);

        let streaming = Header {
            plaintext_len: None,
            ..sample()
        };
        let bytes = streaming.encode();
        assert_eq!(&bytes[41..49], &[0xFF; 8]);
        assert_eq!(decode(&bytes).unwrap().plaintext_len, None);
    }

    #[test]
    fn test_expected_chunks() {
        let with_len = |len| Header {
            plaintext_len: Some(len),
            ..sample()
        };
        assert_eq!(with_len(0).expected_chunks(), Some(1));
        assert_eq!(with_len(1).expected_chunks(), Some(1));
        assert_eq!(with_len(4096).expected_chunks(), Some(1));
        assert_eq!(with_len(4097).expected_chunks(), Some(2));
        assert_eq!(with_len(10_000).expected_chunks(), Some(3));
        let streaming = Header {
            plaintext_len: None,
            ..sample()
        };
        assert_eq!(streaming.expected_chunks(), None);
    }

    #[test]
    fn test_truncated_header() {
        let bytes = sample().encode();
        for len in [0, 3, 5, 20, HEADER_LEN - 1] {
            let err = decode(&bytes[..len]).expect_err("expected truncation error");
            assert_eq!(err.kind, Some(ErrorKind::MalformedContainer), "len {}", len);
        }
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample().encode();
        bytes[0] = b'X';
        let err = decode(&bytes).expect_err("expected bad magic error");
        assert_eq!(err.kind, Some(ErrorKind::MalformedContainer));
    }

    #[test]
    fn test_unknown_version_detected_from_prefix_alone() {
        let err = decode(b"SLST\x02").expect_err("expected unsupported version");
        assert_eq!(err.kind, Some(ErrorKind::UnsupportedVersion));

        let mut bytes = sample().encode();
        bytes[4] = 0;
        let err = decode(&bytes).expect_err("expected unsupported version");
        assert_eq!(err.kind, Some(ErrorKind::UnsupportedVersion));
    }

    #[test]
    fn test_chunk_size_out_of_range() {
        for chunk_size in [0, MIN_CHUNK_SIZE - 1, MAX_CHUNK_SIZE + 1, u32::MAX] {
            let mut bytes = sample().encode();
            bytes[37..41].copy_from_slice(&chunk_size.to_be_bytes());
            let err = decode(&bytes).expect_err("expected chunk size error");
            assert_eq!(err.kind, Some(ErrorKind::MalformedContainer));
        }
    }

    #[test]
    fn test_kdf_out_of_range() {
        let mut bytes = sample().encode();
        // log_n 22 with r 32 would ask for 16 GiB
        bytes[5..9].copy_from_slice(&[22, 32, 1, 0]);
        let err = decode(&bytes).expect_err("expected kdf range error");
        assert_eq!(err.kind, Some(ErrorKind::MalformedContainer));

        let mut bytes = sample().encode();
        bytes[8] = 1;
        let err = decode(&bytes).expect_err("expected reserved byte error");
        assert_eq!(err.kind, Some(ErrorKind::MalformedContainer));
    }
}
