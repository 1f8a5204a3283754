//! Streaming encryption/decryption using scrypt + ChaCha20Poly1305
//!
//! A container is a [`Header`] followed by one or more chunks. Each chunk is
//! the ChaCha20Poly1305 ciphertext of up to `chunk_size` plaintext bytes
//! followed by its 16-byte tag:
//! - every chunk but the last carries exactly `chunk_size` bytes
//! - the last chunk carries the remainder, possibly zero bytes
//! - the nonce of chunk `i` is the header's nonce base with `i` (big-endian
//!   u64) XORed into its last 8 bytes
//! - the associated data of a chunk is the encoded header plus one byte
//!   that is 1 for the last chunk and 0 otherwise
//!
//! A container always holds at least one chunk, so empty input becomes a
//! single empty final chunk. A header with no chunk after it is rejected as
//! malformed even when it declares a length of zero: nothing in it would be
//! authenticated, and a wrong passphrase would go unnoticed.
//!
//! Decryption only ever writes plaintext of a chunk whose tag has verified.
//! Memory use is one chunk buffer regardless of input size.

use std::io::{self, Read, Write};

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::cancel::CancelFlag;
use crate::config::EncryptOptions;
use crate::error::{ErrorCategory, ErrorKind, Result, SealstreamError};
use crate::header::{HEADER_LEN, Header, NONCE_LEN};
use crate::kdf::{SALT_LEN, derive_key};

/// Length of the Poly1305 tag appended to every chunk
pub const TAG_LEN: usize = 16;

const AUTH_FAILED_MSG: &str = "corrupt input, tampered-with data, or bad passphrase";

/// What a completed operation processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Number of chunks in the container
    pub chunks: u64,
    /// Plaintext bytes consumed (encrypt) or produced (decrypt)
    pub plaintext_len: u64,
    /// Container bytes produced (encrypt) or consumed (decrypt)
    pub container_len: u64,
}

/// An encrypt/decrypt capability over byte streams.
///
/// Callers that must not see partial output on failure (for example because
/// they publish a file) should stage the output and only commit it when the
/// call returns `Ok`.
pub trait CipherEngine {
    fn encrypt(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        passphrase: &[u8],
    ) -> Result<StreamSummary>;

    fn decrypt(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        passphrase: &[u8],
    ) -> Result<StreamSummary>;
}

/// In-process [`CipherEngine`].
#[derive(Debug, Clone, Default)]
pub struct StreamEngine {
    options: EncryptOptions,
    cancel: CancelFlag,
}

impl StreamEngine {
    pub fn new(options: EncryptOptions) -> Self {
        Self {
            options,
            cancel: CancelFlag::new(),
        }
    }

    /// Attaches a flag that aborts operations of this engine when set.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &EncryptOptions {
        &self.options
    }
}

impl CipherEngine for StreamEngine {
    fn encrypt(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        passphrase: &[u8],
    ) -> Result<StreamSummary> {
        let (salt, nonce_base) = fresh_material();
        encrypt_stream(
            input,
            output,
            passphrase,
            &self.options,
            salt,
            nonce_base,
            &self.cancel,
        )
    }

    fn decrypt(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        passphrase: &[u8],
    ) -> Result<StreamSummary> {
        decrypt_stream(input, output, passphrase, &self.cancel)
    }
}

/// Encrypt `reader` into `writer` with a passphrase using random salt and nonce base
pub fn encrypt<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    passphrase: &[u8],
    options: &EncryptOptions,
) -> Result<StreamSummary> {
    let (salt, nonce_base) = fresh_material();
    encrypt_stream(
        &mut reader,
        &mut writer,
        passphrase,
        options,
        salt,
        nonce_base,
        &CancelFlag::new(),
    )
}

/// Encrypt with a caller-provided salt and nonce base
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates random
/// salt and nonce base.
pub fn encrypt_deterministic<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    passphrase: &[u8],
    options: &EncryptOptions,
    salt: &[u8; SALT_LEN],
    nonce_base: &[u8; NONCE_LEN],
) -> Result<StreamSummary> {
    encrypt_stream(
        &mut reader,
        &mut writer,
        passphrase,
        options,
        *salt,
        *nonce_base,
        &CancelFlag::new(),
    )
}

/// Decrypt a container from `reader` into `writer`
///
/// On error, chunks that verified before the failure may already have been
/// written; the output as a whole must be treated as invalid.
pub fn decrypt<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    passphrase: &[u8],
) -> Result<StreamSummary> {
    decrypt_stream(&mut reader, &mut writer, passphrase, &CancelFlag::new())
}

fn fresh_material() -> ([u8; SALT_LEN], [u8; NONCE_LEN]) {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let mut nonce_base = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_base);

    (salt, nonce_base)
}

fn encrypt_stream(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    passphrase: &[u8],
    options: &EncryptOptions,
    salt: [u8; SALT_LEN],
    nonce_base: [u8; NONCE_LEN],
    cancel: &CancelFlag,
) -> Result<StreamSummary> {
    check_passphrase(passphrase)?;
    options.validate()?;

    let header = Header {
        kdf: options.kdf,
        salt,
        nonce_base,
        chunk_size: options.chunk_size,
        plaintext_len: options.plaintext_len,
    };
    debug!(
        chunk_size = header.chunk_size,
        log_n = header.kdf.log_n,
        declared_len = ?header.plaintext_len,
        "encrypting stream"
    );

    let key = derive_key(passphrase, &header.salt, &header.kdf)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));

    let header_bytes = header.encode();
    writer
        .write_all(&header_bytes)
        .map_err(|e| SealstreamError::io("failed to write header", e))?;

    let mut summary = StreamSummary {
        container_len: HEADER_LEN as u64,
        ..StreamSummary::default()
    };
    let mut chunks = ChunkReader::new(reader);
    let mut buf = Zeroizing::new(vec![0u8; header.chunk_size as usize]);
    let mut index = 0u64;

    loop {
        check_cancel(cancel)?;

        let (len, last) = chunks
            .next_chunk(&mut buf)
            .map_err(|e| SealstreamError::io("failed to read input", e))?;
        summary.plaintext_len += len as u64;

        if let Some(declared) = header.plaintext_len {
            if summary.plaintext_len > declared || (last && summary.plaintext_len != declared) {
                return Err(SealstreamError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::InvalidArgument,
                    format!(
                        "input length does not match declared plaintext length of {} bytes",
                        declared
                    ),
                ));
            }
        }

        let tag = cipher
            .encrypt_in_place_detached(
                &chunk_nonce(&header.nonce_base, index),
                &chunk_aad(&header_bytes, last),
                &mut buf[..len],
            )
            .map_err(|e| {
                SealstreamError::with_kind(
                    ErrorCategory::Internal,
                    ErrorKind::InternalInvariant,
                    format!("encryption failed: {}", e),
                )
            })?;

        writer
            .write_all(&buf[..len])
            .and_then(|_| writer.write_all(&tag))
            .map_err(|e| SealstreamError::io("failed to write output", e))?;
        trace!(index, len, last, "sealed chunk");

        summary.chunks += 1;
        summary.container_len += (len + TAG_LEN) as u64;

        if last {
            break;
        }
        index = next_index(index)?;
    }

    writer
        .flush()
        .map_err(|e| SealstreamError::io("failed to flush output", e))?;

    debug!(
        chunks = summary.chunks,
        plaintext_len = summary.plaintext_len,
        "encrypted stream"
    );
    Ok(summary)
}

fn decrypt_stream(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    passphrase: &[u8],
    cancel: &CancelFlag,
) -> Result<StreamSummary> {
    check_passphrase(passphrase)?;

    let header = Header::read_from(reader)?;
    debug!(
        chunk_size = header.chunk_size,
        log_n = header.kdf.log_n,
        declared_len = ?header.plaintext_len,
        "decrypting stream"
    );

    let key = derive_key(passphrase, &header.salt, &header.kdf)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));

    let header_bytes = header.encode();
    let chunk_size = header.chunk_size as usize;
    let mut summary = StreamSummary {
        container_len: HEADER_LEN as u64,
        ..StreamSummary::default()
    };
    let mut chunks = ChunkReader::new(reader);
    let mut buf = Zeroizing::new(vec![0u8; chunk_size + TAG_LEN]);
    let mut index = 0u64;

    loop {
        check_cancel(cancel)?;

        // With a declared length every chunk's size is known up front;
        // otherwise the final chunk is whichever one the input ends in.
        let want = match header.plaintext_len {
            Some(declared) => {
                let remaining = declared - summary.plaintext_len;
                remaining.min(chunk_size as u64) as usize + TAG_LEN
            }
            None => chunk_size + TAG_LEN,
        };

        let (len, at_eof) = chunks
            .next_chunk(&mut buf[..want])
            .map_err(|e| SealstreamError::io("failed to read input", e))?;

        let last = match header.plaintext_len {
            Some(declared) => {
                if len < want {
                    return Err(SealstreamError::malformed(format!(
                        "input likely truncated while reading chunk {}",
                        index
                    )));
                }
                let last = summary.plaintext_len + (want - TAG_LEN) as u64 == declared;
                if last && !at_eof {
                    return Err(SealstreamError::malformed(
                        "invalid input: unexpected data after final chunk",
                    ));
                }
                if !last && at_eof {
                    return Err(SealstreamError::malformed(format!(
                        "input likely truncated after chunk {}",
                        index
                    )));
                }
                last
            }
            None => {
                if len < TAG_LEN {
                    return Err(SealstreamError::malformed(format!(
                        "input likely truncated while reading chunk {}",
                        index
                    )));
                }
                at_eof
            }
        };

        let body_len = len - TAG_LEN;
        let (body, tag) = buf[..len].split_at_mut(body_len);
        cipher
            .decrypt_in_place_detached(
                &chunk_nonce(&header.nonce_base, index),
                &chunk_aad(&header_bytes, last),
                body,
                Tag::from_slice(tag),
            )
            .map_err(|_| {
                SealstreamError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::AuthenticationFailed,
                    AUTH_FAILED_MSG,
                )
            })?;

        writer
            .write_all(body)
            .map_err(|e| SealstreamError::io("failed to write output", e))?;
        trace!(index, len = body_len, last, "opened chunk");

        summary.chunks += 1;
        summary.plaintext_len += body_len as u64;
        summary.container_len += len as u64;

        if last {
            break;
        }
        index = next_index(index)?;
    }

    writer
        .flush()
        .map_err(|e| SealstreamError::io("failed to flush output", e))?;

    debug!(
        chunks = summary.chunks,
        plaintext_len = summary.plaintext_len,
        "decrypted stream"
    );
    Ok(summary)
}

fn check_passphrase(passphrase: &[u8]) -> Result<()> {
    if passphrase.is_empty() {
        return Err(SealstreamError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidKey,
            "passphrase must not be empty",
        ));
    }
    Ok(())
}

fn check_cancel(cancel: &CancelFlag) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SealstreamError::with_kind(
            ErrorCategory::User,
            ErrorKind::Cancelled,
            "operation cancelled",
        ));
    }
    Ok(())
}

fn next_index(index: u64) -> Result<u64> {
    index.checked_add(1).ok_or_else(|| {
        SealstreamError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "chunk counter exhausted",
        )
    })
}

/// Nonce of chunk `index`: the base with the index XORed into its tail.
fn chunk_nonce(base: &[u8; NONCE_LEN], index: u64) -> Nonce {
    let mut nonce = *base;
    for (byte, counter) in nonce[NONCE_LEN - 8..].iter_mut().zip(index.to_be_bytes()) {
        *byte ^= counter;
    }
    Nonce::from(nonce)
}

fn chunk_aad(header: &[u8; HEADER_LEN], last: bool) -> [u8; HEADER_LEN + 1] {
    let mut aad = [0u8; HEADER_LEN + 1];
    aad[..HEADER_LEN].copy_from_slice(header);
    aad[HEADER_LEN] = u8::from(last);
    aad
}

/// Splits a byte stream into chunk-sized pieces while looking one byte ahead,
/// so the final piece is known without knowing the stream length.
struct ChunkReader<'a> {
    inner: &'a mut dyn Read,
    pending: Option<u8>,
}

impl<'a> ChunkReader<'a> {
    fn new(inner: &'a mut dyn Read) -> Self {
        Self {
            inner,
            pending: None,
        }
    }

    /// Fills `buf` as far as the input allows. Returns the number of bytes
    /// placed in `buf` and whether the input is exhausted after them.
    fn next_chunk(&mut self, buf: &mut [u8]) -> io::Result<(usize, bool)> {
        let mut filled = 0;
        if let Some(byte) = self.pending.take() {
            buf[0] = byte;
            filled = 1;
        }

        filled += read_full(self.inner, &mut buf[filled..])?;
        if filled < buf.len() {
            return Ok((filled, true));
        }

        let mut peek = [0u8; 1];
        if read_full(self.inner, &mut peek)? == 0 {
            Ok((filled, true))
        } else {
            self.pending = Some(peek[0]);
            Ok((filled, false))
        }
    }
}

fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
