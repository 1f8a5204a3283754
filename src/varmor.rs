//! Versioned armoring for containers
//!
//! Provides streaming base64url encoding with a version prefix. The armored
//! format is:
//! - Free of whitespace (including newlines)
//! - Safe to embed in URLs
//! - Safe to pass unescaped in a POSIX shell
//!
//! Format: `sealstream1:{base64url-no-padding}`

use std::io::{self, Read, Write};

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD};
use base64::read::DecoderReader;
use base64::write::EncoderWriter;

use crate::error::{ErrorCategory, ErrorKind, Result, SealstreamError};

/// Magic prefix for all sealstream armor versions
const MAGIC_PREFIX: &[u8] = b"sealstream";

/// Version 1 magic marker
const V1_MAGIC: &[u8] = b"sealstream1:";

static ARMOR_ENGINE: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, NO_PAD);

/// True if `first` can start armored input.
///
/// Binary containers start with `S`, armored ones with `s`, so one byte of
/// lookahead is enough to tell them apart.
pub fn looks_armored(first: u8) -> bool {
    first == MAGIC_PREFIX[0]
}

/// Streaming armor writer. Call [`ArmorWriter::finish`] to flush the last
/// partial base64 group; dropping without finishing loses it.
pub struct ArmorWriter<W: Write> {
    inner: EncoderWriter<'static, GeneralPurpose, W>,
}

impl<W: Write> ArmorWriter<W> {
    /// Writes the version marker and returns a writer that armors
    /// everything written to it.
    pub fn new(mut writer: W) -> Result<Self> {
        writer
            .write_all(V1_MAGIC)
            .map_err(|e| SealstreamError::io("failed to write armor prefix", e))?;
        Ok(Self {
            inner: EncoderWriter::new(writer, &ARMOR_ENGINE),
        })
    }

    pub fn finish(mut self) -> Result<W> {
        self.inner
            .finish()
            .map_err(|e| SealstreamError::io("failed to finish armored output", e))
    }
}

impl<W: Write> Write for ArmorWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming armor reader yielding the decoded container bytes.
///
/// Text that is not valid armor fails reads with an `InvalidData` error
/// carrying a [`ErrorKind::MalformedContainer`] error, so corrupt input is
/// reported as such rather than as a failing stream.
pub struct ArmorReader<R: Read> {
    inner: DecoderReader<'static, GeneralPurpose, R>,
}

impl<R: Read> Read for ArmorReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    SealstreamError::with_kind_and_source(
                        ErrorCategory::User,
                        ErrorKind::MalformedContainer,
                        "invalid armored data",
                        e,
                    ),
                )
            } else {
                e
            }
        })
    }
}

/// Checks the version marker and returns a reader yielding the decoded
/// container bytes.
pub fn unwrap_reader<R: Read>(mut reader: R) -> Result<ArmorReader<R>> {
    let mut marker = [0u8; V1_MAGIC.len()];
    let mut filled = 0;
    while filled < marker.len() {
        match reader.read(&mut marker[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SealstreamError::io("failed to read armor prefix", e)),
        }
    }
    let marker = &marker[..filled];

    if marker == V1_MAGIC {
        Ok(ArmorReader {
            inner: DecoderReader::new(reader, &ARMOR_ENGINE),
        })
    } else if marker.starts_with(MAGIC_PREFIX) {
        Err(SealstreamError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnsupportedVersion,
            "input claims to be armored sealstream, but not a version we support",
        ))
    } else if filled < V1_MAGIC.len() && V1_MAGIC.starts_with(marker) {
        Err(SealstreamError::malformed(
            "input size smaller than magic marker; likely truncated",
        ))
    } else {
        Err(SealstreamError::malformed(
            "input unrecognized as armored sealstream data",
        ))
    }
}
