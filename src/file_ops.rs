//! File encryption/decryption operations
//!
//! This module connects files (or stdin/stdout, spelled `-`) to the engine.
//! File outputs are staged in a temporary file next to the destination and
//! only renamed into place once the whole operation has succeeded, so a
//! failed decrypt never leaves partial plaintext behind.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use crate::config::EncryptOptions;
use crate::engine::{CipherEngine, StreamEngine, StreamSummary};
use crate::error::{ErrorCategory, ErrorKind, Result, SealstreamError};
use crate::header::Header;
use crate::passphrase::PassphraseReader;
use crate::varmor;

/// Path that stands for stdin (as input) or stdout (as output)
pub const STDIO_PATH: &str = "-";

/// Extension appended to encrypted files
pub const ENCRYPTED_EXTENSION: &str = "enc";

const DECRYPTED_EXTENSION: &str = "dec";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

/// Encrypt a file with a passphrase
///
/// Streams plaintext from `input_path` through the engine into `output_path`,
/// armoring the container if requested. When the input is a regular file its
/// size is recorded in the header.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn encrypt_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
    options: &EncryptOptions,
    armor: bool,
) -> Result<StreamSummary> {
    let (mut input, plaintext_len) = open_input(input_path)?;
    let passphrase = passphrase_reader.read_passphrase()?;
    let engine = StreamEngine::new(options.clone().with_plaintext_len(plaintext_len));

    let mut output = Output::create(output_path)?;
    let summary = {
        let mut sink = BufWriter::new(&mut output);
        let summary = if armor {
            let mut armored = varmor::ArmorWriter::new(&mut sink)?;
            let summary = engine
                .encrypt(&mut input, &mut armored, &passphrase)
                .map_err(|e| e.with_context("encryption failed"))?;
            armored.finish()?;
            summary
        } else {
            engine
                .encrypt(&mut input, &mut sink, &passphrase)
                .map_err(|e| e.with_context("encryption failed"))?
        };
        sink.flush()
            .map_err(|e| SealstreamError::io("failed to flush output", e))?;
        summary
    };
    output
        .commit()
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;

    info!(
        input = %input_path.display(),
        output = %output_path.display(),
        chunks = summary.chunks,
        bytes = summary.plaintext_len,
        armor,
        "encrypted"
    );
    Ok(summary)
}

/// Decrypt a file with a passphrase
///
/// Reads a binary or armored container from `input_path`, decrypts it using a
/// passphrase from `passphrase_reader`, and writes the plaintext to
/// `output_path`.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
/// When the output is stdout, chunks are written as they verify; a failure
/// part-way is reported through the returned error only.
pub fn decrypt_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<StreamSummary> {
    let (input, _) = open_input(input_path)?;
    let (mut input, _) =
        container_reader(input).map_err(|e| e.with_context("failed to unarmor"))?;
    let passphrase = passphrase_reader.read_passphrase()?;
    let engine = StreamEngine::default();

    let mut output = Output::create(output_path)?;
    let summary = {
        let mut sink = BufWriter::new(&mut output);
        let summary = engine
            .decrypt(&mut input, &mut sink, &passphrase)
            .map_err(|e| e.with_context("failed to decrypt"))?;
        sink.flush()
            .map_err(|e| SealstreamError::io("failed to flush output", e))?;
        summary
    };
    output
        .commit()
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;

    info!(
        input = %input_path.display(),
        output = %output_path.display(),
        chunks = summary.chunks,
        bytes = summary.plaintext_len,
        "decrypted"
    );
    Ok(summary)
}

/// Header metadata of a container, readable without the passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub armored: bool,
    pub header: Header,
}

impl fmt::Display for ContainerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = &self.header;
        writeln!(
            f,
            "format: sealstream container v{}{}",
            header.version(),
            if self.armored { " (armored)" } else { "" }
        )?;
        writeln!(
            f,
            "kdf: scrypt log_n={} r={} p={}",
            header.kdf.log_n, header.kdf.r, header.kdf.p
        )?;
        writeln!(f, "chunk size: {}", header.chunk_size)?;
        match (header.plaintext_len, header.expected_chunks()) {
            (Some(len), Some(chunks)) => {
                writeln!(f, "plaintext length: {}", len)?;
                write!(f, "chunks: {}", chunks)
            }
            _ => write!(f, "plaintext length: unknown (streamed)"),
        }
    }
}

/// Read and validate the header of a container without decrypting it
pub fn inspect_file(input_path: &Path) -> Result<ContainerInfo> {
    let (input, _) = open_input(input_path)?;
    let (mut input, armored) =
        container_reader(input).map_err(|e| e.with_context("failed to unarmor"))?;
    let header = Header::read_from(&mut input)
        .map_err(|e| e.with_context(format!("failed to inspect {}", input_path.display())))?;
    Ok(ContainerInfo { armored, header })
}

/// Output path used when none is given
///
/// Encrypting appends `.enc`; decrypting strips a trailing `.enc` and
/// otherwise appends `.dec`. Stdin maps to stdout.
pub fn default_output_path(input_path: &Path, operation: Operation) -> PathBuf {
    if input_path == Path::new(STDIO_PATH) {
        return PathBuf::from(STDIO_PATH);
    }
    match operation {
        Operation::Encrypt => append_extension(input_path, ENCRYPTED_EXTENSION),
        Operation::Decrypt => {
            if input_path.extension() == Some(OsStr::new(ENCRYPTED_EXTENSION)) {
                input_path.with_extension("")
            } else {
                append_extension(input_path, DECRYPTED_EXTENSION)
            }
        }
    }
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Opens the input and reports its length when it is a regular file.
fn open_input(path: &Path) -> Result<(Box<dyn Read>, Option<u64>)> {
    if path == Path::new(STDIO_PATH) {
        return Ok((Box::new(io::stdin().lock()), None));
    }

    let file = File::open(path).map_err(|e| read_error(path, e))?;
    let metadata = file.metadata().map_err(|e| read_error(path, e))?;
    let len = metadata.is_file().then(|| metadata.len());
    Ok((Box::new(BufReader::new(file)), len))
}

/// Wraps `input` in an armor decoder if it starts like armored data.
fn container_reader(input: Box<dyn Read>) -> Result<(Box<dyn Read>, bool)> {
    let mut buffered = BufReader::new(input);
    let first = buffered
        .fill_buf()
        .map_err(|e| SealstreamError::io("failed to read input", e))?
        .first()
        .copied();

    match first {
        Some(byte) if varmor::looks_armored(byte) => {
            Ok((Box::new(varmor::unwrap_reader(buffered)?), true))
        }
        _ => Ok((Box::new(buffered), false)),
    }
}

/// Destination of an operation: stdout, or a temp file that becomes the
/// target file on [`Output::commit`]. Dropping an uncommitted output removes
/// the temp file.
enum Output {
    Stdout(io::StdoutLock<'static>),
    Staged { temp: NamedTempFile, target: PathBuf },
}

impl Output {
    fn create(path: &Path) -> Result<Self> {
        if path == Path::new(STDIO_PATH) {
            return Ok(Output::Stdout(io::stdout().lock()));
        }

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = tempfile::Builder::new()
            .prefix(".sealstream-")
            .tempfile_in(dir)
            .map_err(|e| {
                SealstreamError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::Io,
                    format!("failed to create temporary file in {}", dir.display()),
                    e,
                )
            })?;

        Ok(Output::Staged {
            temp,
            target: path.to_path_buf(),
        })
    }

    fn commit(self) -> Result<()> {
        match self {
            Output::Stdout(mut out) => out
                .flush()
                .map_err(|e| SealstreamError::io("failed to flush stdout", e)),
            Output::Staged { temp, target } => {
                // fsync() such that the rename later, if it succeeds, will
                // always point to a complete file.
                temp.as_file().sync_all().map_err(|e| {
                    SealstreamError::with_kind_and_source(
                        ErrorCategory::Internal,
                        ErrorKind::Io,
                        "failed to sync file prior to rename",
                        e,
                    )
                })?;

                #[cfg(unix)]
                {
                    use std::fs::Permissions;
                    use std::os::unix::fs::PermissionsExt;
                    temp.as_file()
                        .set_permissions(Permissions::from_mode(0o600))
                        .map_err(|e| {
                            SealstreamError::with_kind_and_source(
                                ErrorCategory::Internal,
                                ErrorKind::Io,
                                "failed to set tempfile permissions",
                                e,
                            )
                        })?;
                }

                temp.persist(&target).map_err(|e| {
                    SealstreamError::with_kind_and_source(
                        ErrorCategory::Internal,
                        ErrorKind::Io,
                        format!("failed to rename to target file {}", target.display()),
                        e,
                    )
                })?;
                Ok(())
            }
        }
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Stdout(out) => out.write(buf),
            Output::Staged { temp, .. } => temp.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Stdout(out) => out.flush(),
            Output::Staged { temp, .. } => temp.flush(),
        }
    }
}

fn read_error(path: &Path, err: io::Error) -> SealstreamError {
    SealstreamError::io(format!("failed to read from {}", path.display()), err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::KdfParams;
    use crate::passphrase::ConstantPassphraseReader;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    fn fast_options() -> EncryptOptions {
        EncryptOptions::default()
            .with_chunk_size(64)
            .with_kdf(KdfParams::new(4, 8, 1))
    }

    fn reader(passphrase: &[u8]) -> ConstantPassphraseReader {
        ConstantPassphraseReader::new(passphrase.to_vec())
    }

    fn dir_entries(dir: &Path) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        let plaintext = b"Hello, sealstream! This is longer than one chunk of sixty-four bytes.";
        fs::write(&plain_path, plaintext).unwrap();

        let summary = encrypt_file(
            &plain_path,
            &crypt_path,
            &mut reader(b"test password"),
            &fast_options(),
            false,
        )
        .unwrap();
        assert_eq!(summary.chunks, 2);
        assert_eq!(
            fs::metadata(&crypt_path).unwrap().len(),
            summary.container_len
        );

        decrypt_file(&crypt_path, &decrypted_path, &mut reader(b"test password")).unwrap();
        assert_eq!(fs::read(&decrypted_path).unwrap(), plaintext);
    }

    #[test]
    fn test_armored_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        let plaintext: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        fs::write(&plain_path, &plaintext).unwrap();

        encrypt_file(
            &plain_path,
            &crypt_path,
            &mut reader(b"test"),
            &fast_options(),
            true,
        )
        .unwrap();

        let armored = fs::read_to_string(&crypt_path).unwrap();
        assert!(armored.starts_with("sealstream1:"));
        assert!(!armored.contains(char::is_whitespace));

        decrypt_file(&crypt_path, &decrypted_path, &mut reader(b"test")).unwrap();
        assert_eq!(fs::read(&decrypted_path).unwrap(), plaintext);
    }

    #[test]
    fn test_file_size_is_declared() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");

        fs::write(&plain_path, vec![1u8; 300]).unwrap();
        encrypt_file(
            &plain_path,
            &crypt_path,
            &mut reader(b"test"),
            &fast_options(),
            false,
        )
        .unwrap();

        let info = inspect_file(&crypt_path).unwrap();
        assert!(!info.armored);
        assert_eq!(info.header.plaintext_len, Some(300));
        assert_eq!(info.header.chunk_size, 64);
        assert_eq!(info.header.kdf, KdfParams::new(4, 8, 1));
        assert_eq!(info.header.expected_chunks(), Some(5));
    }

    #[test]
    fn test_inspect_armored() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");

        fs::write(&plain_path, b"abc").unwrap();
        encrypt_file(
            &plain_path,
            &crypt_path,
            &mut reader(b"test"),
            &fast_options(),
            true,
        )
        .unwrap();

        let info = inspect_file(&crypt_path).unwrap();
        assert!(info.armored);
        assert_eq!(info.header.plaintext_len, Some(3));

        let text = info.to_string();
        assert!(text.contains("(armored)"), "{}", text);
        assert!(text.contains("plaintext length: 3"), "{}", text);
    }

    #[test]
    fn test_inspect_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("garbage");
        fs::write(&path, b"definitely not a container").unwrap();

        let err = inspect_file(&path).expect_err("expected malformed container");
        assert_eq!(err.kind, Some(ErrorKind::MalformedContainer));
    }

    #[test]
    fn test_corrupt_armor_is_malformed_container() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        fs::write(&plain_path, b"hello").unwrap();
        encrypt_file(
            &plain_path,
            &crypt_path,
            &mut reader(b"test"),
            &fast_options(),
            true,
        )
        .unwrap();

        let mut armored = fs::read(&crypt_path).unwrap();
        armored.insert(20, b'$');
        fs::write(&crypt_path, &armored).unwrap();

        let err = decrypt_file(&crypt_path, &decrypted_path, &mut reader(b"test"))
            .expect_err("expected corrupt armor to be rejected");
        assert_eq!(err.kind, Some(ErrorKind::MalformedContainer));
        assert_eq!(err.category, ErrorCategory::User);
        assert!(!decrypted_path.exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_file_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        fs::write(&plain_path, b"test").unwrap();
        encrypt_file(
            &plain_path,
            &crypt_path,
            &mut reader(b"test"),
            &fast_options(),
            false,
        )
        .unwrap();
        decrypt_file(&crypt_path, &decrypted_path, &mut reader(b"test")).unwrap();

        for path in [&crypt_path, &decrypted_path] {
            let permissions = fs::metadata(path).unwrap().permissions();
            assert_eq!(permissions.mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn test_decrypt_wrong_passphrase_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        fs::write(&plain_path, vec![9u8; 500]).unwrap();
        encrypt_file(
            &plain_path,
            &crypt_path,
            &mut reader(b"correct"),
            &fast_options(),
            false,
        )
        .unwrap();
        let before = dir_entries(temp_dir.path());

        let err = decrypt_file(&crypt_path, &decrypted_path, &mut reader(b"wrong"))
            .expect_err("expected authentication failure");
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));

        assert!(!decrypted_path.exists());
        assert_eq!(dir_entries(temp_dir.path()), before);
    }

    #[test]
    fn test_corrupt_last_chunk_leaves_no_partial_plaintext() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        fs::write(&plain_path, vec![7u8; 1000]).unwrap();
        encrypt_file(
            &plain_path,
            &crypt_path,
            &mut reader(b"test"),
            &fast_options(),
            false,
        )
        .unwrap();

        let mut container = fs::read(&crypt_path).unwrap();
        let last = container.len() - 1;
        container[last] ^= 0x01;
        fs::write(&crypt_path, &container).unwrap();

        let err = decrypt_file(&crypt_path, &decrypted_path, &mut reader(b"test"))
            .expect_err("expected authentication failure");
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
        assert!(!decrypted_path.exists());
    }

    #[test]
    fn test_decrypt_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.enc");
        let output = temp_dir.path().join("out.txt");

        let err = decrypt_file(&missing, &output, &mut reader(b"test"))
            .expect_err("expected read failure");
        assert_eq!(err.kind, Some(ErrorKind::Io));
        assert_eq!(err.category, ErrorCategory::User);
        assert!(!output.exists());
    }

    #[test]
    fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("empty.txt");
        let crypt_path = temp_dir.path().join("empty.txt.enc");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        fs::write(&plain_path, b"").unwrap();
        encrypt_file(
            &plain_path,
            &crypt_path,
            &mut reader(b"test"),
            &fast_options(),
            false,
        )
        .unwrap();
        decrypt_file(&crypt_path, &decrypted_path, &mut reader(b"test")).unwrap();

        assert_eq!(fs::read(&decrypted_path).unwrap(), b"");
    }

    #[test]
    fn test_overwrites_existing_output() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        fs::write(&plain_path, b"new").unwrap();
        fs::write(&decrypted_path, b"old contents that are longer").unwrap();

        encrypt_file(
            &plain_path,
            &crypt_path,
            &mut reader(b"test"),
            &fast_options(),
            false,
        )
        .unwrap();
        decrypt_file(&crypt_path, &decrypted_path, &mut reader(b"test")).unwrap();
        assert_eq!(fs::read(&decrypted_path).unwrap(), b"new");
    }

    #[test]
    fn test_default_output_path() {
        let cases = [
            ("report.pdf", Operation::Encrypt, "report.pdf.enc"),
            ("dir/report.pdf", Operation::Encrypt, "dir/report.pdf.enc"),
            ("report.pdf.enc", Operation::Decrypt, "report.pdf"),
            ("dir/archive.enc", Operation::Decrypt, "dir/archive"),
            ("report.bin", Operation::Decrypt, "report.bin.dec"),
            (".enc", Operation::Decrypt, ".enc.dec"),
            ("-", Operation::Encrypt, "-"),
            ("-", Operation::Decrypt, "-"),
        ];
        for (input, operation, expected) in cases {
            assert_eq!(
                default_output_path(Path::new(input), operation),
                PathBuf::from(expected),
                "{} {:?}",
                input,
                operation
            );
        }
    }
}
