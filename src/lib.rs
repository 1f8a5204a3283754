//! sealstream - passphrase-based streaming encryption
//!
//! A [`StreamEngine`] turns any byte stream plus a passphrase into a
//! self-describing, chunked and authenticated container, and back. Key
//! derivation is scrypt, chunks are sealed with ChaCha20Poly1305.

#![forbid(unsafe_code)]

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod file_ops;
pub mod header;
pub mod kdf;
pub mod passphrase;
pub mod varmor;

pub use cancel::CancelFlag;
pub use config::EncryptOptions;
pub use engine::{CipherEngine, StreamEngine, StreamSummary, decrypt, encrypt};
pub use error::{ErrorCategory, ErrorKind, Result, SealstreamError};
pub use header::Header;
pub use kdf::KdfParams;
