use std::error::Error as StdError;
use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The user provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The passphrase is unusable (currently: empty).
    InvalidKey,
    /// Chunk size, KDF parameters or a declared length are out of range or
    /// inconsistent with the input.
    InvalidArgument,
    /// Reading the input or writing the output failed.
    Io,
    /// The container header is truncated, has out-of-range fields, or the
    /// chunk stream does not match the header.
    MalformedContainer,
    /// Input is a container (or armored container) of a version we do not
    /// understand.
    UnsupportedVersion,
    /// Authentication failed due to an incorrect passphrase or tampering
    /// or corruption.
    AuthenticationFailed,
    /// The caller cancelled the operation before it finished.
    Cancelled,
    /// Low-level scrypt key derivation failed.
    KeyDerivation,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Unexpected state reached within sealstream logic.
    InternalInvariant,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct SealstreamError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl SealstreamError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that retains the originating source error.
    pub fn with_source(
        category: ErrorCategory,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: None,
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// Shorthand for an I/O failure on the input or output stream.
    ///
    /// A stream adapter that already classified its failure (for example an
    /// armor decoder rejecting corrupt text) passes a `SealstreamError` inside
    /// the `io::Error`; its category and kind are kept.
    pub(crate) fn io(msg: impl Into<String>, err: io::Error) -> Self {
        if let Some(inner) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<SealstreamError>())
        {
            let (category, kind) = (inner.category, inner.kind);
            return Self {
                category,
                kind,
                source: Some(Box::new(err)),
                msg: msg.into(),
            };
        }

        let category = if err.kind() == io::ErrorKind::NotFound {
            ErrorCategory::User
        } else {
            ErrorCategory::Internal
        };
        Self::with_kind_and_source(category, ErrorKind::Io, msg, err)
    }

    /// Shorthand for a structurally invalid container.
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::User, ErrorKind::MalformedContainer, msg)
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Returns true if the error carries the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == Some(kind)
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SealstreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_kind_and_category() {
        let err = SealstreamError::malformed("truncated header").with_context("failed to decrypt");

        assert_eq!(err.kind, Some(ErrorKind::MalformedContainer));
        assert_eq!(err.category, ErrorCategory::User);
        assert_eq!(err.message(), "failed to decrypt");
        assert_eq!(err.to_string(), "failed to decrypt");

        let inner = err.source_error().expect("context should keep the source");
        assert_eq!(inner.to_string(), "truncated header");
    }

    #[test]
    fn test_io_not_found_is_user_error() {
        let err = SealstreamError::io(
            "failed to open input",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.category, ErrorCategory::User);
        assert!(err.is(ErrorKind::Io));

        let err = SealstreamError::io(
            "failed to read input",
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe"),
        );
        assert_eq!(err.category, ErrorCategory::Internal);
    }

    #[test]
    fn test_io_keeps_classification_of_wrapped_error() {
        let wrapped = io::Error::new(
            io::ErrorKind::InvalidData,
            SealstreamError::malformed("invalid armored data"),
        );
        let err = SealstreamError::io("failed to read input", wrapped);

        assert_eq!(err.kind, Some(ErrorKind::MalformedContainer));
        assert_eq!(err.category, ErrorCategory::User);
        assert_eq!(err.message(), "failed to read input");
    }
}
