//! Strict subset of RFC 7049 (CBOR) shared by the generator and by
//! generated object models.
//!
//! Supported: major types 0/1 (integers within `i64`), 2 (byte string),
//! 3 (UTF-8 string), 4 (array), 5 (map with UTF-8 string keys), 6 (tags,
//! skipped transparently), and the major-7 values `false`, `true`, `null`
//! and IEEE-754 double. Both definite and indefinite lengths are accepted
//! on the way in; the writer only ever emits indefinite-length containers.
//!
//! Everything else - `undefined`, half and single precision floats, stray
//! breaks, reserved additional-information values, unsigned integers past
//! `i64::MAX` - is rejected up front by [`Reader::new`].

mod reader;
mod writer;

pub use reader::{Reader, Slice};
pub use writer::{ArrayWriter, MapWriter, Writer};

/// Errors produced by the CBOR reader and writer.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CborError {
    /// Structurally malformed input.
    #[error("invalid CBOR: {0}")]
    #[diagnostic(code(treegen::cbor::invalid))]
    Invalid(String),

    /// The data is well-formed but not the kind the caller asked for.
    #[error("unexpected CBOR structure: expected {expected} but found {found}")]
    #[diagnostic(code(treegen::cbor::unexpected))]
    Unexpected {
        expected: &'static str,
        found: &'static str,
    },

    /// A nested writer was still open when this writer was used.
    #[error("write to inactive writer")]
    #[diagnostic(code(treegen::cbor::inactive_writer))]
    InactiveWriter,

    /// The top-level writer was consumed while child writers were open.
    #[error("writer left open")]
    #[diagnostic(code(treegen::cbor::unclosed_writer))]
    UnclosedWriter,
}

impl CborError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CborError>;
