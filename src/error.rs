//! Error reporting for parsing, validation and tree mutation.

use thiserror::Error;

/// Closed enumeration of error categories surfaced at the API boundary.
///
/// Schema validation failures map 1-to-1 onto these codes, so callers can
/// match on the category without parsing messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed JSON bytes.
    Lexical,
    /// A value appeared where the schema requires a different kind.
    TypeMismatch,
    /// A minimum/maximum/length/multipleOf constraint was violated.
    Range,
    /// An object is missing a required key.
    MissingRequired,
    /// A `uniqueItems` violation or duplicate object key.
    Duplicate,
    /// A `$ref` could not be resolved.
    Unresolved,
    /// An insertion would have made a value reachable from itself.
    CycleDetected,
    /// A numeric conversion was impossible.
    Conversion,
    /// Allocation or I/O failure.
    Resource,
    /// Anything else.
    Generic,
}

/// The crate-wide error type: a category plus enough context to report it.
///
/// Parse errors carry the byte offset of the offending input. Lossy numeric
/// conversions are deliberately *not* errors; they are reported through the
/// sticky [`ConvResult`](crate::number::ConvResult) mask instead.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed JSON bytes.
    #[error("malformed JSON at byte {offset}: {message}")]
    Lexical {
        /// Byte offset into the input where the problem was detected.
        offset: usize,
        /// Human-readable description of the problem.
        message: String,
    },
    /// A value appeared where the schema requires a different kind.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The kind the schema required.
        expected: &'static str,
        /// The kind that actually appeared.
        found: &'static str,
    },
    /// A bounds constraint was violated.
    #[error("{0}")]
    Range(String),
    /// An object is missing a required key.
    #[error("missing required key \"{0}\"")]
    MissingRequired(String),
    /// A `uniqueItems` violation or duplicate object key.
    #[error("{0}")]
    Duplicate(String),
    /// A `$ref` target that is not present in the schema registry.
    #[error("unresolved schema reference \"{0}\"")]
    Unresolved(String),
    /// An insertion was rejected because it would have created a cycle.
    #[error("insertion would create a cycle")]
    CycleDetected,
    /// A numeric conversion was impossible.
    #[error("numeric conversion failed: {0}")]
    Conversion(String),
    /// Allocation or I/O failure.
    #[error("resource failure: {0}")]
    Resource(String),
    /// Anything else.
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Returns the category of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Lexical { .. } => ErrorCode::Lexical,
            Error::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Error::Range(_) => ErrorCode::Range,
            Error::MissingRequired(_) => ErrorCode::MissingRequired,
            Error::Duplicate(_) => ErrorCode::Duplicate,
            Error::Unresolved(_) => ErrorCode::Unresolved,
            Error::CycleDetected => ErrorCode::CycleDetected,
            Error::Conversion(_) => ErrorCode::Conversion,
            Error::Resource(_) => ErrorCode::Resource,
            Error::Generic(_) => ErrorCode::Generic,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(other: std::io::Error) -> Self {
        Error::Resource(other.to_string())
    }
}
