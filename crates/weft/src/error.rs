use std::fmt;

use strum::{Display, IntoStaticStr};

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, Error>;

/// Classification of engine errors.
///
/// Uses strum derives for automatic `Display` and `Into<&'static str>`
/// implementations; the string form matches the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ErrorKind {
    /// Malformed template or expression syntax.
    Parse,
    /// A required file or variable could not be found.
    NotFound,
    /// Allocation failure. Never raised by this implementation (allocation
    /// failure aborts); the variant is kept so callers matching on kinds
    /// cover the full taxonomy of the wire-compatible engines.
    NoMem,
    /// Invariant violation, e.g. rendering with no parse tree.
    Assert,
    /// Re-registration of an already registered function name.
    Duplicate,
    /// I/O or other wrapped lower-level failure.
    System,
}

/// An engine error: a kind, an optional source context, and a message.
///
/// The context string locates the failure in template source, in the shape
/// `[file:42]` for file input, `[name:~3]` for named string input (line
/// numbers for strings are approximate), or `[lineno:~3]` for anonymous
/// string input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    message: String,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, context: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            context,
            message: message.into(),
        }
    }

    pub(crate) fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, Some(context.into()), message)
    }

    pub(crate) fn not_found(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, Some(context.into()), message)
    }

    pub(crate) fn assert(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Assert, None, message)
    }

    pub(crate) fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, None, message)
    }

    pub(crate) fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, None, message)
    }

    /// The error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The source-location context, when the failure happened while
    /// compiling template text.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// The human-readable message, without the context prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{context} {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::system(err.to_string())
    }
}
