use std::fmt;

/// Error kind for schema-layer errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    NotFound,
    Conflict,
    Shape,
    Io,
}

/// Schema-layer error — returned by registry, snapshot and value operations.
#[derive(Debug)]
pub struct SchemaError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SchemaError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Parse, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::NotFound, message: msg.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Conflict, message: msg.into() }
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Shape, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for SchemaError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → SchemaError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for SchemaError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<std::num::ParseIntError> for SchemaError {
    fn from(e: std::num::ParseIntError) -> Self {
        Self::parse(e.to_string())
    }
}
