//! Tagged error type shared by every layer of the engine.

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Category of an [`Error`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Underlying file read/write/seek failed.
    Io,
    /// Encoding or decoding a value failed.
    Codec,
    /// The caller's schema or row data is inconsistent with the registry.
    Schema,
    /// A batch ended mid-frame during iteration.
    Truncated,
    /// Structural failure while scanning existing batches on first write.
    Validate,
}

/// Engine error: a kind tag, a human-readable context line, and the
/// underlying cause when one exists.
#[derive(Debug, Error)]
#[error("{kind:?}: {context}")]
pub struct Error {
    kind: ErrorKind,
    context: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
            source: None,
        }
    }

    pub(crate) fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::new(ErrorKind::Io, context).with_source(source)
    }

    pub(crate) fn codec(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::new(ErrorKind::Codec, context).with_source(source)
    }

    pub(crate) fn schema(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, context)
    }

    pub(crate) fn truncated(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Truncated, context)
    }

    pub(crate) fn validate(context: impl Into<String>, source: io::Error) -> Self {
        Self::new(ErrorKind::Validate, context).with_source(source)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_context() {
        let err = Error::schema("column Foo declared twice");
        assert_eq!(err.to_string(), "Schema: column Foo declared twice");
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn source_is_chained() {
        let io = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let err = Error::io("write batch header", io);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.source().is_some());
    }
}
