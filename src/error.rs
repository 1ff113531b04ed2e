//! Error types for unzip-http.

use std::io;
use thiserror::Error;

/// Every failure the archive reader can surface.
///
/// Variants fall into three scopes:
///
/// - fatal at open: [`Error::RangeUnsupported`], [`Error::CorruptArchive`],
///   [`Error::UnsupportedFeature`], and exhausted [`Error::Network`] retries
/// - scoped to one selection request: [`Error::InvalidPattern`], [`Error::NotFound`]
/// - scoped to one entry: [`Error::UnsupportedCompressionMethod`],
///   [`Error::DataIntegrity`], [`Error::UnsafePath`]
#[derive(Debug, Error)]
pub enum Error {
    #[error("remote server does not support byte ranges: {0}")]
    RangeUnsupported(String),

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("unsupported ZIP feature: {0}")]
    UnsupportedFeature(String),

    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("invalid pattern '{0}': at most one '*' wildcard is allowed")]
    InvalidPattern(String),

    #[error("no entry matches '{0}'")]
    NotFound(String),

    #[error("unsupported compression method {method} for '{name}'")]
    UnsupportedCompressionMethod { name: String, method: u16 },

    #[error("data integrity check failed for '{name}': {detail}")]
    DataIntegrity { name: String, detail: String },

    #[error("entry name '{0}' escapes the output directory")]
    UnsafePath(String),

    #[error("archive handle used after close")]
    UseAfterClose,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn network(message: impl Into<String>) -> Self {
        Error::Network {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Error::CorruptArchive(message.into())
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network { .. })
    }

    /// Whether this error, raised while opening, ends the whole session.
    pub fn is_fatal_for_open(&self) -> bool {
        matches!(
            self,
            Error::RangeUnsupported(_)
                | Error::CorruptArchive(_)
                | Error::UnsupportedFeature(_)
                | Error::Network { .. }
                | Error::UseAfterClose
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network {
            message: e.to_string(),
            source: Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
