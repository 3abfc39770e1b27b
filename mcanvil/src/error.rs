use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while reading or writing world data.
///
/// `Format` covers bad input data (unknown tag types, truncated streams,
/// corrupt compression, oversized payloads) and is fatal only for the single
/// entity being decoded. `Internal` indicates a codec bug (inconsistent
/// sector accounting, runaway substitute chains) and always aborts the
/// surrounding operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(String),

    #[error("internal consistency error: {0}")]
    Internal(String),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn format<S: Into<String>>(message: S) -> Error {
        Error::Format(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Error {
        Error::Internal(message.into())
    }

    /// Whether this error must abort a whole-region operation instead of
    /// degrading to a skipped slot.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}
