use thiserror::Error;

use crate::base::LogId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Catalog bitmap exhausted, or a plain log has no index left
    #[error("no free slot in log {0}")]
    NoSpace(LogId),

    #[error("log {0} not found")]
    NotFound(LogId),

    #[error("log {id} is corrupt: {reason}")]
    Corrupt { id: LogId, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation on a closed, destroyed or already-open handle
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("record of {size} bytes exceeds chunk budget of {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn corrupt(id: LogId, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            id,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether the caller can fix the condition and retry.
    /// `Corrupt` and `Io` leave durability ambiguous and are never retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoSpace(_) | Error::NotFound(_))
    }
}
