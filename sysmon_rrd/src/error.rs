use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RrdError>;

#[derive(Debug, Error)]
pub enum RrdError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid archive list: {0}")]
    InvalidArchives(String),

    #[error("invalid retention '{0}'")]
    InvalidRetention(String),

    #[error("xff must be within 0.0..=1.0, got {0}")]
    InvalidXff(f32),

    #[error("unknown aggregation method '{0}'")]
    UnknownAggregation(String),

    #[error("corrupt database {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("no archive tier {0}")]
    NoSuchTier(usize),
}

impl RrdError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RrdError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RrdError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
