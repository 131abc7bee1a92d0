use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Errors raised by the merge, migration and backup engines.
#[derive(Debug, Error)]
pub enum Error {
    #[error("source not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("invalid format in {}: {reason}", .path.display())]
    FormatInvalid { path: PathBuf, reason: String },

    #[error("store is in use by a running browser: {}", .0.display())]
    ProfileLocked(PathBuf),

    #[error("backup failed: {0}")]
    Backup(String),

    #[error("{data_type} migration from {from} to {to} is not implemented")]
    Unsupported {
        data_type: String,
        from: String,
        to: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used when aggregating per-item failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceMissing,
    FormatInvalid,
    StoreWrite,
    Backup,
    Unsupported,
}

impl Error {
    pub fn format_invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::FormatInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SourceMissing(_) => ErrorKind::SourceMissing,
            Error::FormatInvalid { .. } | Error::Json(_) => ErrorKind::FormatInvalid,
            Error::Backup(_) | Error::Zip(_) => ErrorKind::Backup,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
            Error::ProfileLocked(_) | Error::Io(_) | Error::Sqlite(_) => ErrorKind::StoreWrite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::SourceMissing(PathBuf::from("/nope")).kind(),
            ErrorKind::SourceMissing
        );
        assert_eq!(
            Error::format_invalid("/x/sessionstore.jsonlz4", "bad magic").kind(),
            ErrorKind::FormatInvalid
        );
        assert_eq!(
            Error::Sqlite(rusqlite::Error::QueryReturnedNoRows).kind(),
            ErrorKind::StoreWrite
        );
    }

    #[test]
    fn test_display_mentions_path() {
        let err = Error::format_invalid("/p/places.sqlite", "quick_check failed");
        let text = err.to_string();
        assert!(text.contains("places.sqlite"));
        assert!(text.contains("quick_check failed"));
    }
}
