use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CivicError {
    #[error("invalid entity id: {0:?}")]
    InvalidEntityId(String),

    #[error("invalid snapshot kind: {0}")]
    InvalidKind(String),

    #[error("invalid snapshot date: {0}")]
    InvalidSnapshotDate(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("snapshot request failed: {0}")]
    SnapshotHttp(String),

    #[error("snapshot returned status {status}: {message}")]
    SnapshotStatus { status: u16, message: String },

    #[error("enrichment request failed: {0}")]
    EnrichmentHttp(String),

    #[error("enrichment returned status {status}: {message}")]
    EnrichmentStatus { status: u16, message: String },

    #[error("chain file request failed: {0}")]
    LiftoverHttp(String),

    #[error("invalid chain file: {0}")]
    ChainParse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("snapshot is missing required column {0:?}")]
    MissingColumn(String),

    #[error("store error: {message}")]
    Store { message: String, fatal: bool },

    #[error("store at {0} is locked by another run")]
    StoreLocked(PathBuf),

    #[error("no {kind} found for {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("run cancelled before completion")]
    Cancelled,

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl CivicError {
    /// Transport failures, the kind of error a later re-run of the same id may fix.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CivicError::SnapshotHttp(_)
                | CivicError::SnapshotStatus { .. }
                | CivicError::EnrichmentHttp(_)
                | CivicError::EnrichmentStatus { .. }
                | CivicError::LiftoverHttp(_)
        )
    }

    pub fn is_fatal_store(&self) -> bool {
        matches!(
            self,
            CivicError::Store { fatal: true, .. } | CivicError::StoreLocked(_)
        )
    }
}

impl From<rusqlite::Error> for CivicError {
    fn from(err: rusqlite::Error) -> Self {
        let fatal = match err.sqlite_error_code() {
            Some(code) => matches!(
                code,
                rusqlite::ErrorCode::DiskFull
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::ReadOnly
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::DatabaseCorrupt
                    | rusqlite::ErrorCode::NotADatabase
                    | rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::OutOfMemory
            ),
            None => false,
        };
        CivicError::Store {
            message: err.to_string(),
            fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_errors_are_not_fatal() {
        let err = CivicError::from(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("NOT NULL constraint failed".to_string()),
        ));
        assert!(!err.is_fatal_store());
    }

    #[test]
    fn disk_full_is_fatal() {
        let err = CivicError::from(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        ));
        assert!(err.is_fatal_store());
    }
}
