//! Error taxonomy surfaced to callers of the core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during store, hierarchy and workbook operations
#[derive(Error, Debug)]
pub enum OrgError {
    #[error("{entity} \"{key}\" already exists")]
    DuplicateKey { entity: &'static str, key: String },

    #[error("{entity} \"{key}\" not found")]
    NotFound { entity: &'static str, key: String },

    #[error("cannot move \"{code}\" under \"{parent}\": the new parent is the unit itself or one of its descendants")]
    CycleDetected { code: String, parent: String },

    #[error("parent unit \"{0}\" not found or deleted")]
    ParentNotFound(String),

    #[error("cannot delete \"{code}\": {count} active child unit{}", plural(.count))]
    HasActiveChildren { code: String, count: u32 },

    #[error("cannot delete \"{code}\": {count} active employee{} assigned", plural(.count))]
    HasActiveEmployees { code: String, count: u32 },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("database schema version {found} is not supported, expected {expected}")]
    UnsupportedSchema { found: i32, expected: i32 },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workbook error: {0}")]
    Workbook(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid config file {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0:?} is in use by another process")]
    Locked(PathBuf),
}

fn plural(count: &u32) -> &'static str {
    if *count == 1 {
        ""
    } else {
        "s"
    }
}

/// Machine-readable failure kind for the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    DuplicateKey,
    NotFound,
    CycleDetected,
    ParentNotFound,
    HasActiveChildren,
    HasActiveEmployees,
    Internal,
}

impl OrgError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrgError::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            OrgError::NotFound { .. } => ErrorKind::NotFound,
            OrgError::CycleDetected { .. } => ErrorKind::CycleDetected,
            OrgError::ParentNotFound(_) => ErrorKind::ParentNotFound,
            OrgError::HasActiveChildren { .. } => ErrorKind::HasActiveChildren,
            OrgError::HasActiveEmployees { .. } => ErrorKind::HasActiveEmployees,
            OrgError::Storage(_)
            | OrgError::UnsupportedSchema { .. }
            | OrgError::Io { .. }
            | OrgError::Workbook(_)
            | OrgError::Csv(_)
            | OrgError::Config { .. }
            | OrgError::Locked(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn unit_not_found(code: &str) -> Self {
        OrgError::NotFound {
            entity: "unit",
            key: code.to_string(),
        }
    }

    pub(crate) fn employee_not_found(fiscal_code: &str) -> Self {
        OrgError::NotFound {
            entity: "employee",
            key: fiscal_code.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OrgError::Io {
            path: path.into(),
            source,
        }
    }

    /// Maps a UNIQUE violation on a natural key to `DuplicateKey`
    pub(crate) fn from_insert(err: rusqlite::Error, entity: &'static str, key: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                OrgError::DuplicateKey {
                    entity,
                    key: key.to_string(),
                }
            }
            _ => OrgError::Storage(err),
        }
    }
}

pub type Result<T, E = OrgError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_report_blocking_counts() {
        let err = OrgError::HasActiveEmployees {
            code: "G01".to_string(),
            count: 2,
        };
        assert_eq!(err.to_string(), "cannot delete \"G01\": 2 active employees assigned");
        assert_eq!(err.kind(), ErrorKind::HasActiveEmployees);

        let err = OrgError::HasActiveChildren {
            code: "G".to_string(),
            count: 1,
        };
        assert_eq!(err.to_string(), "cannot delete \"G\": 1 active child unit");
    }

    #[test]
    fn test_kind_serializes_as_tag() {
        let json = serde_json::to_string(&ErrorKind::CycleDetected).unwrap();
        assert_eq!(json, "\"CYCLE_DETECTED\"");
        let err = OrgError::Workbook("bad".to_string());
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
