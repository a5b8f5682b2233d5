//! Error types for the query tracker

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the tracker
#[derive(Error, Debug)]
pub enum Error {
    /// Persistence error
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Group-by override rejected
    #[error("Override error: {0}")]
    Override(#[from] OverrideError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Requested pqid is not tracked
    #[error("pqid {0} does not exist")]
    NotFound(String),

    /// General error
    #[error("{0}")]
    General(String),
}

/// Errors raised while writing, reading or merging snapshot files
#[derive(Error, Debug)]
pub enum PersistError {
    /// IO operation failed
    #[error("IO error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Snapshot content is not valid JSON for the expected map
    #[error("Failed to parse {path}: {reason}")]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// In-memory state could not be encoded
    #[error("Failed to serialize {kind} snapshot: {reason}")]
    Serialize {
        /// Which snapshot was being written
        kind: &'static str,
        /// Encoder message
        reason: String,
    },
}

impl PersistError {
    /// Path of the file involved, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            PersistError::Io { path, .. } | PersistError::Parse { path, .. } => Some(path),
            PersistError::Serialize { .. } => None,
        }
    }
}

/// Administrator input rejected by the override store
///
/// Rejection happens before any state is touched.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OverrideError {
    /// Overrides cannot target every table at once
    #[error("tableName can not be *")]
    WildcardTable,

    /// Body did not name a table
    #[error("tableName is required")]
    MissingTableName,

    /// A column list contained something other than strings
    #[error("{key}: type {found} not accepted, expected a list of strings")]
    InvalidColumnType {
        /// Offending key
        key: String,
        /// JSON type that was found
        found: &'static str,
    },

    /// Unknown or wrongly typed key
    #[error("Invalid key=[{0}]")]
    InvalidKey(String),

    /// Body is not a JSON object
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

/// Validation errors for configuration values
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_error_messages() {
        assert_eq!(OverrideError::WildcardTable.to_string(), "tableName can not be *");
        let err = OverrideError::InvalidColumnType {
            key: "groupByColumns".to_string(),
            found: "number",
        };
        assert!(err.to_string().contains("groupByColumns"));
    }

    #[test]
    fn test_validation_converts_to_configuration() {
        let err: Error = ValidationError::MissingField("host_id".to_string()).into();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_persist_error_path() {
        let err = PersistError::Parse {
            path: PathBuf::from("/tmp/pqinfo.json"),
            reason: "eof".to_string(),
        };
        assert_eq!(err.path(), Some(&PathBuf::from("/tmp/pqinfo.json")));
    }
}
