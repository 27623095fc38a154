//! Error types for the GIS engine.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the GIS engine.
#[derive(Error, Debug)]
pub enum Error {
    // Input errors
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    // Lookup errors
    #[error("{0} not found")]
    NotFound(String),

    #[error("no active scenario")]
    NoActiveScenario,

    // Store errors
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Rejected input. Nothing is mutated when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing position for {0}")]
    MissingPosition(String),

    #[error("invalid radius {radius} for {name}")]
    NegativeRadius { name: String, radius: f64 },

    #[error("invalid velocity {velocity} for {name}")]
    NegativeVelocity { name: String, velocity: f64 },

    #[error("unsupported path mode: {0}")]
    UnsupportedPathMode(String),

    #[error("unknown automation type: {0}")]
    UnknownAutomation(String),

    #[error("unsupported asset type: {0}")]
    UnsupportedAssetType(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("request asset name {body} differs from path asset name {path}")]
    NameMismatch { path: String, body: String },

    #[error("duplicate asset name: {0}")]
    DuplicateName(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Spatial store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row for {name}: {reason}")]
    CorruptRow { name: String, reason: String },
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(StoreError::Sqlite(e))
    }
}

impl Error {
    /// Check if error was caused by caller input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Check if error denotes a missing asset or scenario.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::NoActiveScenario)
    }

    /// Check if error is transient; the next tick or topology event retries the work.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Io(_))
    }
}

/// Context attached to log lines for failed operations.
#[derive(Debug)]
pub struct ErrorContext {
    pub asset: Option<String>,
    pub operation: &'static str,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation={}", self.operation)?;
        if let Some(ref asset) = self.asset {
            write!(f, ", asset={asset}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err: Error = ValidationError::UnknownAutomation("FOO".into()).into();
        assert!(err.is_validation());
        assert!(!err.is_not_found());

        assert!(Error::NoActiveScenario.is_not_found());
        assert!(Error::NotFound("ue1".into()).is_not_found());

        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(err.is_recoverable());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_error_context_display() {
        let ctx = ErrorContext {
            asset: Some("ue1".into()),
            operation: "refresh",
        };
        assert_eq!(ctx.to_string(), "operation=refresh, asset=ue1");
    }
}
