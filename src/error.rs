//! Error taxonomy shared by every subsystem.
//!
//! Each variant corresponds to one of the categories in the error-handling
//! design: `Validation` and `InsufficientPosition`/`UnknownLot` are
//! user-visible and never retried; `ProviderTransient` is retried by the
//! downloader's backoff envelope before escalating to `ProviderFatal`;
//! `ConstraintViolation` on a transaction's `external_id` is converted to
//! idempotent success by the caller rather than surfaced here.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("insufficient position: requested {requested}, available {available} for {symbol}")]
    InsufficientPosition {
        symbol: String,
        requested: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("unknown or closed lot {lot_id} for {symbol}")]
    UnknownLot { symbol: String, lot_id: i64 },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage corrupt: {0}")]
    Corrupt(String),

    #[error("provider transient error ({0}): {1}")]
    ProviderTransient(String, String),

    #[error("provider fatal error ({0}): {1}")]
    ProviderFatal(String, String),

    #[error("data quality warning: {0}")]
    DataQualityWarning(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error classification used by the CLI boundary to pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Business,
    Storage,
    Unclassified,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Business => "business",
            ErrorClass::Storage => "storage",
            ErrorClass::Unclassified => "unclassified",
        };
        write!(f, "{s}")
    }
}

impl PortfolioError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PortfolioError::Validation(_)
            | PortfolioError::InsufficientPosition { .. }
            | PortfolioError::UnknownLot { .. }
            | PortfolioError::ProviderFatal(_, _)
            | PortfolioError::DataQualityWarning(_) => ErrorClass::Business,
            PortfolioError::ConstraintViolation(_)
            | PortfolioError::NotFound(_)
            | PortfolioError::Corrupt(_)
            | PortfolioError::Sqlite(_) => ErrorClass::Storage,
            PortfolioError::ProviderTransient(_, _) | PortfolioError::Io(_) => {
                ErrorClass::Unclassified
            }
        }
    }

    /// Exit code per spec: 0 success, 1 business error, 2 data-store error, 3 unclassified.
    pub fn exit_code(&self) -> i32 {
        match self.class() {
            ErrorClass::Business => 1,
            ErrorClass::Storage => 2,
            ErrorClass::Unclassified => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, PortfolioError>;
