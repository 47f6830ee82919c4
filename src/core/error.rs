use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Step of a transaction that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnPhase {
    /// Starting the session failed
    Session,
    /// The unit of work returned an error
    Callback,
    /// The unit of work succeeded but committing failed
    Commit,
}

impl fmt::Display for TxnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnPhase::Session => "session start",
            TxnPhase::Callback => "callback",
            TxnPhase::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MongoDB error: {0}")]
    Driver(#[from] mongodb::error::Error),

    #[error("{operation}: expected exactly one document, got {count}")]
    Cardinality { operation: &'static str, count: u64 },

    #[error("Transaction failed at {phase}: {source}")]
    Transaction {
        phase: TxnPhase,
        source: Box<DbError>,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub(crate) fn transaction(phase: TxnPhase, source: DbError) -> Self {
        Self::Transaction {
            phase,
            source: Box::new(source),
        }
    }

    /// True when a "must" operation matched zero or several documents.
    /// Looks through a transaction wrapper.
    pub fn is_cardinality(&self) -> bool {
        match self {
            DbError::Cardinality { .. } => true,
            DbError::Transaction { source, .. } => source.is_cardinality(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DbError::Timeout { .. })
    }

    pub fn transaction_phase(&self) -> Option<TxnPhase> {
        match self {
            DbError::Transaction { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Convert into a driver error so it can cross the driver's
    /// `with_transaction` boundary.
    ///
    /// Driver errors are returned as-is so their labels still drive the
    /// driver's retry loop.
    pub(crate) fn into_driver(self) -> mongodb::error::Error {
        match self {
            DbError::Driver(err) => err,
            other => mongodb::error::Error::custom(other),
        }
    }

    /// Inverse of [`DbError::into_driver`].
    pub(crate) fn from_driver(err: mongodb::error::Error) -> Self {
        match err.get_custom::<DbError>() {
            Some(inner) => inner.clone(),
            None => DbError::Driver(err),
        }
    }
}

/// Fail unless exactly one document was affected.
pub(crate) fn expect_one(operation: &'static str, count: u64) -> Result<()> {
    if count == 1 {
        Ok(())
    } else {
        Err(DbError::Cardinality { operation, count })
    }
}

/// Fail unless the filter matched exactly one document and that document
/// was modified. A multi-match is reported with its matched count even
/// when only one document changed.
pub(crate) fn expect_one_update(
    operation: &'static str,
    matched: u64,
    modified: u64,
) -> Result<()> {
    expect_one(operation, matched)?;
    expect_one(operation, modified)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_one() {
        assert!(expect_one("update", 1).is_ok());

        let zero = expect_one("update", 0).unwrap_err();
        assert!(matches!(zero, DbError::Cardinality { count: 0, .. }));

        let many = expect_one("delete", 3).unwrap_err();
        assert!(matches!(many, DbError::Cardinality { count: 3, .. }));
        assert_eq!(
            many.to_string(),
            "delete: expected exactly one document, got 3"
        );
    }

    #[test]
    fn test_expect_one_update() {
        assert!(expect_one_update("must_update_one", 1, 1).is_ok());

        // two matches, one of them already had the new value
        let err = expect_one_update("must_update_one", 2, 1).unwrap_err();
        assert!(matches!(err, DbError::Cardinality { count: 2, .. }));

        let unchanged = expect_one_update("must_update_one", 1, 0).unwrap_err();
        assert!(matches!(unchanged, DbError::Cardinality { count: 0, .. }));

        let missing = expect_one_update("must_update_by_id", 0, 0).unwrap_err();
        assert!(matches!(missing, DbError::Cardinality { count: 0, .. }));
    }

    #[test]
    fn test_custom_error_survives_driver_roundtrip() {
        let cause = DbError::Cardinality {
            operation: "must_update_one",
            count: 2,
        };

        let driver = cause.into_driver();
        let back = DbError::from_driver(driver);

        assert!(matches!(
            back,
            DbError::Cardinality {
                operation: "must_update_one",
                count: 2
            }
        ));
    }

    #[test]
    fn test_transaction_wrapper() {
        let err = DbError::transaction(
            TxnPhase::Callback,
            DbError::Cardinality {
                operation: "delete",
                count: 0,
            },
        );

        assert_eq!(err.transaction_phase(), Some(TxnPhase::Callback));
        assert!(err.is_cardinality());
        assert!(!err.is_timeout());
        assert!(err.to_string().starts_with("Transaction failed at callback"));
    }
}
