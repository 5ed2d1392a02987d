use thiserror::Error;

pub type EngineResult<T> = core::result::Result<T, EngineError>;

/// Failure taxonomy shared by the ledger, rule engine, voucher service,
/// token protocol, and ingestion pipeline.
///
/// `Transient` is the only variant a caller may retry; the idempotency keys
/// (purchase `external_id`, token id) make those retries safe. Everything
/// else is terminal for the request that triggered it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("insufficient points: have {available}, requested {requested}")]
    InsufficientPoints { available: i64, requested: i64 },

    #[error("{0} expired")]
    Expired(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("{0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transient storage failure: {0}")]
    Transient(sqlx::Error),

    #[error(transparent)]
    Storage(sqlx::Error),
}

// postgres lock_not_available, raised when a NOWAIT/timeout-bounded lock
// acquisition gives up
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => EngineError::NotFound("record"),
            sqlx::Error::PoolTimedOut => EngineError::Transient(e),
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() {
                    EngineError::Conflict(db.message().to_string())
                } else if db.code().as_deref() == Some(PG_LOCK_NOT_AVAILABLE) {
                    EngineError::Transient(sqlx::Error::Database(db))
                } else {
                    EngineError::Storage(sqlx::Error::Database(db))
                }
            }
            other => EngineError::Storage(other),
        }
    }
}

impl EngineError {
    pub fn duplicate_transaction(external_id: &str) -> Self {
        EngineError::Conflict(format!("transaction '{external_id}' already submitted"))
    }

    /// Whether a caller holding the same idempotency key may safely resubmit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: EngineError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn pool_timeout_is_retryable() {
        let err: EngineError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!EngineError::InvalidSignature.is_retryable());
        assert!(!EngineError::Conflict("dup".into()).is_retryable());
        assert!(
            !EngineError::InsufficientPoints {
                available: 1,
                requested: 2
            }
            .is_retryable()
        );
    }
}
