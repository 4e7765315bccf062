//! Typed error hierarchy for the fulfillment engine.
//!
//! `EngineError` is what every engine operation returns. Upstream transport
//! failures are `GatewayError` (see `fulfillment::gateway`) and are wrapped
//! as `UpstreamUnavailable` once retries are exhausted.

use thiserror::Error;

use crate::fulfillment::gateway::GatewayError;
use crate::fulfillment::models::AssignmentStatus;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Blocked,
    UpstreamUnavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Worker {id} not found")]
    WorkerNotFound { id: i64 },

    #[error("Assignment {id} not found")]
    AssignmentNotFound { id: i64 },

    #[error("No assignment or history found for order {order_number}")]
    OrderNotFound { order_number: String },

    #[error("Upstream order system unavailable: {0}")]
    UpstreamUnavailable(#[source] GatewayError),

    #[error("Upstream refused to confirm status '{target}': {reason}")]
    Blocked {
        target: AssignmentStatus,
        reason: String,
    },

    #[error("Failed to archive assignment {assignment_id}: {source}")]
    DataIntegrity {
        assignment_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Forbidden(_) => ErrorKind::Validation,
            Self::WorkerNotFound { .. }
            | Self::AssignmentNotFound { .. }
            | Self::OrderNotFound { .. } => ErrorKind::NotFound,
            Self::Blocked { .. } => ErrorKind::Blocked,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::DataIntegrity { .. } | Self::Database(_) => ErrorKind::Internal,
        }
    }

    /// Whether repeating the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_) | Self::Blocked { .. } | Self::DataIntegrity { .. }
        )
    }
}

/// Storage closures return `anyhow::Result`; a typed `EngineError` raised
/// inside one is recovered here, anything else is a database failure.
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<EngineError>() {
            Ok(engine) => engine,
            Err(other) => Self::Database(other),
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        Self::UpstreamUnavailable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_kinds_are_distinct() {
        assert_eq!(EngineError::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(EngineError::Forbidden("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(EngineError::WorkerNotFound { id: 1 }.kind(), ErrorKind::NotFound);
        assert_eq!(EngineError::AssignmentNotFound { id: 1 }.kind(), ErrorKind::NotFound);
        assert_eq!(
            EngineError::Blocked {
                target: AssignmentStatus::Shipped,
                reason: "timeout".into()
            }
            .kind(),
            ErrorKind::Blocked
        );
        assert_eq!(
            EngineError::UpstreamUnavailable(GatewayError::Timeout).kind(),
            ErrorKind::UpstreamUnavailable
        );
        assert_eq!(
            EngineError::Database(anyhow::anyhow!("disk full")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn anyhow_round_trip_recovers_typed_error() {
        let wrapped: anyhow::Error = EngineError::AssignmentNotFound { id: 42 }.into();
        let back: EngineError = wrapped.into();
        match back {
            EngineError::AssignmentNotFound { id } => assert_eq!(id, 42),
            other => panic!("Expected AssignmentNotFound, got {other:?}"),
        }
    }

    #[test]
    fn plain_anyhow_becomes_database_error() {
        let err: EngineError = anyhow::anyhow!("no such table: workers").into();
        assert!(matches!(err, EngineError::Database(_)));
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn data_integrity_is_retryable_validation_is_not() {
        let di = EngineError::DataIntegrity {
            assignment_id: 3,
            source: anyhow::anyhow!("database is locked"),
        };
        assert!(di.is_retryable());
        assert!(di.to_string().contains('3'));
        assert!(!EngineError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn engine_error_implements_std_error_trait() {
        fn assert_std_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}
        assert_std_error(&EngineError::WorkerNotFound { id: 1 });
    }
}
