use thiserror::Error;

use crate::{
    budget::BudgetError, codec::CodecError, dp::DpError, matcher::MatchError,
    source::SourceError, types::ValidationError,
};

pub type QueryResult<T> = Result<T, QueryError>;

/// Caller-facing classification of every failure the engine can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    BudgetExhausted,
    Configuration,
    Concurrency,
    InternalFault,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("privacy budget exhausted: {remaining} remaining")]
    BudgetExhausted { remaining: f64 },
    #[error(transparent)]
    Integrity(#[from] MatchError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("budget commit for {requester} failed after the pre-check passed: {source}")]
    Concurrency {
        requester: String,
        #[source]
        source: BudgetError,
    },
    #[error(transparent)]
    Noise(#[from] DpError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("internal fault: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Validation(_) => ErrorKind::Validation,
            QueryError::BudgetExhausted { .. } => ErrorKind::BudgetExhausted,
            QueryError::Configuration(_) => ErrorKind::Configuration,
            QueryError::Concurrency { .. } => ErrorKind::Concurrency,
            QueryError::Noise(DpError::InvalidEpsilon) => ErrorKind::Validation,
            QueryError::Noise(DpError::InvalidSeed) => ErrorKind::Configuration,
            // Strict-mode integrity aborts surface as opaque faults.
            QueryError::Integrity(_) | QueryError::Source(_) | QueryError::Internal(_) => {
                ErrorKind::InternalFault
            }
        }
    }
}

impl From<CodecError> for QueryError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::EmptyKey => QueryError::Configuration(err.to_string()),
            other => QueryError::Internal(other.to_string()),
        }
    }
}

impl From<BudgetError> for QueryError {
    fn from(err: BudgetError) -> Self {
        match err {
            BudgetError::Exhausted { remaining, .. } => QueryError::BudgetExhausted { remaining },
            BudgetError::InvalidTotal(_) => QueryError::Configuration(err.to_string()),
            BudgetError::InvalidEpsilon(epsilon) => {
                QueryError::Validation(ValidationError::InvalidEpsilon(epsilon))
            }
            BudgetError::UnknownRequester(_) => QueryError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordId;

    #[test]
    fn maps_module_errors_to_kinds() {
        assert_eq!(
            QueryError::from(CodecError::EmptyKey).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            QueryError::from(BudgetError::Exhausted {
                requester: "r".into(),
                remaining: 0.5,
                requested: 1.0,
            })
            .kind(),
            ErrorKind::BudgetExhausted
        );
        let integrity = MatchError::Integrity {
            record_id: RecordId::Numeric(1),
            field: crate::matcher::RecordField::Age,
            source: CodecError::Integrity,
        };
        assert_eq!(QueryError::from(integrity).kind(), ErrorKind::InternalFault);
        assert_eq!(
            QueryError::from(BudgetError::InvalidEpsilon(-1.0)).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            QueryError::from(ValidationError::EmptyRequester).kind(),
            ErrorKind::Validation
        );
    }
}
