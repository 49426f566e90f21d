use super::domain::{RequestId, UserId};
use super::repository::RepositoryError;

/// Typed failures surfaced by every marketplace operation.
#[derive(Debug, thiserror::Error)]
pub enum MarketplaceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },
    #[error("request {request_id} already admitted the maximum of {limit} responses")]
    AdmissionLimitExceeded { request_id: RequestId, limit: usize },
    #[error("invalid {machine} transition from {from} to {to}")]
    InvalidTransition {
        machine: &'static str,
        from: &'static str,
        to: &'static str,
    },
    #[error("actor {actor} is not permitted to {action}")]
    Unauthorized { actor: UserId, action: &'static str },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl MarketplaceError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn unauthorized(actor: &UserId, action: &'static str) -> Self {
        Self::Unauthorized {
            actor: actor.clone(),
            action,
        }
    }

    /// Stable code so callers can tell e.g. "already responded" from "limit reached".
    pub fn kind(&self) -> &'static str {
        match self {
            MarketplaceError::NotFound { .. } => "not_found",
            MarketplaceError::Duplicate { .. } => "duplicate",
            MarketplaceError::AdmissionLimitExceeded { .. } => "admission_limit_exceeded",
            MarketplaceError::InvalidTransition { .. } => "invalid_transition",
            MarketplaceError::Unauthorized { .. } => "unauthorized",
            MarketplaceError::PreconditionFailed(_) => "precondition_failed",
            MarketplaceError::Validation(_) => "validation",
            MarketplaceError::Repository(RepositoryError::Stale) => "contention",
            MarketplaceError::Repository(_) => "repository",
        }
    }

    fn is_stale(&self) -> bool {
        matches!(self, MarketplaceError::Repository(RepositoryError::Stale))
    }
}

/// Re-run a read-validate-write step while the store reports an optimistic conflict.
/// Every attempt re-reads current state, so validation errors stay deterministic.
pub(crate) fn retry_on_stale<T>(
    attempts: u32,
    operation: &'static str,
    mut step: impl FnMut() -> Result<T, MarketplaceError>,
) -> Result<T, MarketplaceError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match step() {
            Err(error) if error.is_stale() && attempt < attempts => {
                tracing::debug!(operation, attempt, "optimistic write conflict, retrying");
                attempt += 1;
            }
            Err(error) if error.is_stale() => {
                tracing::warn!(operation, attempts, "optimistic write retries exhausted");
                return Err(error);
            }
            other => return other,
        }
    }
}
