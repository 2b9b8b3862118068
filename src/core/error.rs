//! Error taxonomy for caller-facing failures.

/// Failures a caller is expected to branch on.
///
/// Upstream price/exchange failures other than timeouts are not represented
/// here: components degrade to empty results instead of surfacing them.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Transaction {0} is already closed")]
    AlreadyClosed(String),

    /// Upstream call exceeded its time budget; safe to retry.
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Timeout(_))
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Rejects NaN and infinities before they reach a stored document.
pub fn ensure_finite(field: &str, value: f64) -> ServiceResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ServiceError::InvalidInput(format!(
            "{field} must be a finite number"
        )))
    }
}
