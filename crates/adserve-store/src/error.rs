use adserve_core::BreakerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("campaign {0} already exists")]
    Duplicate(String),

    #[error(transparent)]
    Breaker(#[from] BreakerError),

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("store worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Errors that will fail the same way on every retry.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}
