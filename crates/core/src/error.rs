use thiserror::Error;
use uuid::Uuid;

pub type ConvoResult<T> = Result<T, ConvoError>;

#[derive(Error, Debug)]
pub enum ConvoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("Invalid cohort type: {0}")]
    InvalidCohortType(String),

    #[error("Cohort not found: {0}")]
    CohortNotFound(Uuid),

    #[error("Metric fetch error: {0}")]
    MetricFetch(String),

    #[error("Membership store error: {0}")]
    MembershipStore(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
