//! Typed error hierarchy for the pipeline orchestrator.
//!
//! Two top-level enums cover the two subsystems:
//! - `PlatformError` — transport and contract failures talking to the forge
//! - `WorkflowError` — orchestrator/poller policy failures, wrapping `PlatformError`

use thiserror::Error;

/// Errors from the platform client (REST + GraphQL calls to the forge).
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("rate limited calling {endpoint}, retry after {retry_after_secs}s")]
    RateLimited {
        endpoint: String,
        retry_after_secs: u64,
    },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("unexpected response shape from {endpoint}: {message}")]
    UnexpectedShape { endpoint: String, message: String },

    #[error("unauthorized calling {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("graphql error calling {endpoint}: {message}")]
    GraphQl { endpoint: String, message: String },
}

/// Errors from the orchestrator and reconciliation poller.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated for issue {issue_number}: {message}")]
    InvariantViolation { issue_number: i64, message: String },

    #[error("no configuration found for project {project_id}")]
    MissingConfiguration { project_id: String },

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
