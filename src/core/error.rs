//! Error taxonomy shared by the services and the HTTP layer.

use thiserror::Error;

/// Outcomes a request can end with besides success.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Conversation or resource is absent, or not owned by the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or invalid session credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Duplicate registration.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Persistence failed; fatal for the request in flight.
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure of an external collaborator (quote source or generator).
///
/// Never surfaces as a [`ChatError`]: the caller degrades it to a fallback quote or
/// to error text inside the reply.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    #[error("no usable data")]
    NoData,
}
