//! Errors returned by HTTP probes.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    /// The request never produced a response
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with something other than 200
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The endpoint answered 200 but the body is not what a healthy server sends
    #[error("{url} returned an unexpected body (expected {expected}): {body}")]
    UnexpectedBody {
        url: String,
        expected: &'static str,
        body: String,
    },

    /// The endpoint did not become healthy in time
    #[error("{url} not healthy after {after:?}")]
    Timeout {
        url: String,
        after: Duration,
        last_status: Option<String>,
    },

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ProbeError {
    /// HTTP status of the failed response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProbeError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
