use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Failure of a single Canvas API round trip.
///
/// Every variant carries the HTTP method and the fully resolved URL so the
/// error is actionable once it reaches the process boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{method} {url} failed: {message}")]
    Transport {
        method: Method,
        url: String,
        message: String,
    },
    #[error("{method} {url} returned HTTP {status}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
    },
    #[error("{method} {url} returned a body that is not valid JSON")]
    Decode {
        method: Method,
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{method} {url} returned an unexpected payload: {detail}")]
    UnexpectedShape {
        method: Method,
        url: String,
        detail: String,
    },
    #[error("invalid Canvas API url {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Transport,
    Status,
    Decode,
    Other,
}

impl ApiError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            Self::Transport { .. } => ApiErrorKind::Transport,
            Self::Status { .. } => ApiErrorKind::Status,
            Self::Decode { .. } => ApiErrorKind::Decode,
            Self::UnexpectedShape { .. } | Self::InvalidUrl { .. } => ApiErrorKind::Other,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Deterministic, data-driven failures. None of these are retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("the following tool IDs from your migrations were not found in the account: {ids:?}")]
    InvalidToolIds { ids: Vec<i64> },
    #[error(
        "one or both of tool IDs [{source_tool_id}, {target_tool_id}] are not available in course {course_id}"
    )]
    ToolsMissingInCourse {
        course_id: i64,
        source_tool_id: i64,
        target_tool_id: i64,
    },
    #[error("tab {tab_id:?} does not follow the external tool id convention: {detail}")]
    TabContract { tab_id: String, detail: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}
