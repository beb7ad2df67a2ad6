use thiserror::Error;

/// Failures reported by the remote SERP collaborator for a single network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Timeouts and transport errors are worth resubmitting; a reply we
    /// cannot decode will not improve on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Timeout | ApiError::Transport(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

/// Why one page of a query could not be fetched. Always scoped to that page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("submission returned no correlation token")]
    NoCorrelationToken,

    #[error("result still pending after {polls} polls")]
    PollingTimeout { polls: u32 },

    #[error("timed out on all {attempts} attempts")]
    TimeoutExhausted { attempts: u32 },

    #[error("poll failed with http status {0}")]
    HttpStatus(u16),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cancelled")]
    Cancelled,
}

impl PageError {
    /// Stable identifier used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PageError::NoCorrelationToken => "no_correlation_token",
            PageError::PollingTimeout { .. } => "polling_timeout",
            PageError::TimeoutExhausted { .. } => "timeout_exhausted",
            PageError::HttpStatus(_) => "http_status",
            PageError::RetriesExhausted { .. } => "retries_exhausted",
            PageError::Transport(_) => "transport_error",
            PageError::Cancelled => "cancelled",
        }
    }
}
