use std::time::Duration;
use thiserror::Error;

/// Failure of a call to an external translation or judgment service.
///
/// Nothing in the pipeline propagates these to the message handler: the
/// orchestrator logs them and degrades to the untranslatable marker.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} API error ({status}): {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} call timed out after {elapsed:?}")]
    Timeout {
        service: &'static str,
        elapsed: Duration,
    },

    #[error("{service} returned an empty response")]
    Empty { service: &'static str },

    #[error("failed to decode {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    #[error("{0} is not configured")]
    Unconfigured(&'static str),
}

impl ServiceError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Rate limits (429), server errors (5xx), transport failures and
    /// timeouts are retryable; other 4xx responses and local problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            ServiceError::Transport { .. } | ServiceError::Timeout { .. } => true,
            ServiceError::Empty { .. }
            | ServiceError::Decode { .. }
            | ServiceError::Unconfigured(_) => false,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
