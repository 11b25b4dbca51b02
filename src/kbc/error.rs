//! API error types

use thiserror::Error;

/// Error surfaced by every client, codec, poller and resource operation
#[derive(Error, Debug)]
pub enum ApiError {
    /// DNS, connection or timeout failure before an HTTP status was received
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx response
    #[error("{endpoint} returned HTTP {status}{}", message_suffix(.message))]
    HttpStatus {
        status: u16,
        endpoint: String,
        message: Option<String>,
    },

    /// Malformed or unexpectedly shaped response body
    #[error("failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// Client-side constraint violation
    #[error("validation error: {0}")]
    Validation(String),

    /// Job reached a failing terminal status
    #[error("job {job_id} finished with status '{status}'{}", message_suffix(.message))]
    JobFailed {
        job_id: String,
        status: String,
        message: Option<String>,
    },

    /// Job did not reach a terminal status before the configured deadline
    #[error("job {job_id} still '{status}' after {waited_secs}s")]
    JobTimeout {
        job_id: String,
        status: String,
        waited_secs: u64,
    },
}

fn message_suffix(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {}", m),
        None => String::new(),
    }
}

impl ApiError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn decode<E: std::fmt::Display>(endpoint: &str, err: E) -> Self {
        Self::Decode {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }

    /// HTTP status if this error came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for a 404 response
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display_includes_message() {
        let err = ApiError::HttpStatus {
            status: 400,
            endpoint: "POST buckets".to_string(),
            message: Some("Bucket already exists".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "POST buckets returned HTTP 400: Bucket already exists"
        );
        assert_eq!(err.status(), Some(400));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_job_failed_without_message() {
        let err = ApiError::JobFailed {
            job_id: "123".to_string(),
            status: "error".to_string(),
            message: None,
        };
        assert_eq!(err.to_string(), "job 123 finished with status 'error'");
        assert_eq!(err.status(), None);
    }
}
