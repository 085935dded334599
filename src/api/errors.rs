//! File server API error types
//!
//! Maps HTTP status codes and transport failures to error variants that
//! drive retry decisions.

/// File server API error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized: credentials rejected")]
    Unauthorized,

    #[error("Rate limited — try again after backoff")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request error: {0}")]
    Request(String),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited | ApiError::Timeout | ApiError::Network(_) | ApiError::Server(_, _)
        )
    }

    /// Create an ApiError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden(body.to_string()),
            404 => ApiError::NotFound(body.to_string()),
            408 => ApiError::Timeout,
            429 => ApiError::RateLimited,
            500..=599 => ApiError::Server(status, body.to_string()),
            _ => ApiError::Request(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            ApiError::Network(err.to_string())
        } else {
            ApiError::Request(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(ApiError::from_status(401, ""), ApiError::Unauthorized));
        assert!(matches!(ApiError::from_status(404, "gone"), ApiError::NotFound(b) if b == "gone"));
        assert!(matches!(ApiError::from_status(429, ""), ApiError::RateLimited));
        assert!(matches!(ApiError::from_status(503, "busy"), ApiError::Server(503, _)));
        assert!(matches!(ApiError::from_status(418, "teapot"), ApiError::Request(_)));
    }

    #[test]
    fn test_retryable() {
        assert!(ApiError::from_status(500, "").is_retryable());
        assert!(ApiError::from_status(408, "").is_retryable());
        assert!(ApiError::Network("reset".into()).is_retryable());
        assert!(!ApiError::from_status(404, "").is_retryable());
        assert!(!ApiError::from_status(401, "").is_retryable());
        assert!(!ApiError::Decode("bad json".into()).is_retryable());
    }
}
