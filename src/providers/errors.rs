use thiserror::Error;

/// Classification of provider failures, used by the fallback chain to
/// decide whether trying the next provider can possibly help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    RateLimit,
    InvalidInput,
    ServerError,
    Timeout,
    Network,
    Unknown,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LLMError {
    pub kind: ErrorKind,
    pub message: String,
}

impl LLMError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an error by its message text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify_message(&message),
            message,
        }
    }

    /// Classify a non-success HTTP response from a provider API.
    pub fn from_http(status: u16, body: &str) -> Self {
        Self::classify(format!("API error ({}): {}", status, body))
    }

    /// Classify a reqwest transport failure (timeouts and connection
    /// errors carry structured flags that beat substring matching).
    pub fn from_transport(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::Network
        } else {
            classify_message(&err.to_string())
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }

    /// Whether the fallback chain should try the next provider.
    /// Auth and invalid-input failures will not succeed anywhere else
    /// with the same request.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, ErrorKind::Auth | ErrorKind::InvalidInput)
    }
}

/// Substring heuristics over status codes and keywords. Providers wrap
/// heterogeneous HTTP errors, so the text is all we have.
fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    if has("401") || has("403") || has("unauthorized") || has("authentication") {
        ErrorKind::Auth
    } else if has("429") || has("rate limit") || has("rate_limit") {
        ErrorKind::RateLimit
    } else if has("400") || has("invalid") {
        ErrorKind::InvalidInput
    } else if has("500") || has("502") || has("503") || has("overloaded") {
        ErrorKind::ServerError
    } else if has("timeout") || has("deadline") {
        ErrorKind::Timeout
    } else if has("connection") || has("dns") || has("refused") {
        ErrorKind::Network
    } else {
        ErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth() {
        assert_eq!(
            LLMError::from_http(401, "unauthorized").kind,
            ErrorKind::Auth
        );
        assert_eq!(
            LLMError::classify("authentication failed").kind,
            ErrorKind::Auth
        );
    }

    #[test]
    fn classifies_rate_limit() {
        assert_eq!(
            LLMError::from_http(429, "too many requests").kind,
            ErrorKind::RateLimit
        );
        assert_eq!(
            LLMError::classify("rate_limit_error: slow down").kind,
            ErrorKind::RateLimit
        );
    }

    #[test]
    fn classifies_invalid_input() {
        assert_eq!(
            LLMError::from_http(400, "invalid_request_error").kind,
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn classifies_server_error() {
        assert_eq!(
            LLMError::from_http(503, "overloaded").kind,
            ErrorKind::ServerError
        );
        assert_eq!(
            LLMError::classify("the backend is overloaded").kind,
            ErrorKind::ServerError
        );
    }

    #[test]
    fn classifies_timeout_and_network() {
        assert_eq!(
            LLMError::classify("operation timeout").kind,
            ErrorKind::Timeout
        );
        assert_eq!(
            LLMError::classify("context deadline exceeded").kind,
            ErrorKind::Timeout
        );
        assert_eq!(
            LLMError::classify("connection refused").kind,
            ErrorKind::Network
        );
        assert_eq!(LLMError::classify("dns lookup failed").kind, ErrorKind::Network);
    }

    #[test]
    fn unclassified_is_unknown_and_retryable() {
        let err = LLMError::classify("something odd happened");
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(err.is_retryable());
    }

    #[test]
    fn auth_and_invalid_input_are_terminal() {
        assert!(!LLMError::new(ErrorKind::Auth, "x").is_retryable());
        assert!(!LLMError::new(ErrorKind::InvalidInput, "x").is_retryable());
        assert!(LLMError::new(ErrorKind::RateLimit, "x").is_retryable());
        assert!(LLMError::new(ErrorKind::ServerError, "x").is_retryable());
        assert!(LLMError::new(ErrorKind::Timeout, "x").is_retryable());
        assert!(LLMError::new(ErrorKind::Network, "x").is_retryable());
    }
}
