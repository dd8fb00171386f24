use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unauthorized (token missing or expired)")]
    Unauthorized,

    #[error("No active session; log in first")]
    NotAuthenticated,

    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Local storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Failures a UI would show as a generic "try again" alert rather than a form error.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::Socket(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = ClientError::Status { status: 503, body: String::new() };
        assert!(err.is_transient());
        let err = ClientError::Status { status: 422, body: "bad".into() };
        assert!(!err.is_transient());
        assert!(!ClientError::Unauthorized.is_transient());
    }

    #[test]
    fn status_display_includes_body() {
        let err = ClientError::Status { status: 404, body: "not found".into() };
        assert_eq!(err.to_string(), "HTTP 404: not found");
    }
}
