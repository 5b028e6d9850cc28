use thiserror::Error;

/// Which recovery policy an error falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// HTTP or WebSocket failure. The caller may retry by publishing again.
    Transport,
    /// Malformed message, missing field or bad SDP. The attempt is aborted.
    Protocol,
    /// Missing encoder or unsupported GPU backend. Fatal to the attempt.
    Resource,
    /// API misuse. Logged and treated as a no-op.
    Contract,
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Authentication failed with status {status}: {body}")]
    Authentication { status: u16, body: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Resource unavailable: {0}")]
    Resource(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StreamError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Authentication { .. }
            | StreamError::Connection(_)
            | StreamError::Io(_)
            | StreamError::Runtime(_)
            | StreamError::Other(_) => ErrorCategory::Transport,
            StreamError::Protocol(_) | StreamError::Negotiation(_) | StreamError::Json(_) => {
                ErrorCategory::Protocol
            }
            StreamError::Resource(_) | StreamError::NotSupported(_) => ErrorCategory::Resource,
            StreamError::Configuration(_) | StreamError::InvalidState(_) => {
                ErrorCategory::Contract
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        let auth = StreamError::Authentication {
            status: 401,
            body: "bad token".into(),
        };
        assert_eq!(auth.category(), ErrorCategory::Transport);
        assert_eq!(
            StreamError::Negotiation("Could not create offer".into()).category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            StreamError::Resource("no hardware encoder".into()).category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            StreamError::InvalidState("already publishing".into()).category(),
            ErrorCategory::Contract
        );
    }

    #[test]
    fn test_authentication_display_carries_status_and_body() {
        let err = StreamError::Authentication {
            status: 403,
            body: "{\"status\":\"fail\"}".into(),
        };
        let text = err.to_string();
        assert!(text.contains("403"));
        assert!(text.contains("fail"));
    }
}
