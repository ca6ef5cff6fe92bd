use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("OpenAPI error: {code} - {message}")]
    OpenApi { code: i64, message: String },

    #[error("Client closed")]
    ClientClosed,
}

impl OpenApiError {
    /// Business error code, if the brokerage rejected the request
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::OpenApi { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Network-level failure (connection refused, timeout, DNS, socket closed)
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for OpenApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(format!("Failed to decode response: {}", err))
        } else if err.is_timeout() {
            Self::Transport(format!("Request timed out: {}", err))
        } else {
            Self::Transport(format!("Request failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for OpenApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("JSON error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for OpenApiError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(format!("WebSocket error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_only_for_business_errors() {
        let err = OpenApiError::OpenApi {
            code: 602_001,
            message: "invalid quantity".to_string(),
        };
        assert_eq!(err.code(), Some(602_001));
        assert_eq!(err.to_string(), "OpenAPI error: 602001 - invalid quantity");

        assert_eq!(OpenApiError::Transport("refused".to_string()).code(), None);
        assert!(OpenApiError::Transport("refused".to_string()).is_transport());
    }

    #[test]
    fn test_json_error_is_protocol() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(OpenApiError::from(err), OpenApiError::Protocol(_)));
    }
}
