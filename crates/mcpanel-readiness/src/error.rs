use serde_json::Value;
use thiserror::Error;

/// Failure of a single HTTP call, classified by kind.
///
/// `Transport` means no HTTP response arrived at all (DNS, refused
/// connection, reset, TLS, timeout). `Protocol` means the server answered
/// with a non-2xx status.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("HTTP {status}: {}", summarize_body(.body))]
    Protocol { status: u16, body: Value },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport { .. })
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub(crate) fn from_send(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport {
                message: err.to_string(),
            }
        }
    }
}

/// Compact one-line rendering of an error body such as
/// `{"error": "...", "details": "..."}`.
#[must_use]
pub fn summarize_body(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let error = map.get("error").and_then(Value::as_str);
            let details = map.get("details").and_then(Value::as_str);
            match (error, details) {
                (Some(e), Some(d)) => format!("{e} ({d})"),
                (Some(e), None) => e.to_string(),
                (None, Some(d)) => d.to_string(),
                (None, None) => body.to_string(),
            }
        }
        Value::Null => "empty body".into(),
        other => other.to_string(),
    }
}

#[derive(Error, Debug)]
pub enum ReadinessError {
    #[error("A start attempt is already in progress")]
    AlreadyActive,

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Credential store error: {0}")]
    Credentials(#[from] std::io::Error),

    #[error("Directory error: {0}")]
    Directory(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_protocol_error_display() {
        let err = ApiError::Protocol {
            status: 500,
            body: json!({"error": "Failed to start VM", "details": "connect ECONNREFUSED"}),
        };
        assert_eq!(err.to_string(), "HTTP 500: Failed to start VM (connect ECONNREFUSED)");
        assert!(!err.is_transport());
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn test_summarize_body_fallbacks() {
        assert_eq!(summarize_body(&json!("plain")), "plain");
        assert_eq!(summarize_body(&Value::Null), "empty body");
        assert_eq!(summarize_body(&json!({"code": 1})), r#"{"code":1}"#);
    }
}
