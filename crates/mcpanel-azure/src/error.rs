use thiserror::Error;

#[derive(Error, Debug)]
pub enum PowerError {
    #[error("Identity provider error: {0}")]
    AuthProvider(String),

    #[error("Azure returned unexpected status {status}")]
    Provider {
        status: u16,
        body: serde_json::Value,
    },

    #[error("Transport error: {message}")]
    Transport { message: String },
}

impl PowerError {
    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        PowerError::Transport {
            message: err.to_string(),
        }
    }

    #[must_use]
    pub fn provider_status(&self) -> Option<u16> {
        match self {
            PowerError::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Provider bodies are JSON when they can be, raw text otherwise.
#[must_use]
pub fn parse_body(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}
