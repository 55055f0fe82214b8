use crate::PowerError;
use mcpanel_core::AzureConfig;
use serde::Deserialize;
use tracing::debug;

pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Short-lived bearer token for the management API.
///
/// Never cached: every controller call acquires its own.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchange the client credentials for a management-API token.
///
/// # Errors
/// Returns `PowerError::AuthProvider` if the request fails or the response
/// carries no access token.
pub async fn acquire_token(
    client: &reqwest::Client,
    config: &AzureConfig,
) -> Result<BearerToken, PowerError> {
    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("scope", MANAGEMENT_SCOPE),
    ];

    let response = client
        .post(config.token_url())
        .form(&form)
        .send()
        .await
        .map_err(|e| PowerError::AuthProvider(format!("Token request failed: {e}")))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| PowerError::AuthProvider(format!("Failed to read token response: {e}")))?;

    let parsed: TokenResponse = serde_json::from_str(&text).map_err(|_| {
        PowerError::AuthProvider(format!("Token endpoint returned {status} with no JSON body"))
    })?;

    match parsed.access_token {
        Some(token) if !token.is_empty() => {
            debug!("Acquired management token");
            Ok(BearerToken(token))
        }
        _ => Err(PowerError::AuthProvider(
            parsed
                .error_description
                .unwrap_or_else(|| format!("Token endpoint returned {status} without access_token")),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeAzure, test_config};

    #[tokio::test]
    async fn test_acquire_token_success() {
        let azure = FakeAzure::spawn().await;
        let client = reqwest::Client::new();

        let token = acquire_token(&client, &test_config(&azure.url)).await.unwrap();
        assert_eq!(token.secret(), "fake-token");
        assert_eq!(azure.token_requests(), 1);

        let form = azure.last_token_form();
        assert!(form.contains("grant_type=client_credentials"));
        assert!(form.contains("client_id=client"));
        assert!(form.contains("scope=https%3A%2F%2Fmanagement.azure.com%2F.default"));
    }

    #[tokio::test]
    async fn test_acquire_token_without_access_token() {
        let azure = FakeAzure::spawn().await;
        azure.deny_tokens();
        let client = reqwest::Client::new();

        let err = acquire_token(&client, &test_config(&azure.url)).await.unwrap_err();
        assert!(matches!(err, PowerError::AuthProvider(ref m) if m.contains("invalid client secret")));
    }

    #[tokio::test]
    async fn test_acquire_token_unreachable() {
        let client = reqwest::Client::new();
        let err = acquire_token(&client, &test_config("http://127.0.0.1:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PowerError::AuthProvider(_)));
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = BearerToken("abc".into());
        assert!(!format!("{token:?}").contains("abc"));
    }
}
