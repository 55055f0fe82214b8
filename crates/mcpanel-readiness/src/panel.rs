use crate::ApiError;
use mcpanel_core::{PanelConfig, VmState};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAck {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub azure_status: Option<u16>,
}

/// Client for the always-available VM functions (`/api/vm-start`,
/// `/api/vm-status`). These calls are unauthenticated.
pub struct PanelClient {
    http: reqwest::Client,
    config: PanelConfig,
}

impl PanelClient {
    /// # Errors
    /// Returns `ApiError::Transport` if the HTTP client cannot be built.
    pub fn new(config: PanelConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::from_send(&e))?;
        Ok(Self { http, config })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        name: &str,
    ) -> Result<T, ApiError> {
        let response = request.send().await.map_err(|e| ApiError::from_send(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| ApiError::from_send(&e))?;
        debug!("{} -> {}", name, status);

        if !status.is_success() {
            return Err(ApiError::Protocol {
                status: status.as_u16(),
                body: serde_json::from_str(&text).unwrap_or(Value::String(text)),
            });
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(format!("{name}: {e}")))
    }

    /// Ask the panel function to start the VM.
    ///
    /// # Errors
    /// `Transport` if the function is unreachable, `Protocol` if it reports failure.
    pub async fn start_vm(&self) -> Result<StartAck, ApiError> {
        let request = self.http.post(self.config.function_url("vm-start"));
        self.call(request, "vm-start").await
    }

    /// Fetch the VM's current power state.
    ///
    /// # Errors
    /// `Transport` if the function is unreachable, `Protocol` if it reports failure.
    pub async fn vm_status(&self) -> Result<VmState, ApiError> {
        let request = self.http.get(self.config.function_url("vm-status"));
        self.call(request, "vm-status").await
    }
}
