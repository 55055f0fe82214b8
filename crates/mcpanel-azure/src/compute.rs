use crate::{PowerError, acquire_token, parse_body};
use mcpanel_core::{AzureConfig, PowerState, VmState};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

pub const COMPUTE_API_VERSION: &str = "2024-07-01";

/// Result of an accepted start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    pub provider_status: u16,
}

impl StartOutcome {
    /// The provider answers 200 instead of 202 when the VM was already up.
    #[must_use]
    pub fn already_running(&self) -> bool {
        self.provider_status == 200
    }
}

/// Interpret the provider's answer to a start action.
///
/// # Errors
/// Any status other than 200 or 202 becomes `PowerError::Provider`.
pub fn interpret_start_response(status: u16, body: &str) -> Result<StartOutcome, PowerError> {
    match status {
        200 | 202 => Ok(StartOutcome {
            provider_status: status,
        }),
        _ => Err(PowerError::Provider {
            status,
            body: parse_body(body),
        }),
    }
}

#[derive(Debug, Deserialize)]
struct InstanceView {
    #[serde(default)]
    statuses: Vec<InstanceStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceStatus {
    code: String,
    #[serde(default)]
    display_status: Option<String>,
}

/// Map an instance-view status code such as `PowerState/deallocated`.
#[must_use]
pub fn power_state_from_code(code: &str) -> PowerState {
    match code.strip_prefix("PowerState/") {
        Some("running") => PowerState::Running,
        Some("starting") => PowerState::Starting,
        Some("deallocated" | "deallocating") => PowerState::Deallocated,
        Some("stopped" | "stopping") => PowerState::Stopped,
        _ => PowerState::Unknown,
    }
}

fn vm_state_from_view(view: &InstanceView) -> VmState {
    view.statuses
        .iter()
        .find(|s| s.code.starts_with("PowerState/"))
        .map_or_else(VmState::unknown, |s| {
            let power_state = power_state_from_code(&s.code);
            match &s.display_status {
                Some(display) => VmState::new(power_state, display.clone()),
                None => VmState::from(power_state),
            }
        })
}

/// Stateless bridge to the provider's VM management API.
///
/// Every operation authenticates from scratch and never retries.
pub struct VmPowerController {
    client: reqwest::Client,
    config: AzureConfig,
}

impl VmPowerController {
    /// Build a controller with its own HTTP client.
    ///
    /// # Errors
    /// Returns `PowerError::Transport` if the HTTP client cannot be built.
    pub fn new(config: AzureConfig) -> Result<Self, PowerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PowerError::transport(&e))?;
        Ok(Self { client, config })
    }

    /// Ask the provider to start the VM. Does not wait for it to run.
    ///
    /// # Errors
    /// Returns `AuthProvider` for token failures, `Provider` for rejected
    /// requests and `Transport` for network failures.
    pub async fn start_vm(&self) -> Result<StartOutcome, PowerError> {
        let token = acquire_token(&self.client, &self.config).await?;

        let url = format!(
            "{}/start?api-version={COMPUTE_API_VERSION}",
            self.config.vm_resource_url()
        );
        info!("Starting VM {}", self.config.vm_name);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.secret())
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await
            .map_err(|e| PowerError::transport(&e))?;

        // The body only matters when the provider refuses.
        let status = response.status().as_u16();
        let body = if matches!(status, 200 | 202) {
            String::new()
        } else {
            response.text().await.map_err(|e| PowerError::transport(&e))?
        };

        let outcome = interpret_start_response(status, &body);
        match &outcome {
            Ok(o) if o.already_running() => info!("VM {} already running", self.config.vm_name),
            Ok(_) => info!("VM {} start accepted", self.config.vm_name),
            Err(e) => warn!("VM {} start rejected: {}", self.config.vm_name, e),
        }
        outcome
    }

    /// Read the VM's current power state from its instance view.
    ///
    /// # Errors
    /// Same taxonomy as [`VmPowerController::start_vm`].
    pub async fn vm_status(&self) -> Result<VmState, PowerError> {
        let token = acquire_token(&self.client, &self.config).await?;

        let url = format!(
            "{}/instanceView?api-version={COMPUTE_API_VERSION}",
            self.config.vm_resource_url()
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| PowerError::transport(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| PowerError::transport(&e))?;

        if !status.is_success() {
            return Err(PowerError::Provider {
                status: status.as_u16(),
                body: parse_body(&body),
            });
        }

        let view: InstanceView = serde_json::from_str(&body).map_err(|e| PowerError::Provider {
            status: status.as_u16(),
            body: serde_json::Value::String(format!("Malformed instance view: {e}")),
        })?;

        Ok(vm_state_from_view(&view))
    }
}
