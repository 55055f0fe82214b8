use crate::CoreError;
use std::time::Duration;

pub const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";
pub const DEFAULT_PANEL_URL: &str = "http://localhost:7071";

/// Credentials and target identifiers for the cloud VM.
///
/// Identifiers are opaque: they are only ever validated by the provider.
#[derive(Clone)]
pub struct AzureConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub vm_name: String,
    pub login_url: String,
    pub management_url: String,
}

impl AzureConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    /// Returns `CoreError::MissingEnv` naming the first unset variable.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns `CoreError::MissingEnv` naming the first missing or empty key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| CoreError::MissingEnv(key.to_string()))
        };

        Ok(Self {
            tenant_id: required("AZURE_TENANT_ID")?,
            client_id: required("AZURE_CLIENT_ID")?,
            client_secret: required("AZURE_CLIENT_SECRET")?,
            subscription_id: required("AZURE_SUBSCRIPTION_ID")?,
            resource_group: required("AZURE_RESOURCE_GROUP")?,
            vm_name: required("AZURE_VM_NAME")?,
            login_url: lookup("AZURE_LOGIN_URL").unwrap_or_else(|| DEFAULT_LOGIN_URL.into()),
            management_url: lookup("AZURE_MANAGEMENT_URL")
                .unwrap_or_else(|| DEFAULT_MANAGEMENT_URL.into()),
        })
    }

    #[must_use]
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    #[must_use]
    pub fn vm_resource_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}",
            self.management_url.trim_end_matches('/'),
            self.subscription_id,
            self.resource_group,
            self.vm_name
        )
    }
}

impl std::fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("subscription_id", &self.subscription_id)
            .field("resource_group", &self.resource_group)
            .field("vm_name", &self.vm_name)
            .field("login_url", &self.login_url)
            .field("management_url", &self.management_url)
            .finish()
    }
}

/// Where the panel's two HTTP surfaces live.
///
/// `panel_url` serves the VM functions (`/api/vm-start`, `/api/vm-status`);
/// `api_url` is the backend management API base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    pub panel_url: String,
    pub api_url: String,
    pub request_timeout: Duration,
}

impl PanelConfig {
    pub fn new(panel_url: impl Into<String>, api_url: Option<String>) -> Self {
        let panel_url = panel_url.into().trim_end_matches('/').to_string();
        let api_url = api_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{panel_url}/api"));
        Self {
            panel_url,
            api_url,
            request_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn function_url(&self, name: &str) -> String {
        format!("{}/api/{name}", self.panel_url)
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PANEL_URL, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("AZURE_TENANT_ID", "tenant"),
            ("AZURE_CLIENT_ID", "client"),
            ("AZURE_CLIENT_SECRET", "s3cret"),
            ("AZURE_SUBSCRIPTION_ID", "sub"),
            ("AZURE_RESOURCE_GROUP", "rg"),
            ("AZURE_VM_NAME", "mc-vm"),
        ])
    }

    #[test]
    fn test_azure_config_urls() {
        let env = full_env();
        let cfg = AzureConfig::from_lookup(|k| env.get(k).map(ToString::to_string)).unwrap();
        assert_eq!(
            cfg.token_url(),
            "https://login.microsoftonline.com/tenant/oauth2/v2.0/token"
        );
        assert_eq!(
            cfg.vm_resource_url(),
            "https://management.azure.com/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/mc-vm"
        );
        assert!(!format!("{cfg:?}").contains("s3cret"));
    }

    #[test]
    fn test_azure_config_missing_var() {
        let mut env = full_env();
        env.insert("AZURE_VM_NAME", " ");
        let err = AzureConfig::from_lookup(|k| env.get(k).map(ToString::to_string)).unwrap_err();
        assert!(matches!(err, CoreError::MissingEnv(ref k) if k == "AZURE_VM_NAME"));
    }

    #[test]
    fn test_panel_config_defaults_api_under_panel() {
        let cfg = PanelConfig::new("http://panel.local/", None);
        assert_eq!(cfg.function_url("vm-start"), "http://panel.local/api/vm-start");
        assert_eq!(cfg.endpoint("/auth/me"), "http://panel.local/api/auth/me");

        let cfg = PanelConfig::new("http://panel.local", Some("http://backend:3001/api/".into()));
        assert_eq!(cfg.endpoint("/server/status"), "http://backend:3001/api/server/status");
    }
}
