use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use mcpanel_core::AzureConfig;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
struct Inner {
    deny_tokens: bool,
    start_status: u16,
    power_code: String,
    power_display: String,
    token_requests: usize,
    start_requests: usize,
    last_token_form: String,
    last_authorization: Option<String>,
}

/// In-process stand-in for the identity and compute endpoints.
#[derive(Clone)]
pub struct FakeAzure {
    pub url: String,
    inner: Arc<Mutex<Inner>>,
}

pub fn test_config(url: &str) -> AzureConfig {
    AzureConfig {
        tenant_id: "tenant".into(),
        client_id: "client".into(),
        client_secret: "secret".into(),
        subscription_id: "sub".into(),
        resource_group: "rg".into(),
        vm_name: "mc-vm".into(),
        login_url: url.into(),
        management_url: url.into(),
    }
}

const VM_PATH: &str =
    "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/mc-vm";

impl FakeAzure {
    pub async fn spawn() -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            start_status: 202,
            power_code: "PowerState/deallocated".into(),
            power_display: "VM deallocated".into(),
            ..Inner::default()
        }));

        let app = Router::new()
            .route("/tenant/oauth2/v2.0/token", post(token))
            .route(&format!("{VM_PATH}/start"), post(start))
            .route(&format!("{VM_PATH}/instanceView"), get(instance_view))
            .with_state(inner.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            inner,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn deny_tokens(&self) {
        self.with(|s| s.deny_tokens = true);
    }

    pub fn set_start_status(&self, status: u16) {
        self.with(|s| s.start_status = status);
    }

    pub fn set_power_code(&self, code: &str, display: &str) {
        self.with(|s| {
            s.power_code = code.into();
            s.power_display = display.into();
        });
    }

    pub fn token_requests(&self) -> usize {
        self.with(|s| s.token_requests)
    }

    pub fn start_requests(&self) -> usize {
        self.with(|s| s.start_requests)
    }

    pub fn last_token_form(&self) -> String {
        self.with(|s| s.last_token_form.clone())
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.with(|s| s.last_authorization.clone())
    }
}

type Shared = State<Arc<Mutex<Inner>>>;

async fn token(State(inner): Shared, body: String) -> (StatusCode, Json<serde_json::Value>) {
    let mut s = inner.lock().unwrap_or_else(PoisonError::into_inner);
    s.token_requests += 1;
    s.last_token_form = body;
    if s.deny_tokens {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client", "error_description": "invalid client secret"})),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({"token_type": "Bearer", "expires_in": 3599, "access_token": "fake-token"})),
        )
    }
}

async fn start(State(inner): Shared, headers: HeaderMap) -> (StatusCode, String) {
    let mut s = inner.lock().unwrap_or_else(PoisonError::into_inner);
    s.start_requests += 1;
    s.last_authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let status = StatusCode::from_u16(s.start_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = if status.is_success() {
        String::new()
    } else {
        json!({"error": {"code": "OperationNotAllowed", "message": "nope"}}).to_string()
    };
    (status, body)
}

async fn instance_view(State(inner): Shared) -> Json<serde_json::Value> {
    let s = inner.lock().unwrap_or_else(PoisonError::into_inner);
    Json(json!({
        "statuses": [
            {"code": "ProvisioningState/succeeded", "displayStatus": "Provisioning succeeded"},
            {"code": s.power_code, "displayStatus": s.power_display},
        ]
    }))
}
