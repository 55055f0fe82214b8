use crate::{ApiError, CredentialStore};
use mcpanel_core::PanelConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub username: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totp_token: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(default, rename = "requires2FA")]
    pub requires_2fa: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub max: Option<u32>,
    #[serde(default)]
    pub online: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TpsSummary {
    #[serde(default)]
    pub tps1m: Option<f64>,
    #[serde(default)]
    pub tps5m: Option<f64>,
    #[serde(default)]
    pub tps15m: Option<f64>,
}

/// Game server status as reported by the backend's `/server/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub uptime: Option<f64>,
    #[serde(default)]
    pub players: Option<PlayerSummary>,
    #[serde(default)]
    pub tps: Option<TpsSummary>,
}

/// Client for the backend management API.
///
/// Attaches the stored bearer token to every call and evicts it on any 401.
pub struct BackendClient {
    http: reqwest::Client,
    config: PanelConfig,
    credentials: Arc<CredentialStore>,
}

impl BackendClient {
    /// # Errors
    /// Returns `ApiError::Transport` if the HTTP client cannot be built.
    pub fn new(config: PanelConfig, credentials: Arc<CredentialStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::from_send(&e))?;
        Ok(Self {
            http,
            config,
            credentials,
        })
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.get() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<T, ApiError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ApiError::from_send(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ApiError::from_send(&e))?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("{} returned 401, evicting stored token", path);
            if let Err(e) = self.credentials.clear() {
                warn!("Failed to clear stored token: {}", e);
            }
        }

        if !status.is_success() {
            return Err(ApiError::Protocol {
                status: status.as_u16(),
                body: serde_json::from_str(&text).unwrap_or(Value::String(text)),
            });
        }

        debug!("{} -> {}", path, status);
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(format!("{path}: {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.http.get(self.config.endpoint(path));
        self.send(request, path).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.http.post(self.config.endpoint(path)).json(body);
        self.send(request, path).await
    }

    /// `GET /auth/me`.
    ///
    /// # Errors
    /// `Transport` when the backend is unreachable, `Protocol` when it refuses.
    pub async fn me(&self) -> Result<User, ApiError> {
        self.get("/auth/me").await
    }

    /// `POST /auth/login`. Does not store the returned token.
    ///
    /// # Errors
    /// `Transport` when the backend is unreachable, `Protocol` when it refuses.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        totp_token: Option<&str>,
    ) -> Result<LoginResponse, ApiError> {
        let body = LoginRequest {
            username,
            password,
            totp_token,
        };
        self.post("/auth/login", &body).await
    }

    /// `GET /server/status`.
    ///
    /// # Errors
    /// `Transport` when the backend is unreachable, `Protocol` when it refuses.
    pub async fn server_status(&self) -> Result<ServerStatus, ApiError> {
        self.get("/server/status").await
    }

    /// Check that the backend process itself is answering.
    ///
    /// Hits `/server/status` but accepts an auth refusal as an answer, since
    /// the caller may not be logged in yet. Never evicts the stored token.
    ///
    /// # Errors
    /// `Transport` when nothing answers, `Protocol` for any other non-2xx
    /// status, such as a gateway error in front of a stopped backend.
    pub async fn health(&self) -> Result<(), ApiError> {
        let request = self.http.get(self.config.endpoint("/server/status"));
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ApiError::from_send(&e))?;

        let status = response.status();
        if status.is_success()
            || status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            debug!("Backend health check answered {}", status);
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(ApiError::Protocol {
            status: status.as_u16(),
            body: serde_json::from_str(&text).unwrap_or(Value::String(text)),
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    };
    use serde_json::{Value, json};

    fn bearer(headers: &HeaderMap) -> Option<&str> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    async fn me(headers: HeaderMap) -> (StatusCode, Json<Value>) {
        match bearer(&headers) {
            Some("good-token") => (StatusCode::OK, Json(json!({"username": "steve", "role": "admin"}))),
            _ => (StatusCode::UNAUTHORIZED, Json(json!({"error": "Invalid token"}))),
        }
    }

    async fn login(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        match (body["username"].as_str(), body["password"].as_str(), body["totpToken"].as_str()) {
            (Some("steve"), Some("hunter2"), None) => {
                (StatusCode::OK, Json(json!({"requires2FA": true})))
            }
            (Some("steve"), Some("hunter2"), Some("123456")) => (
                StatusCode::OK,
                Json(json!({"token": "good-token", "user": {"username": "steve"}})),
            ),
            _ => (StatusCode::UNAUTHORIZED, Json(json!({"error": "Invalid credentials"}))),
        }
    }

    async fn status(headers: HeaderMap) -> (StatusCode, Json<Value>) {
        if bearer(&headers) == Some("good-token") {
            (
                StatusCode::OK,
                Json(json!({
                    "online": true,
                    "uptime": 3600,
                    "players": {"count": 2, "max": 20, "online": ["steve", "alex"]},
                    "tps": {"tps1m": 19.9, "tps5m": 20.0, "tps15m": 20.0}
                })),
            )
        } else {
            (StatusCode::UNAUTHORIZED, Json(json!({"error": "Authentication required"})))
        }
    }

    /// Serve a minimal backend on an ephemeral port; returns its API base URL.
    pub async fn spawn_backend() -> String {
        let app = Router::new()
            .route("/api/auth/me", get(me))
            .route("/api/auth/login", post(login))
            .route("/api/server/status", get(status));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api")
    }
}
