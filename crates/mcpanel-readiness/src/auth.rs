use crate::{ApiError, BackendClient, CredentialStore, LoginResponse, ReadinessError, User};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// The backend auth endpoints the bootstrap depends on.
pub trait AuthApi: Send + Sync + 'static {
    fn me(&self) -> impl Future<Output = Result<User, ApiError>> + Send;
    fn login(
        &self,
        username: &str,
        password: &str,
        totp_token: Option<&str>,
    ) -> impl Future<Output = Result<LoginResponse, ApiError>> + Send;
}

impl AuthApi for BackendClient {
    async fn me(&self) -> Result<User, ApiError> {
        BackendClient::me(self).await
    }

    async fn login(
        &self,
        username: &str,
        password: &str,
        totp_token: Option<&str>,
    ) -> Result<LoginResponse, ApiError> {
        BackendClient::login(self, username, password, totp_token).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub user: Option<User>,
    pub has_token: bool,
    /// Set when the token was kept only because the backend was unreachable.
    pub backend_unreachable: bool,
}

impl AuthState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    fn signed_out(has_token: bool, backend_unreachable: bool) -> Self {
        Self {
            user: None,
            has_token,
            backend_unreachable,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    TwoFactorRequired,
    Authenticated(User),
}

/// Decides whether a missing session means "log in" or "wait for the VM".
pub struct AuthBootstrap<A> {
    api: Arc<A>,
    credentials: Arc<CredentialStore>,
}

impl<A: AuthApi> AuthBootstrap<A> {
    pub fn new(api: Arc<A>, credentials: Arc<CredentialStore>) -> Self {
        Self { api, credentials }
    }

    /// Check the stored token against `/auth/me`.
    ///
    /// A transport failure keeps the token (the VM is presumably off); any
    /// HTTP error response discards it.
    ///
    /// # Errors
    /// Returns `ReadinessError::Credentials` if a rejected token cannot be
    /// removed from disk.
    pub async fn verify(&self) -> Result<AuthState, ReadinessError> {
        if !self.credentials.has_token() {
            return Ok(AuthState::signed_out(false, false));
        }

        match self.api.me().await {
            Ok(user) => {
                info!("Authenticated as {}", user.username);
                Ok(AuthState {
                    user: Some(user),
                    has_token: true,
                    backend_unreachable: false,
                })
            }
            Err(e) if e.is_transport() => {
                warn!("Backend unreachable, keeping stored token: {}", e);
                Ok(AuthState::signed_out(self.credentials.has_token(), true))
            }
            Err(e) => {
                info!("Stored token rejected: {}", e);
                self.credentials.clear()?;
                Ok(AuthState::signed_out(false, false))
            }
        }
    }

    /// Re-run verification, typically once a readiness session reports ready.
    ///
    /// # Errors
    /// See [`AuthBootstrap::verify`].
    pub async fn retry(&self) -> Result<AuthState, ReadinessError> {
        self.verify().await
    }

    /// Log in, storing the session token on success.
    ///
    /// # Errors
    /// Returns `ReadinessError::Api` if the backend refuses or is unreachable.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        totp_token: Option<&str>,
    ) -> Result<LoginOutcome, ReadinessError> {
        let response = self.api.login(username, password, totp_token).await?;
        if response.requires_2fa {
            info!("Second factor required for {}", username);
            return Ok(LoginOutcome::TwoFactorRequired);
        }

        let token = response
            .token
            .ok_or_else(|| ApiError::Decode("login response carried no token".into()))?;
        self.credentials.set(token)?;

        let user = response.user.unwrap_or_else(|| User {
            username: username.to_string(),
            extra: serde_json::Map::new(),
        });
        info!("Logged in as {}", user.username);
        Ok(LoginOutcome::Authenticated(user))
    }

    /// # Errors
    /// Returns `ReadinessError::Credentials` if the token file cannot be removed.
    pub fn logout(&self) -> Result<(), ReadinessError> {
        self.credentials.clear()
    }
}
