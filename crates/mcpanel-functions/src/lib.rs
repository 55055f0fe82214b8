use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mcpanel_azure::{PowerError, StartOutcome, VmPowerController};
use mcpanel_core::VmState;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// The VM operations the functions expose.
pub trait PowerControl: Send + Sync + 'static {
    fn start_vm(&self) -> impl Future<Output = Result<StartOutcome, PowerError>> + Send;
    fn vm_status(&self) -> impl Future<Output = Result<VmState, PowerError>> + Send;
}

impl PowerControl for VmPowerController {
    async fn start_vm(&self) -> Result<StartOutcome, PowerError> {
        VmPowerController::start_vm(self).await
    }

    async fn vm_status(&self) -> Result<VmState, PowerError> {
        VmPowerController::vm_status(self).await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAccepted {
    pub message: String,
    pub azure_status: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl IntoResponse for FunctionError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

fn start_error(err: PowerError) -> FunctionError {
    match err {
        PowerError::Provider { status, body } => FunctionError {
            error: "Azure returned unexpected status".into(),
            azure_status: Some(status),
            details: Some(body),
        },
        other => FunctionError {
            error: "Failed to start VM".into(),
            azure_status: None,
            details: Some(Value::String(other.to_string())),
        },
    }
}

pub fn router<C: PowerControl>(control: Arc<C>) -> Router {
    Router::new()
        .route("/api/vm-start", post(vm_start::<C>))
        .route("/api/vm-status", get(vm_status::<C>))
        .with_state(control)
}

async fn vm_start<C: PowerControl>(State(control): State<Arc<C>>) -> Response {
    match control.start_vm().await {
        Ok(outcome) => Json(StartAccepted {
            message: "VM start initiated".into(),
            azure_status: outcome.provider_status,
        })
        .into_response(),
        Err(e) => {
            error!("vm-start failed: {}", e);
            start_error(e).into_response()
        }
    }
}

async fn vm_status<C: PowerControl>(State(control): State<Arc<C>>) -> Response {
    match control.vm_status().await {
        Ok(state) => Json(state).into_response(),
        Err(e) => {
            error!("vm-status failed: {}", e);
            let details = match e {
                PowerError::Provider { body, .. } => body,
                other => Value::String(other.to_string()),
            };
            FunctionError {
                error: "Failed to get VM status".into(),
                azure_status: None,
                details: Some(details),
            }
            .into_response()
        }
    }
}

/// Serve the functions until Ctrl-C.
///
/// # Errors
/// Returns an IO error if the listener cannot be bound or the server fails.
pub async fn serve<C: PowerControl>(addr: SocketAddr, control: Arc<C>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving VM functions on {}", listener.local_addr()?);
    axum::serve(listener, router(control))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down VM functions");
        })
        .await
}
