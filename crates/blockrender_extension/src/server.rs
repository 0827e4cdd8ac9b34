use anyhow::Result;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use blockrender_broker::BrokerError;

use crate::{
    AppState,
    adapter::{AdapterError, Artifact, Rendered, Trace},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnsupportedTrace,
    InvalidCommand,
    DuplicateRequest,
    RenderUnavailable,
    Internal,
}

impl From<&AdapterError> for (StatusCode, ErrorCode) {
    fn from(err: &AdapterError) -> Self {
        match err {
            AdapterError::UnsupportedTrace(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::UnsupportedTrace)
            }
            AdapterError::MissingSource | AdapterError::InvalidPayload(_) => {
                (StatusCode::BAD_REQUEST, ErrorCode::InvalidCommand)
            }
            AdapterError::Broker(BrokerError::DuplicateRequest(_)) => {
                (StatusCode::CONFLICT, ErrorCode::DuplicateRequest)
            }
            AdapterError::Broker(BrokerError::Channel(_)) => {
                (StatusCode::BAD_GATEWAY, ErrorCode::RenderUnavailable)
            }
            AdapterError::Broker(BrokerError::Config(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal)
            }
        }
    }
}

/// Health check endpoint
pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Renders the blocks carried by a host trace and answers with the final artifact
pub(crate) async fn render_trace(
    State(state): State<AppState>,
    Json(trace): Json<Trace>,
) -> Result<Json<Rendered>, (StatusCode, Json<ErrorResponse>)> {
    let mut slot: Vec<Artifact> = Vec::new();

    match state.adapter.display_trace(&trace, &mut slot).await {
        Ok(rendered) => Ok(Json(rendered)),
        Err(e) => {
            warn!("Rejected `{}` trace: {e}", trace.kind);
            let (status, code) = <(StatusCode, ErrorCode)>::from(&e);
            Err((
                status,
                Json(ErrorResponse {
                    error: ErrorData {
                        code,
                        message: e.to_string(),
                    },
                }),
            ))
        }
    }
}

/// Start the extension server
///
/// # Errors
///
/// This function will return an error if axum fails binding to the provided host/port
pub async fn start_server(host: &str, port: u16, state: AppState) -> Result<()> {
    let app = create_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("blockrender listening on http://{addr}");
    info!("POST traces of type `makecode_blocks` to http://{addr}/traces");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Create the Axum router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/traces", post(render_trace))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, cleaning up...");
}
