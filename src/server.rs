//! HTTP transport for the calibration protocol.
//!
//! Exposes the calibration adjustment and engineering override requests to
//! service tooling on the local machine:
//!
//! ```text
//! service tool ──→ GET/POST /calibration/* ──→ CalibrationProtocol ──→ SharedState
//!                                                                         ↑
//!                                                       breath detector tick
//! ```

use crate::protocol::{
    CalibrationProtocol, CalibrationReading, Change, ConsoleCommand, Request, Response,
};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Shared server state
pub struct ServerState {
    protocol: CalibrationProtocol,
}

impl ServerState {
    pub fn new(protocol: CalibrationProtocol) -> Self {
        Self { protocol }
    }
}

/// Body of the level setters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevelRequest {
    pub pascals: f32,
}

/// Body of the override setter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub unlock: u32,
    pub period_ms: u32,
}

/// Body of the console endpoint: the words after `breath`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleRequest {
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleResponse {
    pub output: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PressureResponse {
    pub pascals: f32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OverrideResponse {
    pub period_ms: u32,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn unexpected_response(response: Response) -> ApiError {
    tracing::error!(?response, "Protocol returned mismatched response");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Unexpected protocol response".to_string(),
            code: "PROTOCOL_ERROR".to_string(),
        }),
    )
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /calibration
async fn get_calibration(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<CalibrationReading>, ApiError> {
    match state.protocol.handle(Request::GetCalibration) {
        Response::Calibration(reading) => Ok(Json(reading)),
        other => Err(unexpected_response(other)),
    }
}

/// POST /calibration/zero
async fn set_zero_offset(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Change<i32>>, ApiError> {
    match state.protocol.handle(Request::SetZeroOffset) {
        Response::ZeroOffset(change) => Ok(Json(change)),
        other => Err(unexpected_response(other)),
    }
}

/// POST /calibration/trigger
async fn set_trigger_level(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<LevelRequest>,
) -> Result<Json<Change<f32>>, ApiError> {
    check_finite(body.pascals)?;
    match state.protocol.handle(Request::SetTriggerLevel {
        pascals: body.pascals,
    }) {
        Response::TriggerLevel(change) => Ok(Json(change)),
        other => Err(unexpected_response(other)),
    }
}

/// POST /calibration/exhalation
async fn set_exhalation_level(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<LevelRequest>,
) -> Result<Json<Change<f32>>, ApiError> {
    check_finite(body.pascals)?;
    match state.protocol.handle(Request::SetExhalationLevel {
        pascals: body.pascals,
    }) {
        Response::ExhalationLevel(change) => Ok(Json(change)),
        other => Err(unexpected_response(other)),
    }
}

/// GET /pressure
async fn get_pressure(State(state): State<Arc<ServerState>>) -> Json<PressureResponse> {
    Json(PressureResponse {
        pascals: state.protocol.get_pressure(),
    })
}

/// GET /override
async fn get_override(State(state): State<Arc<ServerState>>) -> Json<OverrideResponse> {
    Json(OverrideResponse {
        period_ms: state.protocol.get_override_period(),
    })
}

/// POST /override
///
/// Always answers with the period now in effect. A wrong unlock code is not
/// an error; the caller sees the override unchanged.
async fn set_override(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<OverrideRequest>,
) -> Json<OverrideResponse> {
    Json(OverrideResponse {
        period_ms: state
            .protocol
            .set_override_period(body.unlock, body.period_ms),
    })
}

/// POST /console
async fn console(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<ConsoleRequest>,
) -> Result<Json<ConsoleResponse>, ApiError> {
    let args: Vec<&str> = body.args.iter().map(String::as_str).collect();
    let command = ConsoleCommand::parse(&args).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "INVALID_COMMAND".to_string(),
            }),
        )
    })?;

    Ok(Json(ConsoleResponse {
        output: state.protocol.console(command),
    }))
}

fn check_finite(pascals: f32) -> Result<(), ApiError> {
    if pascals.is_finite() {
        Ok(())
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Invalid pressure level: {pascals}"),
                code: "INVALID_LEVEL".to_string(),
            }),
        ))
    }
}

/// Build the router without binding a socket.
pub fn router(protocol: CalibrationProtocol) -> Router {
    let state = Arc::new(ServerState::new(protocol));

    Router::new()
        .route("/health", get(health))
        .route("/calibration", get(get_calibration))
        .route("/calibration/zero", post(set_zero_offset))
        .route("/calibration/trigger", post(set_trigger_level))
        .route("/calibration/exhalation", post(set_exhalation_level))
        .route("/pressure", get(get_pressure))
        .route("/override", get(get_override).post(set_override))
        .route("/console", post(console))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    protocol: CalibrationProtocol,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(protocol);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Calibration server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
