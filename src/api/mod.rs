//! HTTP API for order submission, status, cancellation and live events

use crate::config::ApiConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::order::{Fingerprint, Secret};
use crate::state::{OrderRecord, OrderStatus};
use crate::swap::{CancelOutcome, OrderSubmission, SwapService};

use alloy_primitives::U256;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SwapService>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, service: Arc<SwapService>) -> RelayerResult<()> {
    let app = create_router(AppState { service }, &config.allowed_origins);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Config(format!("cannot bind API to {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

fn cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn create_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/order", post(submit_order))
        .route("/order/:hash", get(get_order))
        .route("/order/:hash/cancel", post(cancel_order))
        .route("/order/:hash/secret", post(reveal_secret))
        .route("/orders", get(list_orders))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .layer(cors(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn parse_hash(raw: &str) -> Result<Fingerprint, ApiError> {
    raw.parse::<Fingerprint>()
        .map_err(|_| ApiError(RelayerError::InvalidOrder(format!("malformed order hash {}", raw))))
}

/// Submit a signed order
async fn submit_order(
    State(state): State<AppState>,
    Json(submission): Json<OrderSubmission>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let order_hash = state.service.submit(submission)?;
    Ok(Json(SubmitResponse {
        success: true,
        order_hash,
    }))
}

async fn get_order(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<OrderRecord>, ApiError> {
    let fingerprint = parse_hash(&hash)?;
    Ok(Json(state.service.status(&fingerprint).await?))
}

async fn list_orders(State(state): State<AppState>) -> impl IntoResponse {
    let orders: Vec<OrderSummary> = state
        .service
        .list()
        .await
        .iter()
        .map(OrderSummary::from)
        .collect();
    Json(orders)
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let fingerprint = parse_hash(&hash)?;
    let response = match state.service.cancel(&fingerprint).await? {
        CancelOutcome::Accepted => CancelResponse {
            order_hash: fingerprint,
            outcome: "accepted",
            status: None,
        },
        CancelOutcome::AlreadyTerminal(status) => CancelResponse {
            order_hash: fingerprint,
            outcome: "already_terminal",
            status: Some(status),
        },
        CancelOutcome::Refused(status) => CancelResponse {
            order_hash: fingerprint,
            outcome: "refused",
            status: Some(status),
        },
    };
    Ok(Json(response))
}

async fn reveal_secret(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Json(body): Json<SecretRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let fingerprint = parse_hash(&hash)?;
    state.service.provide_secret(&fingerprint, body.secret).await?;
    Ok(Json(SubmitResponse {
        success: true,
        order_hash: fingerprint,
    }))
}

/// Chain reachability and uptime
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.service.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.stats().await)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward_events(socket, state))
}

/// Push every order event to the client until either side goes away
async fn forward_events(mut socket: WebSocket, state: AppState) {
    let mut events = state.service.subscribe();
    debug!("WebSocket subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("Failed to serialize order event: {}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket subscriber lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("WebSocket subscriber disconnected");
}

/// Relayer error mapped to an HTTP status
pub struct ApiError(RelayerError);

impl From<RelayerError> for ApiError {
    fn from(err: RelayerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayerError::InvalidOrder(_) => StatusCode::BAD_REQUEST,
            RelayerError::NotFound { .. } => StatusCode::NOT_FOUND,
            RelayerError::DuplicateOrder { .. } | RelayerError::InvalidStateTransition { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            success: false,
            error: self.0.kind().as_str(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// Request and response types

#[derive(Deserialize)]
struct SecretRequest {
    secret: Secret,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    success: bool,
    order_hash: Fingerprint,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelResponse {
    order_hash: Fingerprint,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<OrderStatus>,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: &'static str,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderSummary {
    order_hash: Fingerprint,
    status: OrderStatus,
    making_amount: U256,
    taking_amount: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    dst_recipient: Option<String>,
    dst_chain_id: U256,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&OrderRecord> for OrderSummary {
    fn from(record: &OrderRecord) -> Self {
        Self {
            order_hash: record.order_hash,
            status: record.status,
            making_amount: record.order.making_amount,
            taking_amount: record.order.taking_amount,
            dst_recipient: record.order.extension.dst_recipient.clone(),
            dst_chain_id: record.order.extension.dst_chain_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
