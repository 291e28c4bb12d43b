//! Reference sync server.
//!
//! Accepts queued operations from fieldsync clients and applies each
//! idempotency key at most once.
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `POST /operations`: Apply one operation (auth required). Returns `201`
//!   when applied, `409` when the idempotency key was already applied and
//!   `422` when the operation is invalid.
//! - `GET /operations`: Applied operations in arrival order (auth required)

pub mod ledger;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use fieldsync_core::{transport::IDEMPOTENCY_HEADER, OperationKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use ledger::{AppliedOperation, Ledger, Recorded};

// ============================================================================
// Configuration
// ============================================================================

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub client_id: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Path to config file
    pub config_path: PathBuf,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("FIELDSYNC_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let config_path = std::env::var("FIELDSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("fieldsync-server")
                    .join("config.yaml")
            });

        Self { port, config_path }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Authenticated client, added to request extensions after auth
#[derive(Debug, Clone)]
pub struct AuthClient {
    pub client_id: String,
}

/// API key store - maps key -> AuthClient
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthClient>,
}

impl ApiKeyStore {
    /// Load API keys from config file
    pub fn load(config_path: &Path) -> Self {
        match std::fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<ConfigFile>(&contents) {
                Ok(config) => {
                    let store = Self::from_entries(config.api_keys);
                    tracing::info!("Loaded {} API key(s)", store.keys.len());
                    store
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                Self::default()
            }
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ApiKeyEntry>) -> Self {
        let keys = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.key,
                    AuthClient {
                        client_id: entry.client_id,
                    },
                )
            })
            .collect();
        Self { keys }
    }

    /// Validate an API key and return the associated client
    fn validate(&self, key: &str) -> Option<AuthClient> {
        self.keys.get(key).cloned()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub ledger: Arc<Ledger>,
}

impl AppState {
    pub fn new(api_keys: ApiKeyStore) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
            ledger: Arc::new(Ledger::new()),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

/// Authentication middleware
async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        Some(_) => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_auth",
                "Authorization header must use Bearer scheme",
            );
        }
        None => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "missing_auth",
                "Authorization header required",
            );
        }
    };

    match state.api_keys.validate(api_key) {
        Some(client) => {
            request.extensions_mut().insert(client);
            next.run(request).await
        }
        None => error_response(StatusCode::UNAUTHORIZED, "invalid_key", "Invalid API key"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Operation request body
#[derive(Debug, Deserialize)]
struct OperationRequest {
    kind: OperationKind,
    resource: String,
    #[serde(default)]
    payload: Value,
}

impl OperationRequest {
    fn validate(&self) -> Result<(), String> {
        if self.resource.trim().is_empty() {
            return Err("resource must not be empty".to_string());
        }
        match self.kind {
            OperationKind::Create | OperationKind::Update if !self.payload.is_object() => Err(
                format!("payload for {} must be a JSON object", self.kind),
            ),
            _ => Ok(()),
        }
    }
}

/// Operation accepted response
#[derive(Serialize)]
struct AppliedResponse {
    key: String,
    status: &'static str,
}

/// Apply one operation (auth required)
async fn apply_operation(
    State(state): State<AppState>,
    Extension(client): Extension<AuthClient>,
    headers: HeaderMap,
    Json(request): Json<OperationRequest>,
) -> Response {
    let key = match headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
    {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "missing_idempotency_key",
                format!("{} header required", IDEMPOTENCY_HEADER),
            );
        }
    };

    if let Err(message) = request.validate() {
        tracing::info!("Rejected operation {} from {}: {}", key, client.client_id, message);
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "invalid_operation", message);
    }

    let recorded = state.ledger.record(AppliedOperation {
        key: key.clone(),
        client_id: client.client_id.clone(),
        kind: request.kind,
        resource: request.resource,
        payload: request.payload,
        applied_at: Utc::now(),
    });

    match recorded {
        Recorded::Applied => {
            tracing::info!("Applied operation {} from {}", key, client.client_id);
            (
                StatusCode::CREATED,
                Json(AppliedResponse {
                    key,
                    status: "applied",
                }),
            )
                .into_response()
        }
        Recorded::Duplicate => {
            tracing::info!("Duplicate operation {} from {}", key, client.client_id);
            error_response(
                StatusCode::CONFLICT,
                "already_applied",
                format!("operation {} was already applied", key),
            )
        }
    }
}

/// List applied operations (auth required)
async fn list_operations(State(state): State<AppState>) -> Json<Vec<AppliedOperation>> {
    Json(state.ledger.applied())
}

/// Builds the server router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route("/operations", post(apply_operation).get(list_operations))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
