use crate::config::GatewayConfig;
use crate::convert::anthropic_wire::ErrorResponse;
use crate::convert::gemini_wire::GeminiErrorResponse;
use crate::convert::openai_wire::ChatErrorResponse;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::logging::SharedLogger;
use crate::provider::Provider;
use crate::transformer::{ResponseContext, Transformer, UpstreamResponse};

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub gateway: Arc<Gateway>,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_anthropic))
        .route("/v1/chat/completions", post(handle_openai))
        .route("/v1beta/models/:model_and_action", post(handle_gemini))
        .route("/providers", get(list_providers).post(create_provider))
        .route(
            "/providers/:name",
            put(update_provider).delete(delete_provider),
        )
        .route("/providers/:name/toggle", post(toggle_provider))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/logs", get(handle_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Which wire dialect to shape error bodies in.
#[derive(Clone, Copy)]
enum Dialect {
    Anthropic,
    OpenAi,
    Gemini,
}

impl Dialect {
    fn endpoint_name(self) -> &'static str {
        match self {
            Dialect::Anthropic => "anthropic",
            Dialect::OpenAi => "openai",
            Dialect::Gemini => "gemini",
        }
    }

    fn error_body(self, status: StatusCode, message: &str) -> Value {
        match self {
            Dialect::Anthropic => {
                let body = if status == StatusCode::BAD_REQUEST {
                    ErrorResponse::invalid_request(message)
                } else {
                    ErrorResponse::api_error(message)
                };
                serde_json::to_value(body).unwrap_or_else(|_| json!({}))
            }
            Dialect::OpenAi => {
                let error_type = if status == StatusCode::BAD_REQUEST {
                    "invalid_request_error"
                } else {
                    "api_error"
                };
                serde_json::to_value(ChatErrorResponse::new(error_type, message))
                    .unwrap_or_else(|_| json!({}))
            }
            Dialect::Gemini => serde_json::to_value(GeminiErrorResponse::new(
                status.as_u16(),
                status.canonical_reason().unwrap_or("INTERNAL"),
                message,
            ))
            .unwrap_or_else(|_| json!({})),
        }
    }
}

fn error_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::NoRoute { .. } => StatusCode::NOT_FOUND,
        GatewayError::Conversion { .. } | GatewayError::Config { .. } => StatusCode::BAD_REQUEST,
        GatewayError::Upstream { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Json(_) => StatusCode::BAD_REQUEST,
        GatewayError::Provider { .. } | GatewayError::Auth { .. } | GatewayError::Http(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(dialect: Dialect, err: &GatewayError) -> Response {
    let status = error_status(err);
    // Upstream bodies are already in some vendor's error dialect; pass the
    // text through inside ours rather than guessing at a translation.
    let message = err.to_string();
    (status, Json(dialect.error_body(status, &message))).into_response()
}

/// Reject requests that lack the configured gateway key, if one is set.
fn check_access(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.config.api_key.as_deref() else {
        return true;
    };

    if headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected)
    {
        return true;
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|v| v == expected)
}

async fn handle_anthropic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    handle_chat(state, headers, Dialect::Anthropic, body).await
}

async fn handle_openai(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    handle_chat(state, headers, Dialect::OpenAi, body).await
}

async fn handle_gemini(
    State(state): State<Arc<AppState>>,
    Path(model_and_action): Path<String>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    let Some((model, action)) = model_and_action.split_once(':') else {
        let status = StatusCode::NOT_FOUND;
        let err = Dialect::Gemini.error_body(status, "expected {model}:{action}");
        return (status, Json(err)).into_response();
    };

    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            let status = StatusCode::NOT_FOUND;
            let err = Dialect::Gemini.error_body(status, &format!("unknown action '{action}'"));
            return (status, Json(err)).into_response();
        }
    };

    // The route carries what other dialects put in the body.
    if let Some(obj) = body.as_object_mut() {
        obj.insert("model".to_string(), Value::String(model.to_string()));
        obj.insert("stream".to_string(), Value::Bool(stream));
    }

    handle_chat(state, headers, Dialect::Gemini, body).await
}

async fn handle_chat(
    state: Arc<AppState>,
    headers: HeaderMap,
    dialect: Dialect,
    body: Value,
) -> Response {
    if !check_access(&state, &headers) {
        let status = StatusCode::UNAUTHORIZED;
        let err = dialect.error_body(status, "invalid or missing api key");
        return (status, Json(err)).into_response();
    }

    let Some(endpoint) = state.gateway.registry().get(dialect.endpoint_name()) else {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let err = dialect.error_body(status, "endpoint transformer missing");
        return (status, Json(err)).into_response();
    };

    let unified = match endpoint.transform_request_out(body).await {
        Ok(u) => u,
        Err(e) => {
            state
                .logger
                .error("server", format!("Failed to parse request: {e}"));
            let status = StatusCode::BAD_REQUEST;
            let err = dialect.error_body(status, &format!("Invalid request body: {e}"));
            return (status, Json(err)).into_response();
        }
    };

    let requested_model = unified.model.clone();

    let resp = match state.gateway.forward(unified).await {
        Ok(r) => r,
        Err(e) => {
            state.logger.error("server", format!("Forward error: {e}"));
            return error_response(dialect, &e);
        }
    };

    let ctx = ResponseContext::new(requested_model);
    match endpoint.transform_response_in(resp, &ctx).await {
        Ok(UpstreamResponse::Json { status, body }) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            Json(body),
        )
            .into_response(),
        Ok(UpstreamResponse::Stream { status, stream }) => Response::builder()
            .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
            .header("content-type", "text/event-stream")
            .header("cache-control", "no-cache")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            state.logger.error("server", format!("Response conversion error: {e}"));
            error_response(dialect, &e)
        }
    }
}

// ---------------------------------------------------------------------------
// Provider management
// ---------------------------------------------------------------------------

fn masked(provider: &Provider) -> Value {
    let mut value = serde_json::to_value(provider).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        if obj.get("api_key").and_then(Value::as_str).is_some_and(|k| !k.is_empty()) {
            obj.insert("api_key".to_string(), Value::String("***".to_string()));
        }
    }
    value
}

async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Value> {
    let providers: Vec<Value> = state
        .gateway
        .directory()
        .list()
        .iter()
        .map(|p| masked(p))
        .collect();
    Json(json!({ "providers": providers }))
}

async fn create_provider(
    State(state): State<Arc<AppState>>,
    Json(provider): Json<Provider>,
) -> Response {
    let name = provider.name.clone();
    match state.gateway.directory().register(provider) {
        Ok(()) => {
            state.logger.info("server", format!("Registered provider '{name}'"));
            (StatusCode::CREATED, Json(json!({ "name": name }))).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn update_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(fields): Json<Value>,
) -> Response {
    let Some(existing) = state.gateway.directory().get(&name) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown provider '{name}'") })),
        )
            .into_response();
    };

    // Partial update: fields present in the body replace the stored ones.
    let mut merged = serde_json::to_value(existing.as_ref()).unwrap_or_else(|_| json!({}));
    if let (Some(target), Some(patch)) = (merged.as_object_mut(), fields.as_object()) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }

    let mut provider: Provider = match serde_json::from_value(merged) {
        Ok(p) => p,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    };

    // The path wins over whatever the body says.
    provider.name = name.clone();
    match state.gateway.directory().register(provider) {
        Ok(()) => Json(json!({ "name": name })).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn delete_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if state.gateway.directory().remove(&name) {
        state.logger.info("server", format!("Removed provider '{name}'"));
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown provider '{name}'") })),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct TogglePayload {
    enabled: bool,
}

async fn toggle_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(payload): Json<TogglePayload>,
) -> Response {
    match state
        .gateway
        .directory()
        .set_enabled(&name, payload.enabled)
    {
        Ok(()) => Json(json!({ "name": name, "enabled": payload.enabled })).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let models: Vec<Value> = state
        .gateway
        .directory()
        .model_entries()
        .iter()
        .map(|entry| {
            json!({
                "id": entry.id,
                "object": "model",
                "created": entry.created,
                "owned_by": entry.provider,
            })
        })
        .collect();

    Json(json!({ "data": models, "object": "list" }))
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    100
}

async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Value> {
    let entries = state.logger.recent(query.limit);
    Json(json!({ "logs": entries }))
}
