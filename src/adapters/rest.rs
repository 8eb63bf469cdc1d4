//! REST surface of the gateway.
//!
//! Each resource (`users`, `orders`) gets the same four operations. Every
//! operation turns into one bridged request: an event type such as
//! `ORDER_CREATE` published to the resource's domain queue, then the
//! worker's reply (or the failure) is rendered as JSON.
use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Instrument;

use crate::{
    core::{bridge::Bridge, error::FailureKind, message::CorrelationId, pump::PumpState},
    tracing_setup::create_request_span,
};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    bridge: Arc<Bridge>,
}

/// Resources exposed over REST, one per domain queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Users,
    Orders,
}

impl Resource {
    pub const ALL: [Resource; 2] = [Resource::Users, Resource::Orders];

    /// Domain name, which is also the work queue key in the config.
    pub fn domain(self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::Orders => "orders",
        }
    }

    fn event_prefix(self) -> &'static str {
        match self {
            Resource::Users => "USER",
            Resource::Orders => "ORDER",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Resource::Users => "User",
            Resource::Orders => "Order",
        }
    }

    /// Validate a create body and return the payload to publish.
    fn create_payload(self, body: Value) -> Result<Value, String> {
        match self {
            Resource::Users => require_object(body),
            Resource::Orders => normalize::<CreateOrder>(body),
        }
    }

    /// Validate an update body and return the fields to publish.
    fn update_fields(self, body: Value) -> Result<Value, String> {
        match self {
            Resource::Users => require_object(body),
            Resource::Orders => normalize::<UpdateOrder>(body),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Get,
    Update,
    Delete,
}

impl Operation {
    fn event_suffix(self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Get => "GET",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            Operation::Create => "created",
            Operation::Get => "retrieved",
            Operation::Update => "updated",
            Operation::Delete => "deleted",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Get => "retrieve",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    fn success_status(self) -> StatusCode {
        match self {
            Operation::Create => StatusCode::CREATED,
            _ => StatusCode::OK,
        }
    }
}

/// Event type tag for a resource operation, e.g. `ORDER_CREATE`.
pub fn event_type(resource: Resource, operation: Operation) -> String {
    format!("{}_{}", resource.event_prefix(), operation.event_suffix())
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrder {
    user_id: String,
    items: Vec<String>,
    total: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct UpdateOrder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    items: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

/// Parse `body` as `T` and re-encode it, dropping fields `T` does not know.
fn normalize<T>(body: Value) -> Result<Value, String>
where
    T: DeserializeOwned + Serialize,
{
    let dto: T = serde_json::from_value(body).map_err(|e| e.to_string())?;
    serde_json::to_value(dto).map_err(|e| e.to_string())
}

fn require_object(body: Value) -> Result<Value, String> {
    if body.is_object() {
        Ok(body)
    } else {
        Err("Request body must be a JSON object".to_string())
    }
}

/// Build the gateway router.
pub fn router(bridge: Arc<Bridge>, api_prefix: &str) -> Router {
    let prefix = api_prefix.trim_end_matches('/');
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status));

    for resource in Resource::ALL {
        let base = format!("{prefix}/{}", resource.domain());
        app = app
            .route(
                &base,
                post(move |state: State<AppState>, body: Json<Value>| {
                    create(state, resource, body)
                }),
            )
            .route(
                &format!("{base}/{{id}}"),
                get(move |state: State<AppState>, id: Path<String>| {
                    fetch(state, resource, id)
                })
                .put(
                    move |state: State<AppState>, id: Path<String>, body: Json<Value>| {
                        update(state, resource, id, body)
                    },
                )
                .delete(move |state: State<AppState>, id: Path<String>| {
                    remove(state, resource, id)
                }),
            );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { bridge })
}

async fn create(
    State(state): State<AppState>,
    resource: Resource,
    Json(body): Json<Value>,
) -> Response {
    let correlation_id = CorrelationId::new();
    let payload = match resource.create_payload(body) {
        Ok(payload) => payload,
        Err(message) => return bad_request(&correlation_id, message),
    };
    dispatch(&state, resource, Operation::Create, correlation_id, payload).await
}

async fn fetch(
    State(state): State<AppState>,
    resource: Resource,
    Path(id): Path<String>,
) -> Response {
    let payload = json!({ "id": id });
    dispatch(&state, resource, Operation::Get, CorrelationId::new(), payload).await
}

async fn update(
    State(state): State<AppState>,
    resource: Resource,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let correlation_id = CorrelationId::new();
    let fields = match resource.update_fields(body) {
        Ok(fields) => fields,
        Err(message) => return bad_request(&correlation_id, message),
    };

    let mut payload = serde_json::Map::new();
    payload.insert("id".to_string(), Value::String(id));
    if let Value::Object(fields) = fields {
        for (key, value) in fields {
            if key != "id" {
                payload.insert(key, value);
            }
        }
    }
    dispatch(&state, resource, Operation::Update, correlation_id, Value::Object(payload)).await
}

async fn remove(
    State(state): State<AppState>,
    resource: Resource,
    Path(id): Path<String>,
) -> Response {
    let payload = json!({ "id": id });
    dispatch(&state, resource, Operation::Delete, CorrelationId::new(), payload).await
}

async fn dispatch(
    state: &AppState,
    resource: Resource,
    operation: Operation,
    correlation_id: CorrelationId,
    payload: Value,
) -> Response {
    let event_type = event_type(resource, operation);
    let span = create_request_span(resource.domain(), &event_type, correlation_id.as_str());
    let started = Instant::now();
    let outcome = state
        .bridge
        .send_correlated(
            correlation_id.clone(),
            resource.domain(),
            &event_type,
            payload,
            None,
        )
        .instrument(span.clone())
        .await;
    span.record("duration_ms", started.elapsed().as_millis() as u64);
    span.record("outcome", if outcome.is_ok() { "success" } else { "failure" });

    match outcome {
        Ok(data) => success_response(resource, operation, &correlation_id, data),
        Err(failure) => {
            tracing::error!(
                correlation_id = %correlation_id,
                "Failed to {} {}: {}",
                operation.verb(),
                resource.label().to_lowercase(),
                failure
            );
            failure_response(resource, operation, &correlation_id, &failure)
        }
    }
}

fn success_response(
    resource: Resource,
    operation: Operation,
    correlation_id: &CorrelationId,
    data: Value,
) -> Response {
    let message = format!("{} {} successfully", resource.label(), operation.past_tense());
    let body = if operation == Operation::Delete {
        json!({ "message": message, "correlationId": correlation_id })
    } else {
        json!({ "message": message, "data": data, "correlationId": correlation_id })
    };
    (operation.success_status(), Json(body)).into_response()
}

/// Map a bridge failure to an HTTP status code and JSON error body.
pub fn failure_response(
    resource: Resource,
    operation: Operation,
    correlation_id: &CorrelationId,
    failure: &FailureKind,
) -> Response {
    let label = resource.label();
    let (status, message, error) = match failure {
        FailureKind::Timeout(_) => (
            StatusCode::REQUEST_TIMEOUT,
            format!("Request timeout - {label} service did not respond in time"),
            "TIMEOUT".to_string(),
        ),
        FailureKind::RemoteFailure(reason)
            if operation != Operation::Create && reason.contains("not found") =>
        {
            (
                StatusCode::NOT_FOUND,
                format!("{label} not found"),
                reason.clone(),
            )
        }
        FailureKind::RemoteFailure(reason) => {
            let status = match operation {
                Operation::Create | Operation::Update => StatusCode::BAD_REQUEST,
                Operation::Get | Operation::Delete => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                format!("Failed to {} {}", operation.verb(), label.to_lowercase()),
                reason.clone(),
            )
        }
        FailureKind::Cancelled => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Gateway is shutting down".to_string(),
            failure.to_string(),
        ),
        other => (
            StatusCode::BAD_GATEWAY,
            format!("Failed to {} {}", operation.verb(), label.to_lowercase()),
            other.to_string(),
        ),
    };

    (
        status,
        Json(json!({
            "message": message,
            "correlationId": correlation_id,
            "error": error,
        })),
    )
        .into_response()
}

fn bad_request(correlation_id: &CorrelationId, message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "message": "Bad request",
            "correlationId": correlation_id,
            "error": message,
        })),
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    let status = state.bridge.status().await;
    let (code, label) = match status.pump {
        PumpState::Polling => (StatusCode::OK, "healthy"),
        PumpState::BackoffAfterError => (StatusCode::OK, "degraded"),
        PumpState::Stopped => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    let body = json!({
        "status": label,
        "pump": status.pump,
        "pending": status.registry.pending,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (code, Json(body)).into_response()
}

async fn status(State(state): State<AppState>) -> Response {
    let status = state.bridge.status().await;
    let body = json!({
        "service": "Conduit API Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "bridge": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (StatusCode::OK, Json(body)).into_response()
}
