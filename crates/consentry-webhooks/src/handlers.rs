//! Admin HTTP handlers for endpoints and delivery history.

use crate::events::EventType;
use crate::recorder::DeliveryFilter;
use crate::registry::{RegisterEndpointRequest, UpdateEndpointRequest};
use crate::{DatabaseEndpointRegistry, Delivery, DeliveryRecorder, Endpoint, WebhookError};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use consentry_core::error_builder::{bad_request, not_found, unauthorized, ErrorBuilder};
use consentry_core::problemdetails::Problem;
use consentry_core::signature::constant_time_eq;
use consentry_entities::DeliveryStatus;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

const DEFAULT_DELIVERY_LIMIT: u64 = 50;
const MAX_DELIVERY_LIMIT: u64 = 200;

/// Shared state for the admin handlers
pub struct WebhookAdminState {
    pub registry: Arc<DatabaseEndpointRegistry>,
    pub recorder: Arc<DeliveryRecorder>,
    /// Bearer token required on every admin route. Empty disables access.
    pub admin_token: String,
}

impl WebhookAdminState {
    pub fn new(
        registry: Arc<DatabaseEndpointRegistry>,
        recorder: Arc<DeliveryRecorder>,
        admin_token: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            recorder,
            admin_token: admin_token.into(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        list_endpoints,
        create_endpoint,
        update_endpoint,
        delete_endpoint,
        list_deliveries,
        get_delivery,
        list_event_types,
    ),
    components(
        schemas(
            EndpointResponse,
            CreateEndpointRequestBody,
            UpdateEndpointRequestBody,
            DeliveryResponse,
            EventTypeResponse,
            DeliveryStatus,
        )
    ),
    info(
        title = "Webhooks Admin API",
        description = "Manage subscriber endpoints and audit webhook deliveries",
        version = "1.0.0"
    ),
    tags(
        (name = "Webhook Endpoints", description = "Subscriber endpoint management"),
        (name = "Webhook Deliveries", description = "Delivery audit trail")
    )
)]
pub struct WebhooksApiDoc;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EndpointResponse {
    pub id: i32,
    pub url: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub description: Option<String>,
    #[schema(example = "2026-03-01T12:00:00Z")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[schema(example = "2026-03-01T12:00:00Z")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Endpoint> for EndpointResponse {
    fn from(endpoint: Endpoint) -> Self {
        let events = endpoint.event_names();
        Self {
            id: endpoint.id,
            url: endpoint.url,
            events,
            is_active: endpoint.is_active,
            description: endpoint.description,
            created_at: endpoint.created_at,
            updated_at: endpoint.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateEndpointRequestBody {
    /// HTTPS URL that receives deliveries
    #[schema(example = "https://hooks.example.com/consentry")]
    pub url: String,
    /// Shared secret used to sign deliveries
    pub secret: String,
    #[schema(example = json!(["contributor.onboarded", "match.detected"]))]
    pub events: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateEndpointRequestBody {
    pub is_active: Option<bool>,
    pub events: Option<Vec<String>>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliveryResponse {
    pub id: i32,
    pub endpoint_id: i32,
    pub event_type: String,
    /// Exact JSON body that was signed and sent
    pub payload: String,
    pub status: DeliveryStatus,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub delivered_at: Option<chrono::DateTime<chrono::Utc>>,
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    #[schema(example = "2026-03-01T12:00:00Z")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Delivery> for DeliveryResponse {
    fn from(delivery: Delivery) -> Self {
        Self {
            id: delivery.id,
            endpoint_id: delivery.endpoint_id,
            event_type: delivery.event_type,
            payload: delivery.payload,
            status: delivery.status,
            response_status: delivery.response_status,
            response_body: delivery.response_body,
            error_message: delivery.error_message,
            attempts: delivery.attempts,
            delivered_at: delivery.delivered_at,
            next_retry_at: delivery.next_retry_at,
            created_at: delivery.created_at,
            updated_at: delivery.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventTypeResponse {
    pub event_type: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct ListDeliveriesQuery {
    pub status: Option<String>,
    pub endpoint_id: Option<i32>,
    pub limit: Option<u64>,
}

// ============================================================================
// Helpers
// ============================================================================

fn require_admin(state: &WebhookAdminState, headers: &HeaderMap) -> Result<(), Problem> {
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token)
            if !state.admin_token.is_empty()
                && constant_time_eq(token.as_bytes(), state.admin_token.as_bytes()) =>
        {
            Ok(())
        }
        _ => {
            warn!(target: "security", "Rejected admin request with missing or invalid token");
            Err(unauthorized().detail("A valid admin bearer token is required").build())
        }
    }
}

/// Decode a JSON request body. Call only after `require_admin`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Problem> {
    serde_json::from_slice(body)
        .map_err(|e| bad_request().title("Invalid request body").detail(e.to_string()).build())
}

fn parse_events(raw: &[String]) -> Result<Vec<EventType>, Problem> {
    raw.iter()
        .map(|name| name.parse::<EventType>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| bad_request().title("Invalid event type").detail(e.to_string()).build())
}

fn webhook_problem(e: WebhookError, title: &str) -> Problem {
    match e {
        WebhookError::InvalidEndpoint(_) | WebhookError::UnknownEventType(_) => {
            bad_request().title(title).detail(e.to_string()).build()
        }
        WebhookError::EndpointNotFound(_) | WebhookError::DeliveryNotFound(_) => {
            not_found().detail(e.to_string()).build()
        }
        _ => {
            error!("{}: {}", title, e);
            ErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
                .title(title)
                .detail(e.to_string())
                .build()
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// List all registered endpoints
#[utoipa::path(
    get,
    path = "/webhooks/endpoints",
    responses(
        (status = 200, description = "List of endpoints", body = Vec<EndpointResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    tag = "Webhook Endpoints",
    security(("bearer_auth" = []))
)]
async fn list_endpoints(
    State(state): State<Arc<WebhookAdminState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Problem> {
    require_admin(&state, &headers)?;

    let endpoints = state
        .registry
        .list_endpoints()
        .await
        .map_err(|e| webhook_problem(e, "Failed to list endpoints"))?;
    let responses: Vec<EndpointResponse> = endpoints.into_iter().map(Into::into).collect();
    Ok(Json(responses))
}

/// Register a new endpoint
#[utoipa::path(
    post,
    path = "/webhooks/endpoints",
    request_body = CreateEndpointRequestBody,
    responses(
        (status = 201, description = "Endpoint registered", body = EndpointResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    tag = "Webhook Endpoints",
    security(("bearer_auth" = []))
)]
async fn create_endpoint(
    State(state): State<Arc<WebhookAdminState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, Problem> {
    require_admin(&state, &headers)?;
    let body: CreateEndpointRequestBody = parse_body(&body)?;

    let events = parse_events(&body.events)?;
    let request = RegisterEndpointRequest {
        url: body.url,
        secret: body.secret,
        events,
        description: body.description,
    };

    let endpoint = state
        .registry
        .register_endpoint(request)
        .await
        .map_err(|e| webhook_problem(e, "Failed to register endpoint"))?;

    info!("Registered endpoint {} via admin API", endpoint.id);
    Ok((StatusCode::CREATED, Json(EndpointResponse::from(endpoint))))
}

/// Update an endpoint's active flag, subscriptions or description
#[utoipa::path(
    patch,
    path = "/webhooks/endpoints/{endpoint_id}",
    request_body = UpdateEndpointRequestBody,
    responses(
        (status = 200, description = "Endpoint updated", body = EndpointResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("endpoint_id" = i32, Path, description = "Endpoint ID")
    ),
    tag = "Webhook Endpoints",
    security(("bearer_auth" = []))
)]
async fn update_endpoint(
    State(state): State<Arc<WebhookAdminState>>,
    headers: HeaderMap,
    Path(endpoint_id): Path<i32>,
    body: Bytes,
) -> Result<impl IntoResponse, Problem> {
    require_admin(&state, &headers)?;
    let body: UpdateEndpointRequestBody = parse_body(&body)?;

    let events = body.events.as_deref().map(parse_events).transpose()?;
    let request = UpdateEndpointRequest {
        is_active: body.is_active,
        events,
        description: body.description,
    };

    let endpoint = state
        .registry
        .update_endpoint(endpoint_id, request)
        .await
        .map_err(|e| webhook_problem(e, "Failed to update endpoint"))?;
    Ok(Json(EndpointResponse::from(endpoint)))
}

/// Delete an endpoint; its delivery history is kept
#[utoipa::path(
    delete,
    path = "/webhooks/endpoints/{endpoint_id}",
    responses(
        (status = 204, description = "Endpoint deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("endpoint_id" = i32, Path, description = "Endpoint ID")
    ),
    tag = "Webhook Endpoints",
    security(("bearer_auth" = []))
)]
async fn delete_endpoint(
    State(state): State<Arc<WebhookAdminState>>,
    headers: HeaderMap,
    Path(endpoint_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    require_admin(&state, &headers)?;

    match state.registry.delete_endpoint(endpoint_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(webhook_problem(
            WebhookError::EndpointNotFound(endpoint_id),
            "Endpoint not found",
        )),
        Err(e) => Err(webhook_problem(e, "Failed to delete endpoint")),
    }
}

/// List deliveries, newest first
#[utoipa::path(
    get,
    path = "/webhooks/deliveries",
    responses(
        (status = 200, description = "List of deliveries", body = Vec<DeliveryResponse>),
        (status = 400, description = "Invalid status filter"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("status" = Option<String>, Query, description = "pending, delivered or failed"),
        ("endpoint_id" = Option<i32>, Query, description = "Only deliveries for this endpoint"),
        ("limit" = Option<u64>, Query, description = "Number of deliveries to return (default: 50, max: 200)")
    ),
    tag = "Webhook Deliveries",
    security(("bearer_auth" = []))
)]
async fn list_deliveries(
    State(state): State<Arc<WebhookAdminState>>,
    headers: HeaderMap,
    Query(query): Query<ListDeliveriesQuery>,
) -> Result<impl IntoResponse, Problem> {
    require_admin(&state, &headers)?;

    let status = query
        .status
        .as_deref()
        .map(str::parse::<DeliveryStatus>)
        .transpose()
        .map_err(|e| bad_request().title("Invalid status filter").detail(e).build())?;

    let filter = DeliveryFilter {
        status,
        endpoint_id: query.endpoint_id,
        limit: query
            .limit
            .unwrap_or(DEFAULT_DELIVERY_LIMIT)
            .clamp(1, MAX_DELIVERY_LIMIT),
    };

    let deliveries = state
        .recorder
        .list_deliveries(filter)
        .await
        .map_err(|e| webhook_problem(e, "Failed to list deliveries"))?;
    let responses: Vec<DeliveryResponse> = deliveries.into_iter().map(Into::into).collect();
    Ok(Json(responses))
}

/// Get one delivery including its payload
#[utoipa::path(
    get,
    path = "/webhooks/deliveries/{delivery_id}",
    responses(
        (status = 200, description = "Delivery details", body = DeliveryResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Delivery not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("delivery_id" = i32, Path, description = "Delivery ID")
    ),
    tag = "Webhook Deliveries",
    security(("bearer_auth" = []))
)]
async fn get_delivery(
    State(state): State<Arc<WebhookAdminState>>,
    headers: HeaderMap,
    Path(delivery_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    require_admin(&state, &headers)?;

    match state.recorder.get_delivery(delivery_id).await {
        Ok(Some(delivery)) => Ok(Json(DeliveryResponse::from(delivery))),
        Ok(None) => Err(webhook_problem(
            WebhookError::DeliveryNotFound(delivery_id),
            "Delivery not found",
        )),
        Err(e) => Err(webhook_problem(e, "Failed to get delivery")),
    }
}

/// List available event types
#[utoipa::path(
    get,
    path = "/webhooks/event-types",
    responses(
        (status = 200, description = "List of available event types", body = Vec<EventTypeResponse>),
    ),
    tag = "Webhook Endpoints",
)]
async fn list_event_types() -> impl IntoResponse {
    let event_types: Vec<EventTypeResponse> = EventType::all()
        .into_iter()
        .map(|event| EventTypeResponse {
            event_type: event.as_str().to_string(),
            description: event.description().to_string(),
            category: event.category().to_string(),
        })
        .collect();

    Json(event_types)
}

/// Configure admin routes
pub fn configure_routes() -> Router<Arc<WebhookAdminState>> {
    Router::new()
        // Event types (no auth required for listing available types)
        .route("/webhooks/event-types", get(list_event_types))
        .route(
            "/webhooks/endpoints",
            get(list_endpoints).post(create_endpoint),
        )
        .route(
            "/webhooks/endpoints/{endpoint_id}",
            axum::routing::patch(update_endpoint).delete(delete_endpoint),
        )
        .route("/webhooks/deliveries", get(list_deliveries))
        .route("/webhooks/deliveries/{delivery_id}", get(get_delivery))
}
