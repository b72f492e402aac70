//! `POST /inbound/{provider}`: the single entry point for provider callbacks.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use consentry_core::error_builder::{bad_request, internal_server_error, not_found, unauthorized};
use consentry_core::problemdetails::Problem;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use utoipa::{OpenApi, ToSchema};

use crate::{InboundConfig, InboundGate, InboundSink, InboundUpdate, Provider};

pub struct InboundState {
    gates: HashMap<Provider, Arc<dyn InboundGate>>,
    sink: Arc<dyn InboundSink>,
}

impl InboundState {
    pub fn new(config: &InboundConfig, sink: Arc<dyn InboundSink>) -> Self {
        Self::with_gates(config.gates(), sink)
    }

    pub fn with_gates(
        gates: HashMap<Provider, Arc<dyn InboundGate>>,
        sink: Arc<dyn InboundSink>,
    ) -> Self {
        Self { gates, sink }
    }

    pub fn configured_providers(&self) -> Vec<Provider> {
        Provider::all()
            .into_iter()
            .filter(|p| self.gates.contains_key(p))
            .collect()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(receive_callback),
    components(schemas(AckResponse, Provider)),
    info(
        title = "Inbound Callbacks API",
        description = "Signed callbacks from payment and verification providers",
        version = "1.0.0"
    ),
    tags((name = "Inbound", description = "Provider callbacks"))
)]
pub struct InboundApiDoc;

#[derive(Debug, Serialize, ToSchema)]
pub struct AckResponse {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<bool>,
}

impl AckResponse {
    fn received() -> Json<Self> {
        Json(Self {
            received: true,
            ignored: None,
        })
    }

    fn ignored() -> Json<Self> {
        Json(Self {
            received: true,
            ignored: Some(true),
        })
    }
}

/// Receive a provider callback
#[utoipa::path(
    post,
    path = "/inbound/{provider}",
    params(("provider" = String, Path, description = "payments, document-check or liveness")),
    request_body(content = String, description = "Raw provider payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Callback acknowledged", body = AckResponse),
        (status = 400, description = "Verified payload could not be parsed"),
        (status = 401, description = "Signature verification failed"),
        (status = 404, description = "Unknown or unconfigured provider"),
        (status = 500, description = "Update could not be applied")
    ),
    tag = "Inbound"
)]
async fn receive_callback(
    State(state): State<Arc<InboundState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, Problem> {
    let gate = provider
        .parse::<Provider>()
        .ok()
        .and_then(|p| state.gates.get(&p))
        .ok_or_else(|| {
            debug!("Callback for unknown or unconfigured provider {}", provider);
            not_found()
                .detail(format!("No inbound provider named '{}'", provider))
                .build()
        })?;
    let provider = gate.provider();

    // Nothing in the body is read before this passes
    if let Err(e) = gate.authenticate(&body, &headers) {
        warn!(
            target: "security",
            provider = %provider,
            "Rejected inbound callback: {}",
            e
        );
        return Err(unauthorized()
            .detail("Callback signature could not be verified")
            .build());
    }

    let callback = match gate.parse(&body) {
        Ok(callback) => callback,
        Err(e) if gate.acknowledges_malformed_payload() => {
            warn!("Acknowledging malformed {} payload: {}", provider, e);
            return Ok((StatusCode::OK, AckResponse::received()));
        }
        Err(e) => {
            warn!("Malformed {} payload: {}", provider, e);
            return Err(bad_request()
                .title("Invalid payload")
                .detail(e.to_string())
                .build());
        }
    };

    let Some(status) = gate.map_status(&callback.vendor_status) else {
        info!(
            "Ignoring {} callback {} with unmapped status '{}'",
            provider, callback.external_id, callback.vendor_status
        );
        return Ok((StatusCode::OK, AckResponse::ignored()));
    };

    let update = InboundUpdate::new(provider, callback, status);
    let tolerated = gate.tolerates_sink_error(&update);
    let external_id = update.external_id.clone();

    match state.sink.apply(update).await {
        Ok(()) => Ok((StatusCode::OK, AckResponse::received())),
        Err(e) if tolerated => {
            error!(
                "Failed to apply {} callback {} (acknowledged): {}",
                provider, external_id, e
            );
            Ok((StatusCode::OK, AckResponse::received()))
        }
        Err(e) => {
            error!(
                "Failed to apply {} callback {}: {}",
                provider, external_id, e
            );
            Err(internal_server_error().build())
        }
    }
}

pub fn configure_routes() -> Router<Arc<InboundState>> {
    Router::new().route("/inbound/{provider}", post(receive_callback))
}
