//! Subscriber endpoint storage.

use async_trait::async_trait;
use consentry_entities::webhook_endpoints;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{Endpoint, EventType, WebhookError};

/// Read side of the endpoint store, as used by delivery.
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// Active endpoints subscribed to `event`
    async fn subscribed_endpoints(&self, event: EventType) -> Result<Vec<Endpoint>, WebhookError>;

    async fn find_endpoint(&self, id: i32) -> Result<Option<Endpoint>, WebhookError>;
}

/// Request to register a new endpoint
#[derive(Debug, Clone)]
pub struct RegisterEndpointRequest {
    pub url: String,
    pub secret: String,
    pub events: Vec<EventType>,
    pub description: Option<String>,
}

/// Partial update of an endpoint. The URL and secret are fixed once registered.
#[derive(Debug, Clone, Default)]
pub struct UpdateEndpointRequest {
    pub is_active: Option<bool>,
    pub events: Option<Vec<EventType>>,
    pub description: Option<String>,
}

pub struct DatabaseEndpointRegistry {
    db: Arc<DatabaseConnection>,
}

impl DatabaseEndpointRegistry {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn register_endpoint(
        &self,
        request: RegisterEndpointRequest,
    ) -> Result<Endpoint, WebhookError> {
        validate_endpoint_url(&request.url)?;
        if request.secret.trim().is_empty() {
            return Err(WebhookError::InvalidEndpoint(
                "secret must not be empty".to_string(),
            ));
        }
        let events_json = events_to_json(&request.events)?;

        let endpoint = webhook_endpoints::ActiveModel {
            url: Set(request.url),
            secret: Set(request.secret),
            events: Set(events_json),
            is_active: Set(true),
            description: Set(request.description),
            ..Default::default()
        };

        let result = endpoint.insert(self.db.as_ref()).await?;
        info!("Registered webhook endpoint {} -> {}", result.id, result.url);
        Ok(result)
    }

    pub async fn list_endpoints(&self) -> Result<Vec<Endpoint>, WebhookError> {
        let endpoints = webhook_endpoints::Entity::find()
            .order_by_asc(webhook_endpoints::Column::Id)
            .all(self.db.as_ref())
            .await?;
        Ok(endpoints)
    }

    pub async fn update_endpoint(
        &self,
        id: i32,
        request: UpdateEndpointRequest,
    ) -> Result<Endpoint, WebhookError> {
        let endpoint = webhook_endpoints::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or(WebhookError::EndpointNotFound(id))?;

        let mut active_model: webhook_endpoints::ActiveModel = endpoint.into();

        if let Some(is_active) = request.is_active {
            active_model.is_active = Set(is_active);
        }

        if let Some(events) = request.events {
            active_model.events = Set(events_to_json(&events)?);
        }

        if let Some(description) = request.description {
            active_model.description = Set(Some(description));
        }

        let result = active_model.update(self.db.as_ref()).await?;
        info!("Updated webhook endpoint {}", id);
        Ok(result)
    }

    pub async fn set_active(&self, id: i32, is_active: bool) -> Result<Endpoint, WebhookError> {
        self.update_endpoint(
            id,
            UpdateEndpointRequest {
                is_active: Some(is_active),
                ..Default::default()
            },
        )
        .await
    }

    /// Delete an endpoint. Its delivery history is kept.
    pub async fn delete_endpoint(&self, id: i32) -> Result<bool, WebhookError> {
        let result = webhook_endpoints::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected > 0 {
            info!("Deleted webhook endpoint {}", id);
        }
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl EndpointRegistry for DatabaseEndpointRegistry {
    async fn subscribed_endpoints(&self, event: EventType) -> Result<Vec<Endpoint>, WebhookError> {
        let endpoints = webhook_endpoints::Entity::find()
            .filter(webhook_endpoints::Column::IsActive.eq(true))
            .order_by_asc(webhook_endpoints::Column::Id)
            .all(self.db.as_ref())
            .await?;

        let subscribed: Vec<Endpoint> = endpoints
            .into_iter()
            .filter(|endpoint| endpoint.is_subscribed_to(event.as_str()))
            .collect();

        debug!(
            "{} active endpoint(s) subscribed to {}",
            subscribed.len(),
            event
        );
        Ok(subscribed)
    }

    async fn find_endpoint(&self, id: i32) -> Result<Option<Endpoint>, WebhookError> {
        Ok(webhook_endpoints::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?)
    }
}

fn events_to_json(events: &[EventType]) -> Result<String, WebhookError> {
    if events.is_empty() {
        return Err(WebhookError::InvalidEndpoint(
            "at least one event type is required".to_string(),
        ));
    }
    let mut names: Vec<&str> = events.iter().map(EventType::as_str).collect();
    names.sort_unstable();
    names.dedup();
    Ok(serde_json::to_string(&names)?)
}

/// Endpoints must be absolute HTTPS URLs with a host.
pub(crate) fn validate_endpoint_url(raw: &str) -> Result<(), WebhookError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| WebhookError::InvalidEndpoint(format!("invalid URL '{}': {}", raw, e)))?;

    if parsed.scheme() != "https" {
        return Err(WebhookError::InvalidEndpoint(format!(
            "endpoint URL must use https, got '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(WebhookError::InvalidEndpoint(
            "endpoint URL must include a host".to_string(),
        ));
    }
    Ok(())
}
