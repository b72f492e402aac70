use thiserror::Error;

/// Webhook subsystem errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(i32),

    #[error("Delivery not found: {0}")]
    DeliveryNotFound(i32),
}
