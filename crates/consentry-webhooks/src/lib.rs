//! # consentry-webhooks
//!
//! Outbound webhook delivery for Consentry domain events.
//!
//! This crate provides functionality for:
//! - Registering subscriber endpoints (HTTPS only)
//! - Signing and delivering event envelopes, one recorded delivery per endpoint
//! - Retrying failed deliveries with exponential backoff and an attempt cap
//! - Admin HTTP routes for endpoints and delivery history

mod config;
mod dispatcher;
mod error;
mod events;
mod handlers;
mod recorder;
mod registry;
mod retry;
mod scheduler;
mod sender;

pub use config::WebhookConfig;
pub use dispatcher::{DeliveryReport, Dispatcher};
pub use error::WebhookError;
pub use events::{EventEnvelope, EventType};
pub use handlers::{configure_routes, WebhookAdminState, WebhooksApiDoc};
pub use recorder::{DeliveryFilter, DeliveryRecorder};
pub use registry::{
    DatabaseEndpointRegistry, EndpointRegistry, RegisterEndpointRequest, UpdateEndpointRequest,
};
pub use retry::{backoff_for, RetryScheduler, BACKOFF_SCHEDULE};
pub use scheduler::SweepScheduler;
pub use sender::{AttemptOutcome, DeliverySender};

pub(crate) use consentry_entities::webhook_deliveries::Model as Delivery;
pub(crate) use consentry_entities::webhook_endpoints::Model as Endpoint;

#[cfg(test)]
mod test_support;
