//! Fan-out of domain events to subscribed endpoints.

use chrono::Utc;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{
    DeliveryRecorder, DeliverySender, Endpoint, EndpointRegistry, EventEnvelope, EventType,
    WebhookError,
};

/// Result of the first attempt against one endpoint
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub endpoint_id: i32,
    /// `None` when the delivery row could not be created and nothing was sent
    pub delivery_id: Option<i32>,
    pub delivered: bool,
    pub response_status: Option<u16>,
    pub error_message: Option<String>,
}

pub struct Dispatcher {
    registry: Arc<dyn EndpointRegistry>,
    recorder: Arc<DeliveryRecorder>,
    sender: Arc<DeliverySender>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn EndpointRegistry>,
        recorder: Arc<DeliveryRecorder>,
        sender: Arc<DeliverySender>,
    ) -> Self {
        Self {
            registry,
            recorder,
            sender,
        }
    }

    /// Publish an event without waiting for subscribers.
    ///
    /// The caller never observes delivery failures; they are recorded on the
    /// delivery rows and logged. The handle is only useful to tests and to
    /// graceful shutdown.
    pub fn dispatch(self: &Arc<Self>, event: EventType, data: Map<String, Value>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            match dispatcher.deliver_event(event, data).await {
                Ok(reports) if reports.is_empty() => {}
                Ok(reports) => {
                    let delivered = reports.iter().filter(|r| r.delivered).count();
                    info!(
                        "Dispatched {} to {} endpoint(s), {} delivered on first attempt",
                        event,
                        reports.len(),
                        delivered
                    );
                }
                Err(e) => error!("Failed to dispatch {} event: {}", event, e),
            }
        })
    }

    /// Deliver an event to every subscribed endpoint and wait for the first
    /// attempts to finish.
    pub async fn deliver_event(
        &self,
        event: EventType,
        data: Map<String, Value>,
    ) -> Result<Vec<DeliveryReport>, WebhookError> {
        let endpoints = self.registry.subscribed_endpoints(event).await?;
        if endpoints.is_empty() {
            debug!("No endpoints subscribed to {}", event);
            return Ok(Vec::new());
        }

        let payload = EventEnvelope::new(event, data).to_payload()?;

        let reports = join_all(
            endpoints
                .iter()
                .map(|endpoint| self.deliver_to(endpoint, event, &payload)),
        )
        .await;

        Ok(reports)
    }

    async fn deliver_to(&self, endpoint: &Endpoint, event: EventType, payload: &str) -> DeliveryReport {
        let delivery = match self
            .recorder
            .create_pending(endpoint.id, event.as_str(), payload, Utc::now())
            .await
        {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(
                    "Failed to create delivery record for endpoint {}: {}",
                    endpoint.id, e
                );
                return DeliveryReport {
                    endpoint_id: endpoint.id,
                    delivery_id: None,
                    delivered: false,
                    response_status: None,
                    error_message: Some(format!("failed to create delivery record: {}", e)),
                };
            }
        };

        let outcome = self.sender.send(endpoint, &delivery).await;

        if let Err(e) = self
            .recorder
            .record_outcome(&delivery, &outcome, Utc::now())
            .await
        {
            error!("Failed to record outcome of delivery {}: {}", delivery.id, e);
        }

        DeliveryReport {
            endpoint_id: endpoint.id,
            delivery_id: Some(delivery.id),
            delivered: outcome.success,
            response_status: outcome.response_status,
            error_message: outcome.error_message,
        }
    }
}
