//! Shared fixtures for the crate's database-backed tests.

use serde_json::{Map, Value};
use std::sync::Arc;

use consentry_database::test_utils::TestDatabase;

use crate::{
    DatabaseEndpointRegistry, DeliveryRecorder, DeliverySender, Dispatcher, Endpoint,
    EndpointRegistry, EventType, RegisterEndpointRequest, RetryScheduler, WebhookConfig,
};

pub struct Harness {
    pub db: TestDatabase,
    pub registry: Arc<DatabaseEndpointRegistry>,
    pub recorder: Arc<DeliveryRecorder>,
    pub dispatcher: Arc<Dispatcher>,
    pub retry: Arc<RetryScheduler>,
}

pub async fn harness(config: WebhookConfig) -> anyhow::Result<Harness> {
    let db = TestDatabase::with_migrations().await?;
    let registry = Arc::new(DatabaseEndpointRegistry::new(db.connection_arc()));
    let recorder = Arc::new(DeliveryRecorder::new(db.connection_arc(), &config));
    let sender = Arc::new(DeliverySender::new(&config)?);
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        recorder.clone(),
        sender.clone(),
    ));
    let retry = Arc::new(RetryScheduler::new(
        registry.clone(),
        recorder.clone(),
        sender,
        config,
    ));
    Ok(Harness {
        db,
        registry,
        recorder,
        dispatcher,
        retry,
    })
}

/// Registration only accepts https; the stored URL is then pointed at the
/// plain-http mock server.
pub async fn register(
    harness: &Harness,
    url: &str,
    events: Vec<EventType>,
    secret: &str,
) -> anyhow::Result<Endpoint> {
    let endpoint = harness
        .registry
        .register_endpoint(RegisterEndpointRequest {
            url: "https://placeholder.example.com/hook".to_string(),
            secret: secret.to_string(),
            events,
            description: None,
        })
        .await?;
    harness
        .db
        .execute_sql(&format!(
            "UPDATE webhook_endpoints SET url = '{}' WHERE id = {}",
            url, endpoint.id
        ))
        .await?;
    harness
        .registry
        .find_endpoint(endpoint.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("endpoint {} vanished", endpoint.id))
}

pub fn data() -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("contributor_id".to_string(), Value::from(42));
    data
}
