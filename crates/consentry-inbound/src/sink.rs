use async_trait::async_trait;
use tracing::info;

use crate::{InboundError, InboundUpdate};

/// Receives verified, mapped provider updates.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn apply(&self, update: InboundUpdate) -> Result<(), InboundError>;
}

/// Logs every update and applies nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl InboundSink for TracingSink {
    async fn apply(&self, update: InboundUpdate) -> Result<(), InboundError> {
        info!(
            provider = %update.provider,
            event_type = %update.event_type,
            external_id = %update.external_id,
            subject_id = update.subject_id.as_deref().unwrap_or("-"),
            "Verified {} callback mapped to {}",
            update.provider,
            update.status
        );
        Ok(())
    }
}
