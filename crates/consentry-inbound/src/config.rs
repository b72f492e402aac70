use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::providers::{
    DocumentCheckConfig, DocumentCheckGate, LivenessConfig, LivenessGate, PaymentsConfig,
    PaymentsGate,
};
use crate::{InboundGate, Provider};

/// Credentials for the providers allowed to call in. A provider without
/// credentials has no route.
#[derive(Debug, Clone, Default)]
pub struct InboundConfig {
    pub payments: Option<PaymentsConfig>,
    pub document_check: Option<DocumentCheckConfig>,
    pub liveness: Option<LivenessConfig>,
}

impl InboundConfig {
    /// Build a gate for every provider with a non-empty secret.
    pub fn gates(&self) -> HashMap<Provider, Arc<dyn InboundGate>> {
        let mut gates: HashMap<Provider, Arc<dyn InboundGate>> = HashMap::new();

        if let Some(config) = self.payments.as_ref().filter(|c| !c.secret.is_empty()) {
            gates.insert(
                Provider::Payments,
                Arc::new(PaymentsGate::new(config.clone())),
            );
        }
        if let Some(config) = self
            .document_check
            .as_ref()
            .filter(|c| !c.secret.is_empty())
        {
            gates.insert(
                Provider::DocumentCheck,
                Arc::new(DocumentCheckGate::new(config.clone())),
            );
        }
        if let Some(config) = self.liveness.as_ref().filter(|c| !c.secret.is_empty()) {
            gates.insert(
                Provider::Liveness,
                Arc::new(LivenessGate::new(config.clone())),
            );
        }

        for provider in Provider::all() {
            if !gates.contains_key(&provider) {
                debug!("Inbound provider {} not configured", provider);
            }
        }
        gates
    }
}
