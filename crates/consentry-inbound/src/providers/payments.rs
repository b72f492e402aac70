use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use consentry_core::signature;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::gate::{check_timestamp, header_str};
use crate::{
    InboundGate, InboundUpdate, ParsedCallback, Provider, VerificationError, VerificationStatus,
    DEFAULT_TIMESTAMP_TOLERANCE,
};

pub const TRANSMISSION_ID_HEADER: &str = "X-Transmission-Id";
pub const TRANSMISSION_TIME_HEADER: &str = "X-Transmission-Time";
pub const TRANSMISSION_SIG_HEADER: &str = "X-Transmission-Sig";

/// Payout item events arrive in bursts and are retried aggressively by the
/// processor, so sink failures for them are acknowledged.
const PAYOUT_ITEM_EVENT_PREFIX: &str = "PAYMENT.PAYOUTS-ITEM.";

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// Listener id assigned by the processor; part of the signed message
    pub webhook_id: String,
    pub secret: String,
    pub tolerance: Duration,
}

impl PaymentsConfig {
    pub fn new(webhook_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            secret: secret.into(),
            tolerance: DEFAULT_TIMESTAMP_TOLERANCE,
        }
    }
}

pub struct PaymentsGate {
    config: PaymentsConfig,
}

impl PaymentsGate {
    pub fn new(config: PaymentsConfig) -> Self {
        Self { config }
    }

    /// `{transmission_id}|{transmission_time}|{webhook_id}|{sha256(body)}`
    pub fn canonical_message(
        &self,
        transmission_id: &str,
        transmission_time: &str,
        raw_body: &[u8],
    ) -> String {
        format!(
            "{}|{}|{}|{}",
            transmission_id,
            transmission_time,
            self.config.webhook_id,
            signature::sha256_hex(raw_body)
        )
    }
}

#[derive(Deserialize)]
struct PayoutEvent {
    id: String,
    event_type: String,
    resource: PayoutResource,
}

#[derive(Deserialize)]
struct PayoutResource {
    payout_item_id: String,
    transaction_status: String,
    sender_item_id: Option<String>,
}

impl InboundGate for PaymentsGate {
    fn provider(&self) -> Provider {
        Provider::Payments
    }

    fn authenticate_at(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        let transmission_id = header_str(headers, TRANSMISSION_ID_HEADER)?;
        let transmission_time = header_str(headers, TRANSMISSION_TIME_HEADER)?;
        let transmission_sig = header_str(headers, TRANSMISSION_SIG_HEADER)?;

        let sent_at = DateTime::parse_from_rfc3339(transmission_time)
            .map_err(|e| VerificationError::MalformedHeader {
                header: TRANSMISSION_TIME_HEADER,
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);
        check_timestamp(sent_at, now, self.config.tolerance)?;

        let message = self.canonical_message(transmission_id, transmission_time, raw_body);
        if !signature::verify(
            self.config.secret.as_bytes(),
            message.as_bytes(),
            transmission_sig,
        ) {
            return Err(VerificationError::SignatureMismatch);
        }
        Ok(())
    }

    fn parse(&self, raw_body: &[u8]) -> Result<ParsedCallback, serde_json::Error> {
        let event: PayoutEvent = serde_json::from_slice(raw_body)?;
        debug!("Parsed payment event {} ({})", event.id, event.event_type);
        Ok(ParsedCallback {
            event_type: event.event_type,
            external_id: event.resource.payout_item_id,
            subject_id: event.resource.sender_item_id,
            vendor_status: event.resource.transaction_status,
        })
    }

    fn map_status(&self, vendor_status: &str) -> Option<VerificationStatus> {
        match vendor_status {
            "SUCCESS" => Some(VerificationStatus::Approved),
            "PENDING" | "UNCLAIMED" | "ONHOLD" | "NEW" => Some(VerificationStatus::Pending),
            "FAILED" | "RETURNED" | "BLOCKED" | "REFUNDED" | "REVERSED" | "DENIED" => {
                Some(VerificationStatus::Declined)
            }
            _ => None,
        }
    }

    fn acknowledges_malformed_payload(&self) -> bool {
        true
    }

    fn tolerates_sink_error(&self, update: &InboundUpdate) -> bool {
        update.event_type.starts_with(PAYOUT_ITEM_EVENT_PREFIX)
    }
}
