use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use consentry_core::signature;
use serde::Deserialize;
use std::time::Duration;

use crate::gate::{check_timestamp, header_str};
use crate::{
    InboundGate, ParsedCallback, Provider, VerificationError, VerificationStatus,
    DEFAULT_TIMESTAMP_TOLERANCE,
};

pub const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub secret: String,
    pub tolerance: Duration,
}

impl LivenessConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance: DEFAULT_TIMESTAMP_TOLERANCE,
        }
    }
}

pub struct LivenessGate {
    config: LivenessConfig,
}

/// Parsed `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`
#[derive(Debug, PartialEq, Eq)]
struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_signature_header(value: &str) -> Result<SignatureHeader<'_>, VerificationError> {
    let malformed = |reason: &str| VerificationError::MalformedHeader {
        header: SIGNATURE_HEADER,
        reason: reason.to_string(),
    };

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in value.split(',').map(str::trim) {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t.parse::<i64>().map_err(|_| malformed("invalid timestamp"))?);
        } else if let Some(sig) = part.strip_prefix("v1=") {
            signatures.push(sig);
        }
    }

    let timestamp = timestamp.ok_or_else(|| malformed("missing t="))?;
    if signatures.is_empty() {
        return Err(malformed("missing v1="));
    }
    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

impl LivenessGate {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config }
    }

    /// `{t}.` followed by the raw body bytes
    pub fn signed_message(timestamp: i64, raw_body: &[u8]) -> Vec<u8> {
        let mut message = format!("{}.", timestamp).into_bytes();
        message.extend_from_slice(raw_body);
        message
    }
}

#[derive(Deserialize)]
struct SessionEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: SessionData,
}

#[derive(Deserialize)]
struct SessionData {
    id: String,
    status: String,
    reference_id: Option<String>,
}

impl InboundGate for LivenessGate {
    fn provider(&self) -> Provider {
        Provider::Liveness
    }

    fn authenticate_at(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        let header = parse_signature_header(header_str(headers, SIGNATURE_HEADER)?)?;

        let signed_at = DateTime::from_timestamp(header.timestamp, 0).ok_or_else(|| {
            VerificationError::MalformedHeader {
                header: SIGNATURE_HEADER,
                reason: "timestamp out of range".to_string(),
            }
        })?;
        check_timestamp(signed_at, now, self.config.tolerance)?;

        let message = Self::signed_message(header.timestamp, raw_body);
        // Several v1 entries are sent while the vendor rotates secrets
        let matched = header
            .signatures
            .iter()
            .any(|sig| signature::verify(self.config.secret.as_bytes(), &message, sig));
        if !matched {
            return Err(VerificationError::SignatureMismatch);
        }
        Ok(())
    }

    fn parse(&self, raw_body: &[u8]) -> Result<ParsedCallback, serde_json::Error> {
        let event: SessionEvent = serde_json::from_slice(raw_body)?;
        Ok(ParsedCallback {
            event_type: event.event_type,
            external_id: event.data.id,
            subject_id: event.data.reference_id,
            vendor_status: event.data.status,
        })
    }

    fn map_status(&self, vendor_status: &str) -> Option<VerificationStatus> {
        match vendor_status {
            "approved" | "completed" => Some(VerificationStatus::Approved),
            "created" | "pending" | "needs_review" => Some(VerificationStatus::Pending),
            "declined" | "failed" | "expired" => Some(VerificationStatus::Declined),
            _ => None,
        }
    }
}
