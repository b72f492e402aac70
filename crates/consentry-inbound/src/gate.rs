//! The per-provider verification contract.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{Provider, VerificationError, VerificationStatus};

/// Fields every provider payload is reduced to after parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCallback {
    pub event_type: String,
    /// The provider's own id for the object that changed
    pub external_id: String,
    /// Internal id the provider echoes back (earning or contributor id)
    pub subject_id: Option<String>,
    pub vendor_status: String,
}

/// A verified, mapped callback handed to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundUpdate {
    pub provider: Provider,
    pub event_type: String,
    pub external_id: String,
    pub subject_id: Option<String>,
    pub vendor_status: String,
    pub status: VerificationStatus,
}

impl InboundUpdate {
    pub fn new(provider: Provider, callback: ParsedCallback, status: VerificationStatus) -> Self {
        Self {
            provider,
            event_type: callback.event_type,
            external_id: callback.external_id,
            subject_id: callback.subject_id,
            vendor_status: callback.vendor_status,
            status,
        }
    }
}

/// Authentication and interpretation of one provider's callbacks.
///
/// Implementations must check the signature over `raw_body` exactly as
/// received. Nothing in the body may be read before `authenticate` passes.
pub trait InboundGate: Send + Sync {
    fn provider(&self) -> Provider;

    /// Verify the callback as of `now`.
    fn authenticate_at(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationError>;

    fn authenticate(&self, raw_body: &[u8], headers: &HeaderMap) -> Result<(), VerificationError> {
        self.authenticate_at(raw_body, headers, Utc::now())
    }

    /// Any verification error counts as a failed check.
    fn verify(&self, raw_body: &[u8], headers: &HeaderMap) -> bool {
        self.authenticate(raw_body, headers).is_ok()
    }

    fn parse(&self, raw_body: &[u8]) -> Result<ParsedCallback, serde_json::Error>;

    /// `None` for vendor statuses with no defined mapping.
    fn map_status(&self, vendor_status: &str) -> Option<VerificationStatus>;

    /// Whether a verified but unparsable body is still acknowledged with 200.
    fn acknowledges_malformed_payload(&self) -> bool {
        false
    }

    /// Whether a sink failure for this update is logged and acknowledged
    /// instead of returned as 500.
    fn tolerates_sink_error(&self, _update: &InboundUpdate) -> bool {
        false
    }
}

/// Read a header as UTF-8 text.
pub(crate) fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<&'a str, VerificationError> {
    let value = headers
        .get(name)
        .ok_or(VerificationError::MissingHeader(name))?;
    value
        .to_str()
        .map(str::trim)
        .map_err(|_| VerificationError::MalformedHeader {
            header: name,
            reason: "not valid ASCII".to_string(),
        })
}

/// Reject timestamps further than `tolerance` from `now` in either direction.
pub(crate) fn check_timestamp(
    signed_at: DateTime<Utc>,
    now: DateTime<Utc>,
    tolerance: std::time::Duration,
) -> Result<(), VerificationError> {
    let age_secs = (now - signed_at).num_seconds();
    if age_secs.unsigned_abs() > tolerance.as_secs() {
        return Err(VerificationError::StaleTimestamp { age_secs });
    }
    Ok(())
}
