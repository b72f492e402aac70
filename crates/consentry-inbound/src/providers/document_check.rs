use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use consentry_core::signature;
use serde::Deserialize;

use crate::gate::header_str;
use crate::{InboundGate, ParsedCallback, Provider, VerificationError, VerificationStatus};

pub const SIGNATURE_HEADER: &str = "X-Hmac-Signature";
pub const AUTH_CLIENT_HEADER: &str = "X-Auth-Client";

#[derive(Debug, Clone)]
pub struct DocumentCheckConfig {
    /// Integration id the vendor sends back in `X-Auth-Client`
    pub client_id: String,
    pub secret: String,
}

pub struct DocumentCheckGate {
    config: DocumentCheckConfig,
}

impl DocumentCheckGate {
    pub fn new(config: DocumentCheckConfig) -> Self {
        Self { config }
    }
}

#[derive(Deserialize)]
struct DecisionEvent {
    status: Option<String>,
    verification: Verification,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Verification {
    id: String,
    status: String,
    vendor_data: Option<String>,
}

impl InboundGate for DocumentCheckGate {
    fn provider(&self) -> Provider {
        Provider::DocumentCheck
    }

    // The vendor signs the body only, so there is no timestamp to check.
    fn authenticate_at(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        _now: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        let client = header_str(headers, AUTH_CLIENT_HEADER)?;
        let presented = header_str(headers, SIGNATURE_HEADER)?;

        if !signature::constant_time_eq(client.as_bytes(), self.config.client_id.as_bytes()) {
            return Err(VerificationError::ClientMismatch);
        }
        if !signature::verify(self.config.secret.as_bytes(), raw_body, presented) {
            return Err(VerificationError::SignatureMismatch);
        }
        Ok(())
    }

    fn parse(&self, raw_body: &[u8]) -> Result<ParsedCallback, serde_json::Error> {
        let event: DecisionEvent = serde_json::from_slice(raw_body)?;
        Ok(ParsedCallback {
            event_type: event.status.unwrap_or_else(|| "decision".to_string()),
            external_id: event.verification.id,
            subject_id: event.verification.vendor_data,
            vendor_status: event.verification.status,
        })
    }

    fn map_status(&self, vendor_status: &str) -> Option<VerificationStatus> {
        match vendor_status {
            "approved" => Some(VerificationStatus::Approved),
            "submitted" | "resubmission_requested" | "review" => Some(VerificationStatus::Pending),
            "declined" | "expired" | "abandoned" => Some(VerificationStatus::Declined),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const BODY: &str = r#"{"status":"success","verification":{"id":"v-1","status":"declined","vendorData":"contributor-5"}}"#;

    fn gate() -> DocumentCheckGate {
        DocumentCheckGate::new(DocumentCheckConfig {
            client_id: "client-abc".to_string(),
            secret: "doc_secret".to_string(),
        })
    }

    fn signed_headers(body: &[u8]) -> HeaderMap {
        let sig = signature::sign(b"doc_secret", body);
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_CLIENT_HEADER, HeaderValue::from_static("client-abc"));
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&sig).unwrap());
        headers
    }

    #[test]
    fn test_valid_signature() {
        let headers = signed_headers(BODY.as_bytes());
        assert!(gate().verify(BODY.as_bytes(), &headers));
    }

    #[test]
    fn test_signature_over_reserialized_body_fails() {
        let headers = signed_headers(BODY.as_bytes());
        let value: serde_json::Value = serde_json::from_str(BODY).unwrap();
        let reencoded = serde_json::to_vec_pretty(&value).unwrap();
        assert_eq!(
            gate().authenticate(&reencoded, &headers),
            Err(VerificationError::SignatureMismatch)
        );
    }

    #[test]
    fn test_wrong_client_rejected() {
        let mut headers = signed_headers(BODY.as_bytes());
        headers.insert(AUTH_CLIENT_HEADER, HeaderValue::from_static("client-xyz"));
        assert_eq!(
            gate().authenticate(BODY.as_bytes(), &headers),
            Err(VerificationError::ClientMismatch)
        );
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let mut headers = signed_headers(BODY.as_bytes());
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("not-hex"));
        assert!(!gate().verify(BODY.as_bytes(), &headers));
    }

    #[test]
    fn test_parse_and_map() {
        let callback = gate().parse(BODY.as_bytes()).unwrap();
        assert_eq!(callback.event_type, "success");
        assert_eq!(callback.external_id, "v-1");
        assert_eq!(callback.subject_id.as_deref(), Some("contributor-5"));
        assert_eq!(
            gate().map_status(&callback.vendor_status),
            Some(VerificationStatus::Declined)
        );
        assert_eq!(
            gate().map_status("resubmission_requested"),
            Some(VerificationStatus::Pending)
        );
        assert_eq!(gate().map_status("approved"), Some(VerificationStatus::Approved));
        assert_eq!(gate().map_status("Approved"), None);
    }
}
