//! Outbound HTTP for a single delivery attempt.

use consentry_core::{signature, truncate_chars};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::{Delivery, Endpoint, WebhookConfig, WebhookError};

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Id";
pub const EVENT_HEADER: &str = "X-Webhook-Event";

/// What happened on the wire for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub success: bool,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
}

pub struct DeliverySender {
    http_client: reqwest::Client,
    request_timeout: std::time::Duration,
    response_body_limit: usize,
}

impl DeliverySender {
    pub fn new(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http_client,
            request_timeout: config.request_timeout,
            response_body_limit: config.response_body_limit,
        })
    }

    /// Sign the stored payload with the endpoint's secret and POST it.
    ///
    /// Never fails: transport errors and non-2xx responses are folded into
    /// the returned outcome.
    pub async fn send(&self, endpoint: &Endpoint, delivery: &Delivery) -> AttemptOutcome {
        let signature = signature::sign(endpoint.secret.as_bytes(), delivery.payload.as_bytes());

        let response = self
            .http_client
            .post(&endpoint.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(DELIVERY_ID_HEADER, delivery.id.to_string())
            .header(EVENT_HEADER, delivery.event_type.as_str())
            .body(delivery.payload.clone())
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                let body = resp
                    .text()
                    .await
                    .ok()
                    .map(|text| truncate_chars(&text, self.response_body_limit));

                if status.is_success() {
                    debug!(
                        "Delivery {} accepted by endpoint {} with {}",
                        delivery.id, endpoint.id, status
                    );
                    AttemptOutcome {
                        success: true,
                        response_status: Some(status.as_u16()),
                        response_body: body,
                        error_message: None,
                    }
                } else {
                    warn!(
                        "Delivery {} rejected by endpoint {} ({}) with {}",
                        delivery.id, endpoint.id, endpoint.url, status
                    );
                    AttemptOutcome {
                        success: false,
                        response_status: Some(status.as_u16()),
                        response_body: body,
                        error_message: Some(format!(
                            "endpoint responded with HTTP {}",
                            status.as_u16()
                        )),
                    }
                }
            }
            Err(e) => {
                let message = if e.is_timeout() {
                    format!(
                        "request timed out after {}s",
                        self.request_timeout.as_secs_f32()
                    )
                } else {
                    format!("request failed: {}", e)
                };
                warn!(
                    "Delivery {} to endpoint {} ({}) failed: {}",
                    delivery.id, endpoint.id, endpoint.url, message
                );
                AttemptOutcome {
                    success: false,
                    response_status: None,
                    response_body: None,
                    error_message: Some(message),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use consentry_entities::DeliveryStatus;
    use std::time::Duration;
    use wiremock::matchers::{body_string, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(url: String) -> Endpoint {
        let now = Utc::now();
        Endpoint {
            id: 3,
            url,
            secret: "whsec_sender".to_string(),
            events: r#"["bounty.created"]"#.to_string(),
            is_active: true,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn delivery(payload: &str) -> Delivery {
        let now = Utc::now();
        Delivery {
            id: 17,
            endpoint_id: 3,
            event_type: "bounty.created".to_string(),
            payload: payload.to_string(),
            status: DeliveryStatus::Pending,
            response_status: None,
            response_body: None,
            error_message: None,
            attempts: 0,
            delivered_at: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_send_signs_exact_payload() {
        let server = MockServer::start().await;
        let payload = r#"{"event":"bounty.created","data":{"id":1},"timestamp":"2026-03-01T12:00:00Z"}"#;
        let expected = signature::sign(b"whsec_sender", payload.as_bytes());

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(header("x-webhook-signature", expected.as_str()))
            .and(header("x-webhook-id", "17"))
            .and(header("x-webhook-event", "bounty.created"))
            .and(header("user-agent", "Consentry-Webhook/1.0"))
            .and(body_string(payload))
            .respond_with(ResponseTemplate::new(200).set_body_string("thanks"))
            .expect(1)
            .mount(&server)
            .await;

        let sender = DeliverySender::new(&WebhookConfig::default()).unwrap();
        let outcome = sender
            .send(&endpoint(format!("{}/hook", server.uri())), &delivery(payload))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.response_status, Some(200));
        assert_eq!(outcome.response_body.as_deref(), Some("thanks"));
        assert!(outcome.error_message.is_none());
    }

    #[tokio::test]
    async fn test_send_truncates_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("x-webhook-signature"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(5000)))
            .mount(&server)
            .await;

        let sender = DeliverySender::new(&WebhookConfig::default()).unwrap();
        let outcome = sender.send(&endpoint(server.uri()), &delivery("{}")).await;

        assert!(!outcome.success);
        assert_eq!(outcome.response_status, Some(500));
        assert_eq!(outcome.response_body.map(|b| b.chars().count()), Some(2048));
        assert_eq!(
            outcome.error_message.as_deref(),
            Some("endpoint responded with HTTP 500")
        );
    }

    #[tokio::test]
    async fn test_send_does_not_follow_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(307).insert_header("location", "https://elsewhere.invalid/"),
            )
            .mount(&server)
            .await;

        let sender = DeliverySender::new(&WebhookConfig::default()).unwrap();
        let outcome = sender.send(&endpoint(server.uri()), &delivery("{}")).await;

        assert!(!outcome.success);
        assert_eq!(outcome.response_status, Some(307));
    }

    #[tokio::test]
    async fn test_send_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let config = WebhookConfig {
            request_timeout: Duration::from_millis(100),
            ..WebhookConfig::default()
        };
        let sender = DeliverySender::new(&config).unwrap();
        let outcome = sender.send(&endpoint(server.uri()), &delivery("{}")).await;

        assert!(!outcome.success);
        assert!(outcome.response_status.is_none());
        assert!(outcome
            .error_message
            .unwrap()
            .starts_with("request timed out"));
    }
}
