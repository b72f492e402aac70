//! axum middleware that answers 429 once a client exhausts its window.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use consentry_core::error_builder::too_many_requests;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{RateLimitDecision, RateLimiter};

/// Identify the caller by its peer address. When the peer is one of
/// `trusted_proxies`, the first hop of `X-Forwarded-For` is used instead.
pub fn client_key(request: &Request<Body>, trusted_proxies: &[IpAddr]) -> Option<String> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())?;

    if !trusted_proxies.contains(&peer) {
        return Some(peer.to_string());
    }

    let forwarded = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
    Some(forwarded.unwrap_or(peer).to_string())
}

/// Use with `axum::middleware::from_fn_with_state(limiter, rate_limit_middleware)`.
///
/// Requests with no identifiable client, and requests arriving while the
/// counter store is unavailable, are let through.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = client_key(&request, &limiter.config().trusted_proxies) else {
        warn!("Cannot determine client address for rate limiting, allowing request");
        return next.run(request).await;
    };

    match limiter.check(&key).await {
        Ok(RateLimitDecision::Allowed { remaining }) => {
            let mut response = next.run(request).await;
            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                response.headers_mut().insert("x-ratelimit-remaining", value);
            }
            response
        }
        Ok(RateLimitDecision::Rejected { retry_after }) => {
            debug!("Rate limit exceeded for {}", key);
            let retry_after_secs = retry_after.as_secs().max(1);
            let mut response = too_many_requests(retry_after).build().into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
        Err(e) => {
            warn!("Rate limit check failed for {}, allowing request: {}", key, e);
            next.run(request).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RateLimitConfig;
    use axum::{http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    const PROXY: [u8; 4] = [10, 0, 0, 1];

    fn app(limit: u32) -> Router {
        let limiter = Arc::new(RateLimiter::in_memory(RateLimitConfig {
            limit,
            trusted_proxies: vec![IpAddr::from(PROXY)],
            ..RateLimitConfig::default()
        }));
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(
                limiter,
                rate_limit_middleware,
            ))
    }

    fn request(peer: Option<[u8; 4]>, forwarded_for: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/ping");
        if let Some(value) = forwarded_for {
            builder = builder.header("X-Forwarded-For", value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(ip) = peer {
            req.extensions_mut()
                .insert(ConnectInfo(SocketAddr::from((ip, 4000))));
        }
        req
    }

    #[test]
    fn test_client_key() {
        let trusted = [IpAddr::from(PROXY)];

        // Forwarded header from a trusted proxy names the client
        let req = request(Some(PROXY), Some("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_key(&req, &trusted).as_deref(), Some("203.0.113.7"));

        // Unparseable header falls back to the proxy itself
        let req = request(Some(PROXY), Some("not-an-ip"));
        assert_eq!(client_key(&req, &trusted).as_deref(), Some("10.0.0.1"));

        // Anyone else cannot choose their key
        let req = request(Some([192, 0, 2, 1]), Some("203.0.113.7"));
        assert_eq!(client_key(&req, &trusted).as_deref(), Some("192.0.2.1"));
        assert_eq!(client_key(&req, &[]).as_deref(), Some("192.0.2.1"));

        // Without a peer address there is nothing to trust
        assert_eq!(client_key(&request(None, Some("203.0.113.7")), &trusted), None);
        assert_eq!(client_key(&request(None, None), &trusted), None);
    }

    #[tokio::test]
    async fn test_returns_429_with_retry_after() {
        let app = app(2);

        for remaining in ["1", "0"] {
            let response = app
                .clone()
                .oneshot(request(Some(PROXY), Some("198.51.100.4")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
        }

        let response = app
            .clone()
            .oneshot(request(Some(PROXY), Some("198.51.100.4")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));

        // Another client behind the same proxy is unaffected
        let response = app
            .oneshot(request(Some(PROXY), Some("198.51.100.5")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rotating_forwarded_for_from_untrusted_peer_is_limited() {
        let app = app(1);

        let mut statuses = Vec::new();
        for last_octet in 0..5 {
            let spoofed = format!("203.0.113.{}", last_octet);
            let response = app
                .clone()
                .oneshot(request(Some([192, 0, 2, 1]), Some(&spoofed)))
                .await
                .unwrap();
            statuses.push(response.status());
        }

        assert_eq!(statuses[0], StatusCode::OK);
        assert!(statuses[1..]
            .iter()
            .all(|status| *status == StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_unidentified_client_is_allowed() {
        let app = app(0);
        let response = app.oneshot(request(None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
