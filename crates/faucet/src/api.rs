//! HTTP API for faucet service

use crate::error::{FaucetError, FaucetResult};
use crate::rate_limit::{rate_limit, OriginRateLimiter};
use crate::service::{DripRequest, FaucetService, FaucetStatus};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FaucetService>,
    pub rate_limiter: Arc<OriginRateLimiter>,
    pub trust_proxy_headers: bool,
}

/// Drip request body
#[derive(Debug, Deserialize)]
pub struct DripBody {
    #[serde(default)]
    pub address: String,
}

/// Drip success body
#[derive(Debug, Serialize, Deserialize)]
pub struct DripResponse {
    pub success: bool,
    pub transaction: String,
}

pub fn router(state: AppState) -> Router {
    let drip = post(drip_handler).layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/drip", drip)
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Caller origin: the peer IP, or the first `X-Forwarded-For` hop when the
/// faucet sits behind a trusted proxy.
pub fn client_origin(headers: &HeaderMap, peer: SocketAddr, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.ip().to_string()
}

/// Drip handler
pub async fn drip_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<DripBody>, JsonRejection>,
) -> FaucetResult<Json<DripResponse>> {
    let address = match body {
        Ok(Json(body)) => body.address,
        Err(rejection) => {
            warn!("Rejected drip body from {}: {}", peer, rejection);
            String::new()
        }
    };
    let origin = client_origin(&headers, peer, state.trust_proxy_headers);
    let request = DripRequest::new(address, origin);

    // Runs detached so a disconnecting client cannot interrupt finalization.
    let service = state.service.clone();
    let receipt = tokio::spawn(async move { service.drip(request).await })
        .await
        .map_err(|e| FaucetError::InternalError(format!("drip task failed: {}", e)))??;

    Ok(Json(DripResponse {
        success: true,
        transaction: receipt.tx_hash,
    }))
}

/// Status handler
pub async fn status_handler(State(state): State<AppState>) -> FaucetResult<Json<FaucetStatus>> {
    let status = state.service.get_status().await?;
    Ok(Json(status))
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Prometheus metrics handler
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.metrics().render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainError;
    use crate::config::RateLimitSettings;
    use crate::address::Address;
    use crate::service::tests::{test_service, test_service_with_store, ADDR_X, ADDR_Y};
    use crate::store::{CooldownKey, CooldownStore};
    use crate::test_utils::{FailingOriginStore, MockChainClient};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router_for(service: Arc<FaucetService>, max_requests: u32) -> Router {
        router(AppState {
            service,
            rate_limiter: Arc::new(OriginRateLimiter::new(RateLimitSettings {
                max_requests,
                window: Duration::from_secs(60),
            })),
            trust_proxy_headers: false,
        })
    }

    async fn app_with(chain: Arc<MockChainClient>, max_requests: u32) -> Router {
        router_for(Arc::new(test_service(chain).await), max_requests)
    }

    async fn app(chain: Arc<MockChainClient>) -> Router {
        app_with(chain, 100).await
    }

    fn drip_request(body: &str, ip: &str) -> Request<Body> {
        let peer: SocketAddr = format!("{}:40000", ip).parse().unwrap();
        let mut request = Request::builder()
            .method("POST")
            .uri("/drip")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        request
    }

    fn address_body(address: &str) -> String {
        serde_json::json!({ "address": address }).to_string()
    }

    fn drip_for(address: &str, ip: &str) -> Request<Body> {
        drip_request(&address_body(address), ip)
    }

    async fn is_reserved(service: &FaucetService, key: CooldownKey) -> bool {
        service.store().time_remaining(&key).await.unwrap().is_some()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_drip_then_address_cooldown() {
        let app = app(Arc::new(MockChainClient::new())).await;

        let (status, body) = send(&app, drip_for(ADDR_X, "198.51.100.1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["transaction"].as_str().unwrap().starts_with("0x"));

        let (status, body) = send(&app, drip_for(ADDR_X, "198.51.100.2")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body["error"],
            "Address in cooldown. Please wait 48 hours between requests."
        );
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let app = app(Arc::new(MockChainClient::new())).await;

        let (status, body) = send(&app, drip_for("not-an-address", "198.51.100.1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid Ethereum address");

        let (status, _) = send(&app, drip_request("{}", "198.51.100.1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, drip_request("not json", "198.51.100.1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // nothing was reserved for the origin
        let (status, _) = send(&app, drip_for(ADDR_X, "198.51.100.1")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_simultaneous_requests_one_wins() {
        let chain = Arc::new(MockChainClient::new().with_send_delay(Duration::from_millis(20)));
        let app = app(chain).await;

        let (a, b) = tokio::join!(
            send(&app, drip_for(ADDR_X, "198.51.100.1")),
            send(&app, drip_for(ADDR_X, "198.51.100.2")),
        );
        let mut statuses = vec![a.0, b.0];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]);
    }

    #[tokio::test]
    async fn test_insufficient_funds_then_retry() {
        let chain = Arc::new(MockChainClient::new());
        let app = app(chain.clone()).await;
        chain.fail_next_send(ChainError::InsufficientFunds("insufficient funds".into()));

        let (status, body) = send(&app, drip_for(ADDR_X, "198.51.100.1")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Faucet is out of funds. Please try again later.");

        let (status, _) = send(&app, drip_for(ADDR_X, "198.51.100.1")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_network_failure_is_503() {
        let chain = Arc::new(MockChainClient::new());
        let app = app(chain.clone()).await;
        chain.fail_next_send(ChainError::Network("connection refused".into()));

        let (status, body) = send(&app, drip_for(ADDR_X, "198.51.100.1")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body["error"].as_str().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_ip_cooldown() {
        let app = app(Arc::new(MockChainClient::new())).await;

        let (status, _) = send(&app, drip_for(ADDR_X, "203.0.113.5")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, drip_for(ADDR_Y, "203.0.113.5")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "IP in cooldown. Please wait 48 hours between requests.");
    }

    #[tokio::test]
    async fn test_rate_limit_prefilter() {
        let app = app_with(Arc::new(MockChainClient::new()), 2).await;

        for _ in 0..2 {
            let (status, _) = send(&app, drip_for("bad", "192.0.2.9")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        let (status, body) = send(&app, drip_for("bad", "192.0.2.9")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Too many requests, please try again later.");
    }

    #[test]
    fn test_client_origin() {
        let peer: SocketAddr = "192.0.2.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.5, 10.0.0.1".parse().unwrap());

        assert_eq!(client_origin(&headers, peer, false), "192.0.2.1");
        assert_eq!(client_origin(&headers, peer, true), "203.0.113.5");
        assert_eq!(client_origin(&HeaderMap::new(), peer, true), "192.0.2.1");
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = app(Arc::new(MockChainClient::new())).await;
        send(&app, drip_for(ADDR_X, "198.51.100.1")).await;

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("faucet_drip_requests_total{outcome=\"success\"} 1"));
    }

    #[tokio::test]
    async fn test_store_failure_is_500_without_reservation() {
        let store = Arc::new(FailingOriginStore::new());
        let chain = Arc::new(MockChainClient::new());
        let service = test_service_with_store(chain, store.clone()).await;
        let app = router_for(Arc::new(service), 100);

        let (status, body) = send(&app, drip_for(ADDR_X, "198.51.100.1")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal error");

        let address = Address::parse(ADDR_X).unwrap();
        assert!(store
            .time_remaining(&CooldownKey::address(&address))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_disconnect_during_dispatch_still_finalizes() {
        let chain = Arc::new(MockChainClient::new().with_send_delay(Duration::from_millis(100)));
        chain.fail_next_send(ChainError::Network("connection reset".into()));
        let service = Arc::new(test_service(chain.clone()).await);
        let app = router_for(service.clone(), 100);
        let address_key = CooldownKey::address(&Address::parse(ADDR_X).unwrap());
        let origin_key = CooldownKey::origin("198.51.100.1");

        // the client gives up while the send is still in flight
        let dropped = tokio::time::timeout(
            Duration::from_millis(30),
            app.clone().oneshot(drip_for(ADDR_X, "198.51.100.1")),
        )
        .await;
        assert!(dropped.is_err());
        assert!(is_reserved(&service, address_key.clone()).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!is_reserved(&service, address_key).await);
        assert!(!is_reserved(&service, origin_key).await);

        // a successful drip committed after disconnect keeps its cooldown
        let dropped = tokio::time::timeout(
            Duration::from_millis(30),
            app.clone().oneshot(drip_for(ADDR_Y, "198.51.100.2")),
        )
        .await;
        assert!(dropped.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let committed = CooldownKey::address(&Address::parse(ADDR_Y).unwrap());
        assert!(is_reserved(&service, committed).await);
        assert_eq!(chain.accepted_nonces(), vec![0]);
    }
}
