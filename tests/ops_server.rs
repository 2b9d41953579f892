// Ops router integration tests: health, metrics and bucket introspection.

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::Router;
use http_body_util::BodyExt;
use quotagate::config::{Config, IntrospectionConfig};
use quotagate::rate_limit::{AdmissionGate, BucketRegistry, Category, RateLimitConfig};
use quotagate::server::{self, ops_router};
use std::sync::Arc;
use tower::ServiceExt;

fn setup(token: Option<&str>) -> (Router, AdmissionGate) {
    let registry = Arc::new(BucketRegistry::new(RateLimitConfig::default()));
    let introspection = IntrospectionConfig {
        enabled: true,
        token: token.map(str::to_string),
    };
    (
        ops_router(registry.clone(), &introspection),
        AdmissionGate::new(registry),
    )
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = setup(None);
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    quotagate::metrics::init().unwrap();
    let (app, gate) = setup(None);
    gate.admit("u1", Category::Auth);

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("quotagate_admissions_total"));
    // The gauge reflects the scraped registry, not every registry in the process.
    assert!(text.contains("quotagate_buckets_active 1"));
}

#[tokio::test]
async fn test_list_buckets() {
    let (app, gate) = setup(None);
    for _ in 0..4 {
        gate.admit("u1", Category::Auth);
    }
    gate.admit("10.0.0.5", Category::General);

    let response = app
        .oneshot(get("/internal/debug/ratelimit/buckets"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let buckets = json(response).await;
    assert_eq!(
        buckets,
        serde_json::json!([
            {"category": "GENERAL", "identifier": "10.0.0.5", "capacity": 100, "availableTokens": 99},
            {"category": "AUTH", "identifier": "u1", "capacity": 3, "availableTokens": 0},
        ])
    );
}

#[tokio::test]
async fn test_listing_empty_registry() {
    let (app, _) = setup(None);
    let response = app
        .oneshot(get("/internal/debug/ratelimit/buckets"))
        .await
        .unwrap();
    assert_eq!(json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn test_listing_does_not_consume() {
    let (app, gate) = setup(None);
    gate.admit("u1", Category::Write);

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(get("/internal/debug/ratelimit/buckets"))
            .await
            .unwrap();
        assert_eq!(json(response).await[0]["availableTokens"], 19);
    }
}

#[tokio::test]
async fn test_summary() {
    let (app, gate) = setup(None);
    for _ in 0..3 {
        gate.admit("u1", Category::Auth);
    }
    gate.admit("u2", Category::Auth);

    let response = app
        .oneshot(get("/internal/debug/ratelimit/summary"))
        .await
        .unwrap();
    let summary = json(response).await;
    assert_eq!(summary["totalBuckets"], 2);
    assert_eq!(summary["exhaustedBuckets"], 1);
}

#[tokio::test]
async fn test_token_required_when_configured() {
    let (app, _) = setup(Some("ops-secret"));

    let response = app
        .clone()
        .oneshot(get("/internal/debug/ratelimit/buckets"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(response).await["statusCode"], 401);

    let wrong = Request::builder()
        .uri("/internal/debug/ratelimit/buckets")
        .header("authorization", "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(wrong).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let right = Request::builder()
        .uri("/internal/debug/ratelimit/buckets")
        .header("authorization", "Bearer ops-secret")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(right).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_introspection_can_be_disabled() {
    let registry = Arc::new(BucketRegistry::new(RateLimitConfig::default()));
    let introspection = IntrospectionConfig {
        enabled: false,
        token: None,
    };
    let app = ops_router(registry, &introspection);

    let response = app
        .oneshot(get("/internal/debug/ratelimit/buckets"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_served_requests_show_up_in_listing() {
    let registry = Arc::new(BucketRegistry::new(RateLimitConfig::default()));
    let app = server::router(&Config::default(), registry).unwrap();

    for expected in ["2", "1"] {
        let login = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(login).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-rate-limit-remaining"], expected);

        let body = json(response).await;
        assert_eq!(body["admitted"], true);
        assert_eq!(body["route"], "/api/auth/login");
    }

    let response = app
        .oneshot(get("/internal/debug/ratelimit/buckets"))
        .await
        .unwrap();
    assert_eq!(
        json(response).await,
        serde_json::json!([
            {"category": "AUTH", "identifier": "203.0.113.7", "capacity": 3, "availableTokens": 1},
        ])
    );
}

#[tokio::test]
async fn test_ops_endpoints_are_not_rate_limited() {
    let registry = Arc::new(BucketRegistry::new(RateLimitConfig::default()));
    let app = server::router(&Config::default(), registry.clone()).unwrap();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-rate-limit-limit").is_none());
    assert!(registry.is_empty());
}
