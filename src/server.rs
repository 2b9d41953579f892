// HTTP server
//
// Serves the gated routes of the route table on a passthrough handler, next
// to the operator endpoints:
// - /health
// - /metrics (Prometheus text format)
// - /internal/debug/ratelimit/buckets and /summary (bucket introspection)
//
// Also runs the idle bucket sweeper when one is configured.

use anyhow::{Context, Result};
use axum::{
    extract::{MatchedPath, Request, State},
    http::{header::AUTHORIZATION, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, MethodFilter, MethodRouter},
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{Config, IntrospectionConfig};
use crate::http::{self, RateLimitState, RouteTable};
use crate::metrics;
use crate::rate_limit::{AdmissionGate, BucketRegistry, BucketView, Inspector, InspectorSummary};

/// Mount point of the introspection routes
pub const INTROSPECTION_PATH: &str = "/internal/debug/ratelimit";

/// Paths owned by the operator endpoints
const RESERVED_PATHS: [&str; 2] = ["/health", "/metrics"];

/// Shortest pause between idle sweeps
const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct OpsState {
    inspector: Inspector,
    token: Option<Arc<str>>,
}

/// Rejection for introspection requests without the operator token
#[derive(Debug, thiserror::Error)]
#[error("Operator token required")]
pub struct InspectorAccessError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    message: String,
}

impl IntoResponse for InspectorAccessError {
    fn into_response(self) -> Response {
        let status = StatusCode::UNAUTHORIZED;
        let body = ErrorBody {
            status_code: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the operator router: health, metrics and bucket introspection
pub fn ops_router(registry: Arc<BucketRegistry>, introspection: &IntrospectionConfig) -> Router {
    let mut app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry.clone())
        .route("/health", get(health_handler));

    if introspection.enabled {
        let state = OpsState {
            inspector: Inspector::new(registry),
            token: introspection.token.as_deref().map(Arc::from),
        };

        let debug = Router::new()
            .route("/buckets", get(list_buckets_handler))
            .route("/summary", get(summary_handler))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                require_operator,
            ))
            .with_state(state);

        app = app.nest(INTROSPECTION_PATH, debug);
    }

    app
}

/// Route every entry of `routes` to a handler that only reports admission
///
/// Entries that clash with the operator endpoints, or whose method axum
/// cannot route, are skipped with a warning.
pub fn passthrough_router(routes: &RouteTable) -> Router {
    let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();

    for (method, path, _) in routes.entries() {
        if !path.starts_with('/')
            || RESERVED_PATHS.contains(&path.as_str())
            || path.starts_with(INTROSPECTION_PATH)
        {
            warn!("Skipping route {} {}: path is reserved or invalid", method, path);
            continue;
        }
        let Ok(filter) = MethodFilter::try_from(method.clone()) else {
            warn!("Skipping route {} {}: method cannot be routed", method, path);
            continue;
        };

        let method_router = by_path
            .remove(&path)
            .unwrap_or_else(MethodRouter::new)
            .on(filter, admitted_handler);
        by_path.insert(path, method_router);
    }

    by_path
        .into_iter()
        .fold(Router::new(), |router, (path, method_router)| {
            router.route(&path, method_router)
        })
}

/// Full server router: gated passthrough routes plus the operator endpoints,
/// all sharing `registry`
///
/// # Errors
///
/// Fails if the configured route table is invalid.
pub fn router(config: &Config, registry: Arc<BucketRegistry>) -> Result<Router> {
    let routes = config.route_table()?;
    let app = passthrough_router(&routes);
    let state = RateLimitState::new(AdmissionGate::new(registry.clone()), routes);

    Ok(ops_router(registry, &config.introspection)
        .merge(http::gated(app, state))
        .layer(TraceLayer::new_for_http()))
}

/// Start the server and run until Ctrl-C
///
/// # Errors
///
/// Fails if metrics cannot be registered, the route table is invalid or the
/// address cannot be bound.
pub async fn start_server(config: &Config, registry: Arc<BucketRegistry>) -> Result<()> {
    metrics::init().context("Failed to initialize metrics")?;

    if config.introspection.enabled && config.introspection.token.is_none() {
        warn!(
            "Bucket introspection at {} is served without authentication; set introspection.token to restrict it",
            INTROSPECTION_PATH
        );
    }

    let app = router(config, registry.clone())?;
    let addr = config.socket_addr()?;

    let sweeper = config
        .rate_limit
        .idle_eviction()
        .map(|max_idle| spawn_idle_sweeper(registry, max_idle));

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", addr))?;

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error");

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    served
}

/// Periodically remove buckets idle for at least `max_idle`
pub fn spawn_idle_sweeper(registry: Arc<BucketRegistry>, max_idle: Duration) -> JoinHandle<()> {
    let period = (max_idle / 2).max(MIN_SWEEP_PERIOD);
    info!(
        "Idle bucket sweeper running every {:?} (max idle {:?})",
        period, max_idle
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.evict_idle(max_idle);
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down server");
}

async fn require_operator(
    State(state): State<OpsState>,
    request: Request,
    next: Next,
) -> Result<Response, InspectorAccessError> {
    if let Some(token) = &state.token {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        if presented != Some(token.as_ref()) {
            warn!("Rejected introspection request without a valid operator token");
            return Err(InspectorAccessError);
        }
    }

    Ok(next.run(request).await)
}

async fn list_buckets_handler(State(state): State<OpsState>) -> Json<Vec<BucketView>> {
    Json(state.inspector.list_buckets())
}

async fn summary_handler(State(state): State<OpsState>) -> Json<InspectorSummary> {
    Json(state.inspector.summary())
}

#[derive(Serialize)]
struct Admitted<'a> {
    admitted: bool,
    method: &'a str,
    route: &'a str,
}

async fn admitted_handler(method: Method, route: MatchedPath) -> Response {
    Json(Admitted {
        admitted: true,
        method: method.as_str(),
        route: route.as_str(),
    })
    .into_response()
}

/// Metrics endpoint handler
async fn metrics_handler(State(registry): State<Arc<BucketRegistry>>) -> Response {
    metrics::BUCKETS_ACTIVE.set(registry.len() as i64);

    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{ManualClock, RateLimitConfig};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_idle_buckets() {
        let clock = Arc::new(ManualClock::new());
        let registry = Arc::new(BucketRegistry::with_clock(
            RateLimitConfig::default(),
            clock.clone(),
        ));
        let key = crate::rate_limit::BucketKey::new(crate::rate_limit::Category::Auth, "u1");
        registry.resolve(&key).try_consume(1);

        let sweeper = spawn_idle_sweeper(registry.clone(), Duration::from_secs(120));

        clock.advance(Duration::from_secs(121));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(registry.get(&key).is_none());
        sweeper.abort();
    }

    #[test]
    fn test_passthrough_skips_reserved_paths() {
        let routes = RouteTable::new()
            .gate(Method::GET, "/health", crate::rate_limit::Category::General)
            .gate(Method::GET, "/api/menu", crate::rate_limit::Category::General)
            .gate(Method::POST, "/api/menu", crate::rate_limit::Category::Upload);

        // Merging would panic if /health had been routed twice.
        let registry = Arc::new(BucketRegistry::new(RateLimitConfig::default()));
        let _ = ops_router(registry, &IntrospectionConfig::default())
            .merge(passthrough_router(&routes));
    }

    #[test]
    fn test_router_builds_from_default_routes() {
        let registry = Arc::new(BucketRegistry::new(RateLimitConfig::default()));
        assert!(router(&Config::default(), registry).is_ok());
    }
}
