//! HTTP adapter for admission control
//!
//! Routes opt in to rate limiting through a [`RouteTable`] built at startup.
//! The middleware looks up the matched route, resolves the caller's
//! identifier, asks the [`AdmissionGate`] for a decision and writes the
//! `X-Rate-Limit-*` headers on every gated response.

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{Extensions, HeaderMap, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::rate_limit::{AdmissionGate, AdmissionResult, Category};

pub const LIMIT_HEADER: &str = "x-rate-limit-limit";
pub const REMAINING_HEADER: &str = "x-rate-limit-remaining";
pub const RESET_HEADER: &str = "x-rate-limit-reset";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Identifier used when a request carries no principal and no address
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Authenticated caller, inserted into request extensions by the auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// One route classification entry, as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// HTTP method, e.g. `POST`
    pub method: String,

    /// axum route pattern, e.g. `/api/menu/{id}`
    pub path: String,

    /// Quota tier for the route
    pub category: Category,
}

/// Mapping from `(method, route pattern)` to category
///
/// Routes absent from the table are not rate limited.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<(Method, String), Category>,
}

impl RouteTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route (builder style)
    pub fn gate(mut self, method: Method, path: impl Into<String>, category: Category) -> Self {
        self.insert(method, path, category);
        self
    }

    /// Add or replace a route
    pub fn insert(&mut self, method: Method, path: impl Into<String>, category: Category) {
        self.routes.insert((method, path.into()), category);
    }

    /// Build a table from configuration rules
    ///
    /// # Errors
    ///
    /// Returns an error if a rule names an invalid HTTP method.
    pub fn from_rules(rules: &[RouteRule]) -> anyhow::Result<Self> {
        let mut table = Self::new();
        for rule in rules {
            let method = Method::from_bytes(rule.method.to_uppercase().as_bytes())
                .map_err(|e| anyhow::anyhow!("Invalid method {:?} for {}: {}", rule.method, rule.path, e))?;
            table.insert(method, rule.path.clone(), rule.category);
        }
        Ok(table)
    }

    /// Route classification of the food delivery API
    pub fn food_delivery_defaults() -> Self {
        Self::new()
            // Authentication
            .gate(Method::POST, "/api/auth/register", Category::Auth)
            .gate(Method::POST, "/api/auth/login", Category::Auth)
            // Users
            .gate(Method::GET, "/api/users/all", Category::Admin)
            .gate(Method::PUT, "/api/users/update", Category::Upload)
            .gate(Method::DELETE, "/api/users/deactivate", Category::Write)
            .gate(Method::GET, "/api/users/account", Category::General)
            // Categories
            .gate(Method::POST, "/api/categories", Category::Write)
            .gate(Method::PUT, "/api/categories", Category::Write)
            .gate(Method::GET, "/api/categories/{id}", Category::General)
            .gate(Method::GET, "/api/categories/all", Category::General)
            .gate(Method::DELETE, "/api/categories/{id}", Category::Write)
            // Menu
            .gate(Method::POST, "/api/menu", Category::Upload)
            .gate(Method::PUT, "/api/menu", Category::Upload)
            .gate(Method::GET, "/api/menu/{id}", Category::General)
            .gate(Method::DELETE, "/api/menu/{id}", Category::Write)
            .gate(Method::GET, "/api/menu", Category::General)
            // Payments
            .gate(Method::POST, "/api/payments/pay", Category::Auth)
            .gate(Method::PUT, "/api/payments/update", Category::Write)
            .gate(Method::GET, "/api/payments/all", Category::Admin)
            .gate(Method::GET, "/api/payments/{paymentId}", Category::General)
            // Reviews
            .gate(Method::POST, "/api/reviews", Category::Write)
            .gate(Method::GET, "/api/reviews/menu-item/{menuId}", Category::General)
            .gate(Method::GET, "/api/reviews/menu-item/average/{menuId}", Category::General)
    }

    /// Category for a route, if it is gated
    pub fn category_for(&self, method: &Method, path: &str) -> Option<Category> {
        self.routes.get(&(method.clone(), path.to_string())).copied()
    }

    /// Entries sorted by path then method, for display
    pub fn entries(&self) -> Vec<(Method, String, Category)> {
        let mut entries: Vec<_> = self
            .routes
            .iter()
            .map(|((method, path), category)| (method.clone(), path.clone(), *category))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        entries
    }

    /// Number of gated routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is gated
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// State shared by the rate limit middleware
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub gate: AdmissionGate,
    pub routes: Arc<RouteTable>,
}

impl RateLimitState {
    pub fn new(gate: AdmissionGate, routes: RouteTable) -> Self {
        Self {
            gate,
            routes: Arc::new(routes),
        }
    }
}

/// Apply rate limiting to every gated route of `router`
///
/// Uses `route_layer` so the matched route pattern is known to the
/// middleware; requests that match no route are never counted.
pub fn gated<S>(router: Router<S>, state: RateLimitState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(axum::middleware::from_fn_with_state(
        state,
        rate_limit_middleware,
    ))
}

/// Pick the identifier a request is limited under
///
/// Order: authenticated principal, first `X-Forwarded-For` entry, peer
/// address, then [`UNKNOWN_IDENTIFIER`].
pub fn resolve_identifier(headers: &HeaderMap, extensions: &Extensions) -> String {
    if let Some(Principal(name)) = extensions.get::<Principal>() {
        if !name.is_empty() {
            return name.clone();
        }
    }

    let forwarded = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|client| !client.is_empty());
    if let Some(client) = forwarded {
        return client.to_string();
    }

    if let Some(ConnectInfo(addr)) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    UNKNOWN_IDENTIFIER.to_string()
}

/// Write the quota headers sent on every gated response
pub fn apply_headers(headers: &mut HeaderMap, result: &AdmissionResult) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(result.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(result.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(result.reset_at_epoch_secs));
}

/// axum middleware enforcing the route table
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let category = request
        .extensions()
        .get::<MatchedPath>()
        .and_then(|path| state.routes.category_for(request.method(), path.as_str()));

    let Some(category) = category else {
        return next.run(request).await;
    };

    let identifier = resolve_identifier(request.headers(), request.extensions());
    let result = state.gate.admit(&identifier, category);

    match result.into_result(category, &identifier) {
        Ok(result) => {
            let mut response = next.run(request).await;
            apply_headers(response.headers_mut(), &result);
            response
        }
        Err(err) => {
            let mut response = err.into_response();
            apply_headers(response.headers_mut(), &result);
            response
        }
    }
}
