//! HTTP control plane.
//!
//! Trivial status/ops endpoints on the configured port. A per-IP
//! fixed-window limit guards the whole surface, security headers go on
//! every response, and requests made during shutdown get 503.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;

use crate::plugins::BotContext;

/// 100 requests per 15 minutes, whole window available as burst.
const RATE_PERIOD: Duration = Duration::from_secs(9);
const RATE_BURST: u32 = 100;

#[derive(Clone)]
pub struct ApiState {
    pub bot: Arc<BotContext>,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

/// Build the router with all middleware applied.
pub fn router(state: ApiState) -> Router {
    let governor_config = GovernorConfigBuilder::default()
        .period(RATE_PERIOD)
        .burst_size(RATE_BURST)
        .finish()
        .expect("governor config is static and valid");

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/bot-info", get(bot_info))
        .route("/api/mongodb-health", get(mongodb_health))
        .route("/api/connection-stats", get(connection_stats))
        .route("/api/test-mongodb", post(test_mongodb))
        .route("/api/force-gc", post(force_gc))
        .route("/plugins", get(list_plugins))
        .route("/plugins/stats", get(plugin_stats))
        .route("/plugins/reload-all", post(reload_all))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            reject_during_shutdown,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(GovernorLayer {
            config: Arc::new(governor_config),
        })
        .layer(tower::limit::ConcurrencyLimitLayer::new(64))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: ApiState) -> anyhow::Result<()> {
    let port = state.bot.config.port;
    let shutdown = state.shutdown.clone();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "control plane listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn reject_during_shutdown(
    State(state): State<ApiState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if state.shutdown.is_cancelled() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "shutting down" })),
        )
            .into_response();
    }
    next.run(request).await
}

async fn security_headers(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("0"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        "cache-control",
        HeaderValue::from_static("no-store"),
    );
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn root(State(state): State<ApiState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": state.bot.config.bot_name,
        "version": env!("CARGO_PKG_VERSION"),
        "state": state.bot.connection.state(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn bot_info(State(state): State<ApiState>) -> impl IntoResponse {
    let config = &state.bot.config;
    let plugins = state
        .bot
        .registry
        .snapshot()
        .map(|s| s.entries().len())
        .unwrap_or(0);
    Json(serde_json::json!({
        "name": config.bot_name,
        "prefix": config.prefix,
        "mode": state.bot.perms.bot_mode().await,
        "timezone": config.timezone,
        "plugins": plugins,
        "scheduled_jobs": state.bot.scheduler.len(),
        "connection": state.bot.connection.stats(),
    }))
}

async fn mongodb_health(State(state): State<ApiState>) -> impl IntoResponse {
    let Some(store) = &state.bot.store else {
        return Json(serde_json::json!({ "configured": false, "connected": false }));
    };
    let started = Instant::now();
    match store.ping().await {
        Ok(()) => Json(serde_json::json!({
            "configured": true,
            "connected": true,
            "latency_ms": started.elapsed().as_millis() as u64,
        })),
        Err(e) => Json(serde_json::json!({
            "configured": true,
            "connected": false,
            "error": e.to_string(),
        })),
    }
}

async fn connection_stats(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.bot.connection.stats())
}

async fn test_mongodb(State(state): State<ApiState>) -> Response {
    let Some(store) = &state.bot.store else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "store not configured" })),
        )
            .into_response();
    };
    match store.ping().await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "ok": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn force_gc(State(state): State<ApiState>) -> impl IntoResponse {
    let identity_entries = state.bot.resolver.cache_len();
    let rate_buckets = state.bot.rate.bucket_count();
    let retry_entries = state.bot.connection.retry_cache.len();

    state.bot.resolver.clear_cache();
    state.bot.rate.clear();
    state.bot.connection.retry_cache.clear();

    tracing::info!(identity_entries, rate_buckets, retry_entries, "caches cleared via API");
    Json(serde_json::json!({
        "cleared": {
            "identity_cache": identity_entries,
            "rate_buckets": rate_buckets,
            "retry_cache": retry_entries,
        }
    }))
}

async fn list_plugins(State(state): State<ApiState>) -> impl IntoResponse {
    let plugins: Vec<serde_json::Value> = state
        .bot
        .registry
        .snapshot()
        .map(|s| {
            s.entries()
                .iter()
                .map(|e| serde_json::to_value(e.info()).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    Json(serde_json::json!({ "plugins": plugins }))
}

async fn plugin_stats(State(state): State<ApiState>) -> impl IntoResponse {
    let stats: Vec<serde_json::Value> = state
        .bot
        .registry
        .stats()
        .into_iter()
        .map(|(name, stats)| {
            let rate = stats.recent_error_rate();
            serde_json::json!({
                "name": name,
                "stats": stats,
                "recent_error_rate": rate,
            })
        })
        .collect();
    Json(serde_json::json!({ "plugins": stats }))
}

async fn reload_all(State(state): State<ApiState>) -> Response {
    match state.bot.registry.reload_all(&state.bot).await {
        Ok(count) => {
            // Re-fire load hooks so plugins re-register their jobs.
            if state.bot.connection.is_running() {
                state.bot.registry.fire_on_load(&state.bot).await;
            }
            Json(serde_json::json!({ "reloaded": count })).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
