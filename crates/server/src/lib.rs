pub mod filter;
pub mod handler;
pub mod middleware;
pub mod proxy;

use arc_swap::ArcSwap;
use axum::{Router, middleware as axum_mw};
use filter::{AdmissionFilter, FilterChain, InstrumentationFilter};
use proxy::UpstreamForwarder;
use route_meter_core::config::{Config, RecorderKind, TelemetryConfig};
use route_meter_core::error::GatewayError;
use route_meter_core::metrics::InMemoryRecorder;
use route_meter_core::rate_limit::RateLimiter;
use route_meter_core::recorder::{LogRecorder, MetricNames, NoopRecorder, Telemetry};
use route_meter_core::route::RouteTable;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<Config>>,
    pub routes: Arc<ArcSwap<RouteTable>>,
    pub chain: FilterChain,
    /// Set when telemetry is recorded in-process and served on `/metrics`.
    pub metrics: Option<Arc<InMemoryRecorder>>,
}

/// Build the telemetry handle selected by configuration.
pub fn build_telemetry(cfg: &TelemetryConfig) -> (Telemetry, Option<Arc<InMemoryRecorder>>) {
    let names = MetricNames::new(cfg.metric_prefix.clone());
    match cfg.recorder {
        RecorderKind::None => (Telemetry::new(Arc::new(NoopRecorder), names), None),
        RecorderKind::Log => (Telemetry::new(Arc::new(LogRecorder), names), None),
        RecorderKind::Memory => {
            let recorder = Arc::new(InMemoryRecorder::new());
            (Telemetry::new(recorder.clone(), names), Some(recorder))
        }
    }
}

/// Assemble the gateway filter chain: instrumentation, admission control,
/// then the upstream forwarder.
pub fn build_chain(
    config: &Config,
    telemetry: Telemetry,
    limiter: Arc<RateLimiter>,
) -> Result<FilterChain, GatewayError> {
    let forwarder = UpstreamForwarder::new(
        Duration::from_secs(config.connect_timeout),
        Duration::from_secs(config.request_timeout),
        config.body_limit_mb * 1024 * 1024,
    )?;

    let chain = FilterChain::builder()
        .filter(InstrumentationFilter::new(telemetry).with_order(config.filters.instrumentation_order))
        .filter(AdmissionFilter::new(limiter).with_order(config.filters.admission_order))
        .build(forwarder);

    for (name, order) in chain.describe() {
        tracing::debug!(filter = %name, order, "Registered gateway filter");
    }
    Ok(chain)
}

pub fn build_router(state: AppState) -> Router {
    let config = state.config.load();
    let body_limit_bytes = config.body_limit_mb * 1024 * 1024;
    let request_timeout = Duration::from_secs(config.request_timeout);

    // Public routes, served by the gateway itself
    let public_routes = Router::new()
        .route("/health", axum::routing::get(handler::health::health))
        .route("/metrics", axum::routing::get(handler::health::metrics));

    // Everything else goes through the filter chain
    let gateway_routes = Router::new()
        .fallback(handler::gateway::gateway)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(RequestBodyLimitLayer::new(body_limit_bytes));

    // Compose, then global middleware layers (outer → inner)
    Router::new()
        .merge(public_routes)
        .merge(gateway_routes)
        .layer(axum_mw::from_fn(
            middleware::request_logging::request_logging_middleware,
        ))
        .layer(axum_mw::from_fn(
            middleware::request_context::request_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
