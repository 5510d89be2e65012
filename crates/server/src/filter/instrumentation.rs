//! Request instrumentation filter.
//!
//! Counts every request that enters the chain, attributes it to its resolved
//! route, and records exactly one outcome per request: a success counter plus a
//! per-route duration, or a failure counter plus an error report. The response
//! and error returned by the rest of the chain pass through untouched.
//!
//! Each traversal runs inside a `gateway_filter` span, so work done further
//! down the chain (admission control, the upstream call) is grouped under it
//! in traces. The span's `outcome` field is filled in on completion.
//!
//! Registered ahead of admission control so that rejected requests are still
//! counted as received.

use std::sync::Arc;

use async_trait::async_trait;
use route_meter_core::config::DEFAULT_INSTRUMENTATION_ORDER;
use route_meter_core::error::GatewayError;
use route_meter_core::recorder::Telemetry;
use route_meter_core::route::{ContextRouteResolver, RouteId, RouteResolver};
use tokio::time::Instant;
use tracing::{Instrument, Span};

use super::{Chain, Exchange, FilterResult, GatewayFilter};

/// Default position of the instrumentation filter in the chain.
pub const INSTRUMENTATION_ORDER: i32 = DEFAULT_INSTRUMENTATION_ORDER;

pub struct InstrumentationFilter {
    telemetry: Telemetry,
    resolver: Arc<dyn RouteResolver>,
    order: i32,
}

impl InstrumentationFilter {
    pub fn new(telemetry: Telemetry) -> Self {
        Self {
            telemetry,
            resolver: Arc::new(ContextRouteResolver),
            order: INSTRUMENTATION_ORDER,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn RouteResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

#[async_trait]
impl GatewayFilter for InstrumentationFilter {
    fn name(&self) -> &str {
        "instrumentation"
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn filter(&self, exchange: Exchange, chain: Chain) -> FilterResult {
        let start = Instant::now();

        let route = self
            .resolver
            .resolve(&exchange.context)
            .unwrap_or_else(RouteId::unknown);
        let span = tracing::info_span!(
            "gateway_filter",
            request_id = %exchange.context.request_id,
            method = %exchange.context.method,
            path = %exchange.context.path,
            route = %route,
            outcome = tracing::field::Empty,
        );
        span.in_scope(|| tracing::debug!("Instrumenting request"));

        let names = self.telemetry.names();
        self.telemetry.counter(&names.requests_total(), 1);
        self.telemetry.counter(&names.route_count(route.as_str()), 1);

        let mut outcome = Outcome {
            telemetry: &self.telemetry,
            span: span.clone(),
            route,
            start,
            recorded: false,
        };
        let result = chain.proceed(exchange).instrument(span).await;
        outcome.record(&result);
        result
    }
}

/// Records the terminal outcome of one request exactly once.
///
/// If the request future is dropped before the chain completes, `Drop`
/// records a failure with [`GatewayError::Cancelled`].
struct Outcome<'a> {
    telemetry: &'a Telemetry,
    span: Span,
    route: RouteId,
    start: Instant,
    recorded: bool,
}

impl Outcome<'_> {
    fn record(&mut self, result: &FilterResult) {
        if std::mem::replace(&mut self.recorded, true) {
            return;
        }
        match result {
            Ok(_) => self.success(),
            Err(e) => self.failure(e),
        }
    }

    fn success(&self) {
        self.span.record("outcome", "success");
        let elapsed = self.start.elapsed();
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let names = self.telemetry.names();
        self.telemetry.counter(&names.requests_success(), 1);
        self.telemetry
            .duration(&names.route_duration(self.route.as_str()), millis);
    }

    fn failure(&self, error: &GatewayError) {
        let kind = match error {
            GatewayError::Cancelled => "cancelled",
            _ => "failure",
        };
        self.span.record("outcome", kind);
        self.span
            .in_scope(|| tracing::debug!(error = %error, "Request failed"));
        let names = self.telemetry.names();
        self.telemetry.counter(&names.requests_error(), 1);
        self.telemetry.error(error);
    }
}

impl Drop for Outcome<'_> {
    fn drop(&mut self) {
        if !std::mem::replace(&mut self.recorded, true) {
            self.failure(&GatewayError::Cancelled);
        }
    }
}
