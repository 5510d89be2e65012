use axum::extract::{Request, State};
use axum::response::Response;
use route_meter_core::context::RequestContext;
use route_meter_core::error::GatewayError;

use crate::AppState;
use crate::filter::Exchange;

/// Fallback handler: resolve the route, then run the filter chain.
pub async fn gateway(State(state): State<AppState>, request: Request) -> Result<Response, GatewayError> {
    let route = state.routes.load().resolve(request.uri().path());
    let context = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(|| RequestContext::from_request(&request))
        .with_route(route);

    state.chain.run(Exchange { request, context }).await
}
