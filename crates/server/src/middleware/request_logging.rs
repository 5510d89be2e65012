use axum::{extract::Request, middleware::Next, response::Response};
use route_meter_core::context::RequestContext;

/// Middleware that logs each request and its final status.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let ctx = request.extensions().get::<RequestContext>().cloned();
    let request_id = ctx
        .as_ref()
        .map(|c| c.request_id.clone())
        .unwrap_or_default();
    let client_ip = ctx
        .as_ref()
        .and_then(|c| c.client_ip.clone())
        .unwrap_or_else(|| "-".to_string());

    tracing::info!(
        request_id = %request_id,
        client_ip = %client_ip,
        method = %request.method(),
        path = %request.uri().path(),
        "Request received"
    );

    let response = next.run(request).await;

    let elapsed = ctx.as_ref().map(|c| c.elapsed_ms()).unwrap_or(0);
    let status = response.status().as_u16();
    if response.status().is_server_error() {
        tracing::warn!(request_id = %request_id, status, elapsed_ms = elapsed, "Request completed");
    } else {
        tracing::info!(request_id = %request_id, status, elapsed_ms = elapsed, "Request completed");
    }

    response
}
