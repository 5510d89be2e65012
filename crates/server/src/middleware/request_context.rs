use axum::{extract::Request, middleware::Next, response::Response};
use route_meter_core::context::RequestContext;

/// Middleware that injects a `RequestContext` as a request extension.
pub async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let ctx = RequestContext::from_request(&request);
    request.extensions_mut().insert(ctx);
    next.run(request).await
}
