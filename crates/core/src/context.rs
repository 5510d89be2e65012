use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::Method;

use crate::route::RouteEntry;

/// Per-request context carrying identity for logging and metrics.
///
/// Built by the gateway handler when a request arrives. Filters read it; none
/// of them own it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request identifier (UUID v4).
    pub request_id: String,
    pub method: Method,
    pub path: String,
    /// When the request was received.
    pub start_time: Instant,
    /// Client IP address, if available.
    pub client_ip: Option<String>,
    /// Route matched upstream of the filter chain, if any.
    pub route: Option<Arc<RouteEntry>>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            method,
            path: path.into(),
            start_time: Instant::now(),
            client_ip: None,
            route: None,
        }
    }

    /// Build a context from an incoming request, taking the client address
    /// from `x-forwarded-for` or `x-real-ip`.
    pub fn from_request(request: &Request) -> Self {
        let client_ip = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| {
                request
                    .headers()
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string())
            });

        Self {
            client_ip,
            ..Self::new(request.method().clone(), request.uri().path())
        }
    }

    pub fn with_route(mut self, route: Option<Arc<RouteEntry>>) -> Self {
        self.route = route;
        self
    }

    /// Returns elapsed time since request start.
    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_from_request_forwarded_for() {
        let req = Request::builder()
            .method("POST")
            .uri("/orders/42?x=1")
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body(Body::empty())
            .unwrap();
        let ctx = RequestContext::from_request(&req);
        assert_eq!(ctx.method, Method::POST);
        assert_eq!(ctx.path, "/orders/42");
        assert_eq!(ctx.client_ip.as_deref(), Some("10.0.0.1"));
        assert!(ctx.route.is_none());
        assert_eq!(ctx.request_id.len(), 36);
    }

    #[test]
    fn test_from_request_real_ip_fallback() {
        let req = Request::builder()
            .uri("/")
            .header("x-real-ip", "192.168.1.7")
            .body(Body::empty())
            .unwrap();
        let ctx = RequestContext::from_request(&req);
        assert_eq!(ctx.client_ip.as_deref(), Some("192.168.1.7"));
    }
}
