//! Static route table and read-only route resolution.

use std::fmt;
use std::sync::Arc;

use crate::config::RouteConfig;
use crate::context::RequestContext;

/// Logical name of a matched route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteId(String);

impl RouteId {
    /// Sentinel used when no route was resolved.
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A configured route as seen by the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub id: RouteId,
    pub path_prefix: String,
    pub upstream: String,
    pub strip_prefix: bool,
}

impl RouteEntry {
    /// Path to request from the upstream for an incoming `path`.
    pub fn upstream_path<'a>(&self, path: &'a str) -> &'a str {
        if !self.strip_prefix || self.path_prefix == "/" {
            return path;
        }
        match path.strip_prefix(self.path_prefix.as_str()) {
            Some("") => "/",
            Some(rest) => rest,
            None => path,
        }
    }

    fn matches(&self, path: &str) -> bool {
        if self.path_prefix == "/" {
            return true;
        }
        match path.strip_prefix(self.path_prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Longest-prefix route table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteEntry>>,
}

impl RouteTable {
    pub fn new(configs: &[RouteConfig]) -> Self {
        let mut routes: Vec<Arc<RouteEntry>> = configs
            .iter()
            .map(|c| {
                Arc::new(RouteEntry {
                    id: RouteId::new(c.id.clone()),
                    path_prefix: c.path_prefix.clone(),
                    upstream: c.upstream.clone(),
                    strip_prefix: c.strip_prefix,
                })
            })
            .collect();
        // Longest prefix first; stable so config order breaks ties.
        routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
        Self { routes }
    }

    pub fn resolve(&self, path: &str) -> Option<Arc<RouteEntry>> {
        self.routes.iter().find(|r| r.matches(path)).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Read-only lookup of the route resolved for a request.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, ctx: &RequestContext) -> Option<RouteId>;
}

/// Reads the route recorded on the [`RequestContext`] by the route table.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextRouteResolver;

impl RouteResolver for ContextRouteResolver {
    fn resolve(&self, ctx: &RequestContext) -> Option<RouteId> {
        ctx.route.as_ref().map(|r| r.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn route(id: &str, prefix: &str, strip: bool) -> RouteConfig {
        RouteConfig {
            id: id.into(),
            path_prefix: prefix.into(),
            upstream: "http://127.0.0.1:9000".into(),
            strip_prefix: strip,
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = RouteTable::new(&[
            route("catch-all", "/", false),
            route("orders-api", "/api/orders", false),
            route("api", "/api", false),
        ]);
        assert_eq!(table.len(), 3);
        let r = table.resolve("/api/orders/7").unwrap();
        assert_eq!(r.id.as_str(), "orders-api");
        let r = table.resolve("/api/users").unwrap();
        assert_eq!(r.id.as_str(), "api");
        let r = table.resolve("/static/app.js").unwrap();
        assert_eq!(r.id.as_str(), "catch-all");
    }

    #[test]
    fn test_prefix_respects_segments() {
        let table = RouteTable::new(&[route("orders-api", "/orders", false)]);
        assert!(table.resolve("/orders").is_some());
        assert!(table.resolve("/orders/1").is_some());
        assert!(table.resolve("/ordersx").is_none());
        assert!(table.resolve("/").is_none());
    }

    #[test]
    fn test_upstream_path_strip() {
        let table = RouteTable::new(&[route("orders-api", "/orders", true)]);
        let r = table.resolve("/orders/1").unwrap();
        assert_eq!(r.upstream_path("/orders/1"), "/1");
        assert_eq!(r.upstream_path("/orders"), "/");

        let keep = RouteTable::new(&[route("orders-api", "/orders", false)]);
        let r = keep.resolve("/orders/1").unwrap();
        assert_eq!(r.upstream_path("/orders/1"), "/orders/1");
    }

    #[test]
    fn test_context_resolver() {
        let table = RouteTable::new(&[route("orders-api", "/orders", false)]);
        let resolver = ContextRouteResolver;

        let ctx = RequestContext::new(Method::GET, "/orders/1")
            .with_route(table.resolve("/orders/1"));
        assert_eq!(resolver.resolve(&ctx), Some(RouteId::new("orders-api")));

        let ctx = RequestContext::new(Method::GET, "/other").with_route(table.resolve("/other"));
        assert_eq!(resolver.resolve(&ctx), None);
    }
}
