use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderValue;
use route_meter_core::config::DEFAULT_ADMISSION_ORDER;
use route_meter_core::error::GatewayError;
use route_meter_core::rate_limit::RateLimiter;

use super::{Chain, Exchange, FilterResult, GatewayFilter};

/// Default position of the admission-control filter. Must stay above
/// [`INSTRUMENTATION_ORDER`](super::instrumentation::INSTRUMENTATION_ORDER).
pub const ADMISSION_CONTROL_ORDER: i32 = DEFAULT_ADMISSION_ORDER;

/// Rejects requests over the configured rate before they reach the upstream.
pub struct AdmissionFilter {
    limiter: Arc<RateLimiter>,
    order: i32,
}

impl AdmissionFilter {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            order: ADMISSION_CONTROL_ORDER,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

/// API key from `Authorization: Bearer` or `x-api-key`.
fn client_key(exchange: &Exchange) -> Option<String> {
    let headers = exchange.request.headers();
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
        .map(|s| s.to_string())
}

#[async_trait]
impl GatewayFilter for AdmissionFilter {
    fn name(&self) -> &str {
        "admission-control"
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn filter(&self, exchange: Exchange, chain: Chain) -> FilterResult {
        if !self.limiter.is_enabled() {
            return chain.proceed(exchange).await;
        }

        let info = self.limiter.try_acquire(client_key(&exchange).as_deref());
        if !info.allowed {
            tracing::debug!(
                request_id = %exchange.context.request_id,
                limit = info.limit,
                "Request rejected by admission control"
            );
            return Err(GatewayError::RateLimited(format!(
                "retry after {}s",
                info.reset_secs
            )));
        }

        let mut response = chain.proceed(exchange).await?;

        // No limit applied to this request (per-key only, no key sent)
        if info.limit == 0 {
            return Ok(response);
        }

        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining));
        headers.insert("x-ratelimit-reset", HeaderValue::from(info.reset_secs));

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterChain, terminal_fn};
    use axum::body::Body;
    use axum::extract::Request;
    use axum::response::Response;
    use route_meter_core::config::RateLimitConfig;

    fn chain(config: RateLimitConfig) -> FilterChain {
        FilterChain::builder()
            .filter(AdmissionFilter::new(Arc::new(RateLimiter::new(&config))))
            .build(terminal_fn(|_ex: Exchange| async {
                Ok(Response::new(Body::empty()))
            }))
    }

    fn exchange(key: Option<&str>) -> Exchange {
        let mut builder = Request::builder().uri("/orders");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        Exchange::new(builder.body(Body::empty()).unwrap(), None)
    }

    #[tokio::test]
    async fn test_disabled_passes_without_headers() {
        let chain = chain(RateLimitConfig::default());
        let resp = chain.run(exchange(None)).await.unwrap();
        assert!(resp.headers().get("x-ratelimit-limit").is_none());
    }

    #[tokio::test]
    async fn test_rejects_over_limit() {
        let chain = chain(RateLimitConfig {
            enabled: true,
            global_rpm: 2,
            per_key_rpm: 0,
        });

        let resp = chain.run(exchange(None)).await.unwrap();
        assert_eq!(resp.headers()["x-ratelimit-limit"], "2");
        assert_eq!(resp.headers()["x-ratelimit-remaining"], "1");
        chain.run(exchange(None)).await.unwrap();

        let err = chain.run(exchange(None)).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_per_key_limit_uses_api_key() {
        let chain = chain(RateLimitConfig {
            enabled: true,
            global_rpm: 0,
            per_key_rpm: 1,
        });
        assert!(chain.run(exchange(Some("alice"))).await.is_ok());
        assert!(chain.run(exchange(Some("alice"))).await.is_err());
        assert!(chain.run(exchange(Some("bob"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_keyless_request_under_per_key_limit_has_no_headers() {
        let chain = chain(RateLimitConfig {
            enabled: true,
            global_rpm: 0,
            per_key_rpm: 5,
        });
        let resp = chain.run(exchange(None)).await.unwrap();
        assert!(resp.headers().get("x-ratelimit-limit").is_none());
        assert!(resp.headers().get("x-ratelimit-remaining").is_none());

        let resp = chain.run(exchange(Some("alice"))).await.unwrap();
        assert_eq!(resp.headers()["x-ratelimit-limit"], "5");
        assert_eq!(resp.headers()["x-ratelimit-remaining"], "4");
    }
}
