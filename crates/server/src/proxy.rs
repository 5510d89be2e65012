//! Terminal stage: forward the exchange to the matched route's upstream.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::HeaderMap;
use axum::http::header;
use axum::response::Response;
use http_body_util::LengthLimitError;
use route_meter_core::error::GatewayError;

use crate::filter::{Exchange, FilterResult, Terminal};

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: &[header::HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Map a body read failure, reporting an exceeded size limit as 413.
///
/// The limit error may sit under several layers of boxing, from either
/// `RequestBodyLimitLayer` or the forwarder's own buffering limit.
fn body_read_error(err: axum::Error) -> GatewayError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return GatewayError::PayloadTooLarge(err.to_string());
        }
        source = e.source();
    }
    GatewayError::BadRequest(format!("failed to read request body: {err}"))
}

pub struct UpstreamForwarder {
    client: reqwest::Client,
    body_limit: usize,
}

impl UpstreamForwarder {
    pub fn new(
        connect_timeout: Duration,
        request_timeout: Duration,
        body_limit: usize,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, body_limit })
    }
}

#[async_trait]
impl Terminal for UpstreamForwarder {
    async fn handle(&self, exchange: Exchange) -> FilterResult {
        let Exchange { request, context } = exchange;
        let route = context
            .route
            .clone()
            .ok_or_else(|| GatewayError::RouteNotFound(context.path.clone()))?;

        let (parts, body) = request.into_parts();
        let url = match parts.uri.query() {
            Some(q) => format!("{}{}?{q}", route.upstream, route.upstream_path(&context.path)),
            None => format!("{}{}", route.upstream, route.upstream_path(&context.path)),
        };
        let body = axum::body::to_bytes(body, self.body_limit)
            .await
            .map_err(body_read_error)?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        if let Some(ip) = context.client_ip.as_deref()
            && let Ok(value) = ip.parse()
        {
            headers.insert("x-forwarded-for", value);
        }

        tracing::debug!(
            request_id = %context.request_id,
            route = %route.id,
            url = %url,
            "Forwarding request upstream"
        );

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
