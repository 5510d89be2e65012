//! Ordered gateway filter chain.
//!
//! Filters are sorted by their declared [`GatewayFilter::order`] (lower runs
//! first) and each one receives a single-use [`Chain`] handle to the rest of
//! the pipeline. Past the last filter the chain hands the exchange to the
//! [`Terminal`] stage, which produces the response.

pub mod admission;
pub mod instrumentation;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use route_meter_core::context::RequestContext;
use route_meter_core::error::GatewayError;
use route_meter_core::route::RouteEntry;

pub use admission::AdmissionFilter;
pub use instrumentation::InstrumentationFilter;

pub type FilterResult = Result<Response, GatewayError>;

/// One request travelling through the chain.
#[derive(Debug)]
pub struct Exchange {
    pub request: Request,
    pub context: RequestContext,
}

impl Exchange {
    pub fn new(request: Request, route: Option<Arc<RouteEntry>>) -> Self {
        let context = RequestContext::from_request(&request).with_route(route);
        Self { request, context }
    }
}

#[async_trait]
pub trait GatewayFilter: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &str;

    /// Position in the chain. Lower values run first.
    fn order(&self) -> i32;

    async fn filter(&self, exchange: Exchange, chain: Chain) -> FilterResult;
}

/// Final stage of the chain.
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn handle(&self, exchange: Exchange) -> FilterResult;
}

/// Adapts an async closure into a [`Terminal`].
pub struct TerminalFn<F>(F);

pub fn terminal_fn<F, Fut>(f: F) -> TerminalFn<F>
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = FilterResult> + Send + 'static,
{
    TerminalFn(f)
}

#[async_trait]
impl<F, Fut> Terminal for TerminalFn<F>
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = FilterResult> + Send + 'static,
{
    async fn handle(&self, exchange: Exchange) -> FilterResult {
        (self.0)(exchange).await
    }
}

/// Continuation to the remainder of the chain.
///
/// `proceed` consumes the handle, so a filter can invoke the rest of the
/// chain at most once.
pub struct Chain {
    filters: Arc<[Arc<dyn GatewayFilter>]>,
    terminal: Arc<dyn Terminal>,
    index: usize,
}

impl Chain {
    pub async fn proceed(self, exchange: Exchange) -> FilterResult {
        let Self {
            filters,
            terminal,
            index,
        } = self;
        match filters.get(index).cloned() {
            Some(filter) => {
                let next = Chain {
                    filters,
                    terminal,
                    index: index + 1,
                };
                filter.filter(exchange, next).await
            }
            None => terminal.handle(exchange).await,
        }
    }
}

/// An immutable, shareable chain of filters plus its terminal stage.
#[derive(Clone)]
pub struct FilterChain {
    filters: Arc<[Arc<dyn GatewayFilter>]>,
    terminal: Arc<dyn Terminal>,
}

impl FilterChain {
    pub fn builder() -> FilterChainBuilder {
        FilterChainBuilder::default()
    }

    pub async fn run(&self, exchange: Exchange) -> FilterResult {
        let chain = Chain {
            filters: self.filters.clone(),
            terminal: self.terminal.clone(),
            index: 0,
        };
        chain.proceed(exchange).await
    }

    /// Filter names with their order, in execution order.
    pub fn describe(&self) -> Vec<(String, i32)> {
        self.filters
            .iter()
            .map(|f| (f.name().to_string(), f.order()))
            .collect()
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.describe())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct FilterChainBuilder {
    filters: Vec<Arc<dyn GatewayFilter>>,
}

impl FilterChainBuilder {
    pub fn filter(mut self, filter: impl GatewayFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Sort by order and seal the chain. Equal orders keep registration order.
    pub fn build(mut self, terminal: impl Terminal + 'static) -> FilterChain {
        self.filters.sort_by_key(|f| f.order());
        FilterChain {
            filters: self.filters.into(),
            terminal: Arc::new(terminal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::sync::Mutex;

    struct Tag {
        name: &'static str,
        order: i32,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl GatewayFilter for Tag {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> i32 {
            self.order
        }

        async fn filter(&self, exchange: Exchange, chain: Chain) -> FilterResult {
            self.seen.lock().unwrap().push(self.name);
            chain.proceed(exchange).await
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl GatewayFilter for ShortCircuit {
        fn name(&self) -> &str {
            "short-circuit"
        }

        fn order(&self) -> i32 {
            0
        }

        async fn filter(&self, _exchange: Exchange, _chain: Chain) -> FilterResult {
            Err(GatewayError::RateLimited("closed".into()))
        }
    }

    fn exchange() -> Exchange {
        Exchange::new(Request::new(Body::empty()), None)
    }

    fn ok_terminal(
        seen: Arc<Mutex<Vec<&'static str>>>,
    ) -> TerminalFn<impl Fn(Exchange) -> futures::future::Ready<FilterResult> + Send + Sync> {
        terminal_fn(move |_ex: Exchange| {
            seen.lock().unwrap().push("terminal");
            futures::future::ready(Ok(Response::new(Body::empty())))
        })
    }

    #[tokio::test]
    async fn test_filters_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::builder()
            .filter(Tag { name: "c", order: 5, seen: seen.clone() })
            .filter(Tag { name: "a", order: -10, seen: seen.clone() })
            .filter(Tag { name: "b", order: -1, seen: seen.clone() })
            .filter(Tag { name: "b2", order: -1, seen: seen.clone() })
            .build(ok_terminal(seen.clone()));

        let names: Vec<String> = chain.describe().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "b2", "c"]);

        chain.run(exchange()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "b2", "c", "terminal"]);
    }

    #[tokio::test]
    async fn test_empty_chain_reaches_terminal() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::builder().build(ok_terminal(seen.clone()));
        assert!(chain.describe().is_empty());
        chain.run(exchange()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["terminal"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::builder()
            .filter(Tag { name: "first", order: -5, seen: seen.clone() })
            .filter(ShortCircuit)
            .filter(Tag { name: "after", order: 5, seen: seen.clone() })
            .build(ok_terminal(seen.clone()));

        let err = chain.run(exchange()).await.unwrap_err();
        assert_eq!(err, GatewayError::RateLimited("closed".into()));
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
    }
}
