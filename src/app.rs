//! Application struct that encapsulates server assembly and serving logic.

use crate::cli::Cli;
use arc_swap::ArcSwap;
use route_meter_core::config::{Config, ConfigWatcher};
use route_meter_core::lifecycle::signal::SignalHandler;
use route_meter_core::rate_limit::RateLimiter;
use route_meter_core::route::RouteTable;
use std::sync::Arc;

pub struct Application {
    config: Arc<ArcSwap<Config>>,
    routes: Arc<ArcSwap<RouteTable>>,
    rate_limiter: Arc<RateLimiter>,
    app_router: axum::Router,
    config_path: String,
}

impl Application {
    /// Load config, build telemetry, the filter chain and the router.
    pub fn build(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = Config::load(&cli.config).unwrap_or_else(|e| {
            tracing::warn!(
                "Failed to load config from '{}': {e}, using defaults",
                cli.config
            );
            Config::default()
        });

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }

        let (telemetry, metrics) = route_meter_server::build_telemetry(&config.telemetry);
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let chain = route_meter_server::build_chain(&config, telemetry, rate_limiter.clone())?;
        let routes = Arc::new(ArcSwap::from_pointee(RouteTable::new(&config.routes)));

        tracing::info!(
            routes = config.routes.len(),
            recorder = ?config.telemetry.recorder,
            metric_prefix = %config.telemetry.metric_prefix,
            filters = ?chain.describe(),
            "Gateway assembled"
        );

        let config = Arc::new(ArcSwap::from_pointee(config));
        let state = route_meter_server::AppState {
            config: config.clone(),
            routes: routes.clone(),
            chain,
            metrics,
        };
        let app_router = route_meter_server::build_router(state);

        Ok(Self {
            config,
            routes,
            rate_limiter,
            app_router,
            config_path: cli.config.clone(),
        })
    }

    /// Serve HTTP, handle signals and hot reload, and drain gracefully.
    ///
    /// Reload updates routes and rate limits. Telemetry, filter order and
    /// listen address take effect on restart.
    pub async fn serve(self) -> anyhow::Result<()> {
        let Self {
            config,
            routes,
            rate_limiter,
            app_router,
            config_path,
        } = self;

        // Routes and rate limits are swapped live; the rest was baked into
        // the chain and router at startup.
        let startup = config.load_full();
        let apply = {
            let routes = routes.clone();
            let rate_limiter = rate_limiter.clone();
            move |new_cfg: &Config| {
                routes.store(Arc::new(RouteTable::new(&new_cfg.routes)));
                rate_limiter.update_config(&new_cfg.rate_limit);
                let pending = new_cfg.restart_required_changes(&startup);
                if !pending.is_empty() {
                    tracing::warn!(
                        sections = ?pending,
                        "Reloaded config changes settings that only apply after a restart"
                    );
                }
            }
        };

        // Config file watcher; keep running without it if the file is missing
        let _watcher = match ConfigWatcher::start(config_path.clone(), config.clone(), apply.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!("Config watcher not started for '{config_path}': {e}");
                None
            }
        };

        // SIGHUP reload
        let (signal_handler, mut shutdown_rx) = SignalHandler::new();
        let reload_config = config.clone();
        let reload_fn = move || match Config::load(&config_path) {
            Ok(new_cfg) => {
                apply(&new_cfg);
                tracing::info!(routes = new_cfg.routes.len(), "SIGHUP reload applied");
                reload_config.store(Arc::new(new_cfg));
            }
            Err(e) => tracing::error!("SIGHUP config reload failed: {e}"),
        };
        tokio::spawn(signal_handler.run(reload_fn));

        let addr = {
            let cfg = config.load();
            format!("{}:{}", cfg.host, cfg.port)
        };
        tracing::info!("Starting HTTP server on {addr}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        let shutdown = async move {
            let _ = shutdown_rx.wait_for(|v| *v).await;
        };
        axum::serve(listener, app_router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Server shut down.");
        Ok(())
    }
}
