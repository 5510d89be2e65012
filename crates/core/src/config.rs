use arc_swap::ArcSwap;
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::recorder::DEFAULT_METRIC_PREFIX;

/// Default order of the instrumentation filter. Lower runs first.
pub const DEFAULT_INSTRUMENTATION_ORDER: i32 = -10;

/// Default order of the admission-control filter.
pub const DEFAULT_ADMISSION_ORDER: i32 = -1;

// ─── Config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Debug & logging
    pub logging_to_file: bool,
    pub log_dir: Option<String>,

    // Timeouts (seconds)
    pub connect_timeout: u64,
    pub request_timeout: u64,

    // Request body size limit (MB)
    pub body_limit_mb: usize,

    pub telemetry: TelemetryConfig,
    pub filters: FilterOrderConfig,
    pub rate_limit: RateLimitConfig,
    pub routes: Vec<RouteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            logging_to_file: false,
            log_dir: None,
            connect_timeout: 10,
            request_timeout: 60,
            body_limit_mb: 10,
            telemetry: TelemetryConfig::default(),
            filters: FilterOrderConfig::default(),
            rate_limit: RateLimitConfig::default(),
            routes: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from a YAML file, sanitize, and validate.
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        let mut config: Config = serde_yaml_ng::from_str(contents)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    /// Sections of `self` that differ from the `running` config but are only
    /// read at startup. Reload applies routes and rate limits; everything
    /// listed here needs a restart.
    pub fn restart_required_changes(&self, running: &Config) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.host != running.host || self.port != running.port {
            changed.push("host/port");
        }
        if self.connect_timeout != running.connect_timeout
            || self.request_timeout != running.request_timeout
        {
            changed.push("timeouts");
        }
        if self.body_limit_mb != running.body_limit_mb {
            changed.push("body-limit-mb");
        }
        if self.telemetry != running.telemetry {
            changed.push("telemetry");
        }
        if self.filters != running.filters {
            changed.push("filters");
        }
        changed
    }

    /// Validate configuration.
    fn validate(&self) -> Result<(), anyhow::Error> {
        // Requests rejected by admission control must still be counted.
        anyhow::ensure!(
            self.filters.instrumentation_order < self.filters.admission_order,
            "instrumentation-order ({}) must be lower than admission-order ({})",
            self.filters.instrumentation_order,
            self.filters.admission_order,
        );
        anyhow::ensure!(
            !self.telemetry.metric_prefix.trim_matches('/').is_empty(),
            "telemetry metric-prefix must not be empty"
        );

        let mut seen = HashSet::new();
        for route in &self.routes {
            anyhow::ensure!(
                seen.insert(route.id.as_str()),
                "duplicate route id '{}'",
                route.id
            );
            anyhow::ensure!(
                route.path_prefix.starts_with('/'),
                "route '{}': path-prefix must start with '/'",
                route.id
            );
            anyhow::ensure!(
                route.upstream.starts_with("http://") || route.upstream.starts_with("https://"),
                "route '{}': upstream must be an http(s) URL",
                route.id
            );
        }
        Ok(())
    }

    /// Sanitize and normalize configuration.
    fn sanitize(&mut self) {
        self.routes.retain(|r| !r.id.trim().is_empty());
        for route in self.routes.iter_mut() {
            route.id = route.id.trim().to_string();
            while route.upstream.ends_with('/') {
                route.upstream.pop();
            }
            while route.path_prefix.len() > 1 && route.path_prefix.ends_with('/') {
                route.path_prefix.pop();
            }
        }
    }
}

// ─── Sub-configs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct TelemetryConfig {
    pub recorder: RecorderKind,
    pub metric_prefix: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            recorder: RecorderKind::Memory,
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RecorderKind {
    None,
    Memory,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct FilterOrderConfig {
    pub instrumentation_order: i32,
    pub admission_order: i32,
}

impl Default for FilterOrderConfig {
    fn default() -> Self {
        Self {
            instrumentation_order: DEFAULT_INSTRUMENTATION_ORDER,
            admission_order: DEFAULT_ADMISSION_ORDER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests per minute across all clients (0 = unlimited).
    pub global_rpm: u32,
    /// Requests per minute per API key (0 = unlimited).
    pub per_key_rpm: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RouteConfig {
    pub id: String,
    pub path_prefix: String,
    pub upstream: String,
    #[serde(default)]
    pub strip_prefix: bool,
}

// ─── Config Watcher ────────────────────────────────────────────────────────

pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching a config file. On changes (debounced 150ms, SHA256 dedup),
    /// reload the config and atomically swap it in via ArcSwap.
    pub fn start(
        path: String,
        config: Arc<ArcSwap<Config>>,
        on_reload: impl Fn(&Config) + Send + Sync + 'static,
    ) -> Result<Self, anyhow::Error> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res
                && (event.kind.is_modify() || event.kind.is_create())
            {
                let _ = tx.blocking_send(());
            }
        })?;
        watcher.watch(Path::new(&path), RecursiveMode::NonRecursive)?;

        tokio::spawn(async move {
            let mut last_hash: Option<[u8; 32]> = None;
            let mut debounce: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        if msg.is_none() {
                            break;
                        }
                        debounce = Some(tokio::time::Instant::now() + Duration::from_millis(150));
                    }
                    _ = async {
                        match debounce {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        debounce = None;
                        let contents = match std::fs::read(&path) {
                            Ok(contents) => contents,
                            Err(e) => {
                                tracing::error!(path = %path, "Config file read failed: {e}");
                                continue;
                            }
                        };
                        let hash: [u8; 32] = sha2::Sha256::digest(&contents).into();
                        if last_hash.as_ref() == Some(&hash) {
                            continue;
                        }
                        last_hash = Some(hash);

                        match Config::load(&path) {
                            Ok(new_cfg) => {
                                tracing::info!(routes = new_cfg.routes.len(), "Configuration reloaded");
                                on_reload(&new_cfg);
                                config.store(Arc::new(new_cfg));
                            }
                            Err(e) => {
                                tracing::error!("Config reload failed, keeping previous config: {e}");
                            }
                        }
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}
