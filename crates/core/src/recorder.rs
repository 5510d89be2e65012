//! Telemetry recording interface.
//!
//! The gateway talks to its telemetry sink only through [`MetricsRecorder`].
//! Every call goes through [`Telemetry`], which makes emission best-effort: an
//! `Err` from the recorder and a panic inside it are both swallowed, so a
//! missing or broken agent behaves exactly like the [`NoopRecorder`].

use std::error::Error as StdError;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Default namespace for all gateway metrics.
pub const DEFAULT_METRIC_PREFIX: &str = "Custom/Gateway";

/// Failure raised by a recorder while emitting a metric.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("telemetry agent unavailable")]
    Unavailable,

    #[error("metric {0} rejected by recorder")]
    Rejected(String),

    #[error("recorder error: {0}")]
    Other(String),
}

/// Sink for counters, duration measurements and error reports.
///
/// Implementations must be thread-safe; the gateway calls them concurrently
/// from every in-flight request without any ordering guarantee.
pub trait MetricsRecorder: Send + Sync {
    fn record_counter(&self, name: &str, value: u64) -> Result<(), RecorderError>;

    fn record_duration(&self, name: &str, millis: u64) -> Result<(), RecorderError>;

    fn report_error(&self, error: &(dyn StdError + Send + Sync)) -> Result<(), RecorderError>;
}

/// Recorder used when no telemetry agent is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn record_counter(&self, _name: &str, _value: u64) -> Result<(), RecorderError> {
        Ok(())
    }

    fn record_duration(&self, _name: &str, _millis: u64) -> Result<(), RecorderError> {
        Ok(())
    }

    fn report_error(&self, _error: &(dyn StdError + Send + Sync)) -> Result<(), RecorderError> {
        Ok(())
    }
}

/// Recorder that emits every metric as a structured `tracing` event under the
/// `route_meter::telemetry` target, for log-shipping agents.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl MetricsRecorder for LogRecorder {
    fn record_counter(&self, name: &str, value: u64) -> Result<(), RecorderError> {
        tracing::info!(target: "route_meter::telemetry", metric = name, value, kind = "counter");
        Ok(())
    }

    fn record_duration(&self, name: &str, millis: u64) -> Result<(), RecorderError> {
        tracing::info!(target: "route_meter::telemetry", metric = name, millis, kind = "duration");
        Ok(())
    }

    fn report_error(&self, error: &(dyn StdError + Send + Sync)) -> Result<(), RecorderError> {
        tracing::warn!(target: "route_meter::telemetry", error = %error, kind = "error");
        Ok(())
    }
}

/// Metric names under a stable prefix. Dashboards key on these strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricNames {
    prefix: String,
}

impl MetricNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        while prefix.ends_with('/') {
            prefix.pop();
        }
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn requests_total(&self) -> String {
        format!("{}/Requests/Total", self.prefix)
    }

    pub fn requests_success(&self) -> String {
        format!("{}/Requests/Success", self.prefix)
    }

    pub fn requests_error(&self) -> String {
        format!("{}/Requests/Error", self.prefix)
    }

    pub fn route_count(&self, route: &str) -> String {
        format!("{}/Routes/{route}/Count", self.prefix)
    }

    pub fn route_duration(&self, route: &str) -> String {
        format!("{}/Routes/{route}/Duration", self.prefix)
    }
}

impl Default for MetricNames {
    fn default() -> Self {
        Self::new(DEFAULT_METRIC_PREFIX)
    }
}

/// Best-effort handle over a shared recorder.
///
/// None of the methods return errors. Cloning is cheap.
#[derive(Clone)]
pub struct Telemetry {
    recorder: Arc<dyn MetricsRecorder>,
    names: MetricNames,
}

impl Telemetry {
    pub fn new(recorder: Arc<dyn MetricsRecorder>, names: MetricNames) -> Self {
        Self { recorder, names }
    }

    /// Telemetry backed by [`NoopRecorder`].
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopRecorder), MetricNames::default())
    }

    pub fn names(&self) -> &MetricNames {
        &self.names
    }

    pub fn counter(&self, name: &str, value: u64) {
        best_effort("counter", name, || self.recorder.record_counter(name, value));
    }

    pub fn duration(&self, name: &str, millis: u64) {
        best_effort("duration", name, || {
            self.recorder.record_duration(name, millis)
        });
    }

    pub fn error(&self, error: &(dyn StdError + Send + Sync)) {
        best_effort("error", "error", || self.recorder.report_error(error));
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("prefix", &self.names.prefix)
            .finish_non_exhaustive()
    }
}

fn best_effort<F>(op: &'static str, metric: &str, emit: F)
where
    F: FnOnce() -> Result<(), RecorderError>,
{
    match catch_unwind(AssertUnwindSafe(emit)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::debug!(op, metric, error = %e, "Telemetry emission failed");
        }
        Err(_) => {
            tracing::debug!(op, metric, "Telemetry recorder panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;

    struct FailingRecorder;

    impl MetricsRecorder for FailingRecorder {
        fn record_counter(&self, _name: &str, _value: u64) -> Result<(), RecorderError> {
            Err(RecorderError::Unavailable)
        }

        fn record_duration(&self, name: &str, _millis: u64) -> Result<(), RecorderError> {
            Err(RecorderError::Rejected(name.to_string()))
        }

        fn report_error(&self, _error: &(dyn StdError + Send + Sync)) -> Result<(), RecorderError> {
            panic!("agent not loaded");
        }
    }

    #[test]
    fn test_metric_names() {
        let names = MetricNames::default();
        assert_eq!(names.requests_total(), "Custom/Gateway/Requests/Total");
        assert_eq!(names.requests_success(), "Custom/Gateway/Requests/Success");
        assert_eq!(names.requests_error(), "Custom/Gateway/Requests/Error");
        assert_eq!(
            names.route_count("orders-api"),
            "Custom/Gateway/Routes/orders-api/Count"
        );
        assert_eq!(
            names.route_duration("orders-api"),
            "Custom/Gateway/Routes/orders-api/Duration"
        );
    }

    #[test]
    fn test_metric_prefix_trailing_slash() {
        let names = MetricNames::new("Edge/");
        assert_eq!(names.prefix(), "Edge");
        assert_eq!(names.requests_total(), "Edge/Requests/Total");
    }

    #[test]
    fn test_failing_recorder_is_swallowed() {
        let telemetry = Telemetry::new(Arc::new(FailingRecorder), MetricNames::default());
        telemetry.counter("a", 1);
        telemetry.duration("b", 10);
        telemetry.error(&GatewayError::Cancelled);
    }

    #[test]
    fn test_disabled_telemetry_no_panic() {
        let telemetry = Telemetry::disabled();
        telemetry.counter("a", 1);
        telemetry.duration("b", 10);
        telemetry.error(&GatewayError::Internal("boom".into()));
    }
}
