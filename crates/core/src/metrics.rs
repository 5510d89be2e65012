use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use crate::recorder::{MetricsRecorder, RecorderError};

/// Number of reported errors kept for the snapshot.
const RECENT_ERRORS_CAPACITY: usize = 50;

/// In-process recorder backed by atomic counters.
///
/// Serves the `/metrics` endpoint when no external agent is configured.
pub struct InMemoryRecorder {
    counters: RwLock<HashMap<String, AtomicU64>>,
    durations: RwLock<HashMap<String, DurationStats>>,
    errors_reported: AtomicU64,
    recent_errors: Mutex<VecDeque<ErrorEntry>>,
    created_at: Instant,
}

/// Latency histogram buckets (ms): <100, <500, <1000, <5000, <30000, >=30000.
struct DurationStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
    buckets: [AtomicU64; 6],
}

impl DurationStats {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            max_ms: AtomicU64::new(0),
            buckets: Default::default(),
        }
    }

    fn observe(&self, ms: u64) {
        let bucket = match ms {
            0..=99 => 0,
            100..=499 => 1,
            500..=999 => 2,
            1000..=4999 => 3,
            5000..=29999 => 4,
            _ => 5,
        };
        if let Some(b) = self.buckets.get(bucket) {
            b.fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn summary(&self) -> DurationSummary {
        DurationSummary {
            count: self.count.load(Ordering::Relaxed),
            total_ms: self.total_ms.load(Ordering::Relaxed),
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let summary = self.summary();
        let avg = if summary.count > 0 {
            summary.total_ms as f64 / summary.count as f64
        } else {
            0.0
        };
        let b: Vec<u64> = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();
        serde_json::json!({
            "count": summary.count,
            "total_ms": summary.total_ms,
            "max_ms": summary.max_ms,
            "avg_ms": avg,
            "buckets": {
                "<100": b.first(),
                "100-499": b.get(1),
                "500-999": b.get(2),
                "1000-4999": b.get(3),
                "5000-29999": b.get(4),
                ">=30000": b.get(5),
            },
        })
    }
}

/// Point-in-time view of one duration series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSummary {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

struct ErrorEntry {
    timestamp: i64,
    message: String,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            durations: RwLock::new(HashMap::new()),
            errors_reported: AtomicU64::new(0),
            recent_errors: Mutex::new(VecDeque::with_capacity(RECENT_ERRORS_CAPACITY)),
            created_at: Instant::now(),
        }
    }

    /// Current value of a counter, zero when never recorded.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .ok()
            .and_then(|m| m.get(name).map(|c| c.load(Ordering::Relaxed)))
            .unwrap_or(0)
    }

    pub fn duration(&self, name: &str) -> Option<DurationSummary> {
        self.durations
            .read()
            .ok()
            .and_then(|m| m.get(name).map(DurationStats::summary))
    }

    pub fn errors_reported(&self) -> u64 {
        self.errors_reported.load(Ordering::Relaxed)
    }

    /// Snapshot current metrics as a JSON-serializable value.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut counters = serde_json::Map::new();
        if let Ok(m) = self.counters.read() {
            for (k, v) in m.iter() {
                counters.insert(k.clone(), v.load(Ordering::Relaxed).into());
            }
        }

        let mut durations = serde_json::Map::new();
        if let Ok(m) = self.durations.read() {
            for (k, v) in m.iter() {
                durations.insert(k.clone(), v.to_json());
            }
        }

        let recent: Vec<serde_json::Value> = match self.recent_errors.lock() {
            Ok(errors) => errors
                .iter()
                .map(|e| serde_json::json!({"timestamp": e.timestamp, "message": e.message}))
                .collect(),
            Err(_) => Vec::new(),
        };

        serde_json::json!({
            "counters": counters,
            "durations": durations,
            "errors_reported": self.errors_reported(),
            "recent_errors": recent,
            "uptime_seconds": self.created_at.elapsed().as_secs(),
        })
    }
}

impl Default for InMemoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder for InMemoryRecorder {
    fn record_counter(&self, name: &str, value: u64) -> Result<(), RecorderError> {
        // Fast path: read lock
        if let Ok(m) = self.counters.read()
            && let Some(counter) = m.get(name)
        {
            counter.fetch_add(value, Ordering::Relaxed);
            return Ok(());
        }
        // Slow path: write lock to insert
        let mut m = self
            .counters
            .write()
            .map_err(|_| RecorderError::Other("counter map poisoned".into()))?;
        m.entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
        Ok(())
    }

    fn record_duration(&self, name: &str, millis: u64) -> Result<(), RecorderError> {
        if let Ok(m) = self.durations.read()
            && let Some(stats) = m.get(name)
        {
            stats.observe(millis);
            return Ok(());
        }
        let mut m = self
            .durations
            .write()
            .map_err(|_| RecorderError::Other("duration map poisoned".into()))?;
        m.entry(name.to_string())
            .or_insert_with(DurationStats::new)
            .observe(millis);
        Ok(())
    }

    fn report_error(&self, error: &(dyn StdError + Send + Sync)) -> Result<(), RecorderError> {
        self.errors_reported.fetch_add(1, Ordering::Relaxed);
        let mut recent = self
            .recent_errors
            .lock()
            .map_err(|_| RecorderError::Other("error log poisoned".into()))?;
        if recent.len() == RECENT_ERRORS_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(ErrorEntry {
            timestamp: chrono::Utc::now().timestamp_millis(),
            message: error.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;

    #[test]
    fn test_counters_and_durations() {
        let m = InMemoryRecorder::new();
        m.record_counter("total", 1).unwrap();
        m.record_counter("total", 1).unwrap();
        m.record_counter("route/a", 3).unwrap();
        m.record_duration("latency", 50).unwrap();
        m.record_duration("latency", 250).unwrap();
        m.record_duration("latency", 5000).unwrap();

        assert_eq!(m.counter("total"), 2);
        assert_eq!(m.counter("route/a"), 3);
        assert_eq!(m.counter("missing"), 0);

        let d = m.duration("latency").unwrap();
        assert_eq!(d.count, 3);
        assert_eq!(d.total_ms, 5300);
        assert_eq!(d.max_ms, 5000);

        let snap = m.snapshot();
        assert_eq!(snap["counters"]["total"], 2);
        assert_eq!(snap["durations"]["latency"]["buckets"]["<100"], 1);
        assert_eq!(snap["durations"]["latency"]["buckets"]["100-499"], 1);
        assert_eq!(snap["durations"]["latency"]["buckets"]["5000-29999"], 1);
    }

    #[test]
    fn test_recent_errors_bounded() {
        let m = InMemoryRecorder::new();
        for i in 0..(RECENT_ERRORS_CAPACITY + 5) {
            m.report_error(&GatewayError::Internal(format!("e{i}")))
                .unwrap();
        }
        assert_eq!(m.errors_reported(), (RECENT_ERRORS_CAPACITY + 5) as u64);

        let snap = m.snapshot();
        let recent = snap["recent_errors"].as_array().unwrap();
        assert_eq!(recent.len(), RECENT_ERRORS_CAPACITY);
        assert_eq!(recent[0]["message"], "internal error: e5");
    }
}
