//! In-process usage aggregator

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use super::aggregate::{
    GroupBy, NodeAggregate, StatsOverview, aggregate_nodes, build_overview, window_start,
};
use super::buffer::{ResponseSample, SampleBuffer};
use super::events::{DropReason, SessionRecord, UsageEvent};
use crate::metrics;

/// Failure reported by a persistence sink
#[derive(Debug, thiserror::Error)]
#[error("usage sink error: {0}")]
pub struct SinkError(pub String);

/// Durable destination for accepted events and session records
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn store_event(&self, event: &UsageEvent) -> Result<(), SinkError>;
    async fn store_session(&self, record: &SessionRecord) -> Result<(), SinkError>;
}

type LogKey = (String, String);

/// Per (node, session) logs holding at most `capacity` events in total;
/// the oldest event overall is evicted first
struct EventLogs {
    by_key: HashMap<LogKey, VecDeque<UsageEvent>>,
    order: VecDeque<LogKey>,
    capacity: usize,
}

impl EventLogs {
    fn new(capacity: usize) -> Self {
        Self {
            by_key: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn push(&mut self, event: UsageEvent) {
        if self.capacity == 0 {
            return;
        }
        let key = (event.node_id.clone(), event.session_id.clone());
        self.order.push_back(key.clone());
        self.by_key.entry(key).or_default().push_back(event);

        while self.order.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(log) = self.by_key.get_mut(&oldest) {
                log.pop_front();
                if log.is_empty() {
                    self.by_key.remove(&oldest);
                }
            }
        }
    }
}

/// Bounded usage logs keyed by (node, session), finished-session records
/// and the shared sample window. Recording never fails; malformed input is
/// counted as dropped.
pub struct UsageAggregator {
    logs: Mutex<EventLogs>,
    /// Insertion-ordered so the oldest record is evicted first
    sessions: Mutex<IndexMap<String, SessionRecord>>,
    session_capacity: usize,
    samples: SampleBuffer,
    dropped: AtomicU64,
    sink: Option<Arc<dyn UsageSink>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl UsageAggregator {
    pub fn new(sample_capacity: usize) -> Self {
        let defaults = crate::config::UsageConfig::default();
        Self {
            logs: Mutex::new(EventLogs::new(defaults.event_capacity)),
            sessions: Mutex::new(IndexMap::new()),
            session_capacity: defaults.session_capacity,
            samples: SampleBuffer::new(sample_capacity),
            dropped: AtomicU64::new(0),
            sink: None,
        }
    }

    pub fn from_config(config: &crate::config::UsageConfig) -> Self {
        Self::new(config.sample_capacity)
            .with_retention(config.event_capacity, config.session_capacity)
    }

    /// Cap the in-memory event logs and session records. The sink, when
    /// present, still receives everything.
    pub fn with_retention(mut self, event_capacity: usize, session_capacity: usize) -> Self {
        self.logs = Mutex::new(EventLogs::new(event_capacity));
        self.session_capacity = session_capacity;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn sample_capacity(&self) -> usize {
        self.samples.capacity()
    }

    /// Record one event. Malformed events are dropped and counted.
    pub fn record(&self, event: UsageEvent) {
        if let Err(reason) = event.validate() {
            self.drop_event(reason);
            return;
        }

        if let Some(sample) = ResponseSample::from_event(&event) {
            self.samples.push(sample);
        }

        tracing::debug!(
            "[USAGE] Recorded {} event for node '{}' in session '{}'",
            event.metric.kind_str(),
            event.node_id,
            event.session_id
        );

        if let Some(sink) = self.sink.clone() {
            let stored = event.clone();
            spawn_sink_write(async move { sink.store_event(&stored).await });
        }

        lock(&self.logs).push(event);
    }

    /// Record an event that arrived as untyped JSON
    pub fn record_raw(&self, value: serde_json::Value) {
        match serde_json::from_value::<UsageEvent>(value) {
            Ok(event) => self.record(event),
            Err(e) => self.drop_event(DropReason::Malformed(e.to_string())),
        }
    }

    /// Record a finished session. A repeated exit replaces the earlier record.
    pub fn record_session(&self, record: SessionRecord) {
        if let Err(reason) = record.validate() {
            self.drop_event(reason);
            return;
        }

        tracing::info!(
            "[USAGE] Session '{}' ended at {:?} ({})",
            record.session_id,
            record.exit_node,
            record.exit_reason.as_str()
        );

        if let Some(sink) = self.sink.clone() {
            let stored = record.clone();
            spawn_sink_write(async move { sink.store_session(&stored).await });
        }

        let mut sessions = lock(&self.sessions);
        sessions.insert(record.session_id.clone(), record);
        while sessions.len() > self.session_capacity {
            sessions.shift_remove_index(0);
        }
    }

    /// Retained record of a finished session
    pub fn session_record(&self, session_id: &str) -> Option<SessionRecord> {
        lock(&self.sessions).get(session_id).cloned()
    }

    /// Count and log an event that could not be aggregated
    pub fn drop_event(&self, reason: DropReason) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::record_usage_dropped();
        tracing::warn!("[USAGE] Dropped usage event: {}", reason);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events recorded at or after `since`, across all logs
    pub fn events_since(&self, since: Option<DateTime<Utc>>) -> Vec<UsageEvent> {
        lock(&self.logs)
            .by_key
            .values()
            .flatten()
            .filter(|e| since.is_none_or(|s| e.timestamp >= s))
            .cloned()
            .collect()
    }

    /// The log of one node within one session
    pub fn node_log(&self, node_id: &str, session_id: &str) -> Vec<UsageEvent> {
        lock(&self.logs)
            .by_key
            .get(&(node_id.to_string(), session_id.to_string()))
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sessions_since(&self, since: Option<DateTime<Utc>>) -> Vec<SessionRecord> {
        lock(&self.sessions)
            .values()
            .filter(|r| since.is_none_or(|s| r.ended_at >= s))
            .cloned()
            .collect()
    }

    /// Current latency window restricted to samples at or after `since`
    pub fn samples_since(&self, since: Option<DateTime<Utc>>) -> Vec<ResponseSample> {
        self.samples
            .snapshot()
            .into_iter()
            .filter(|s| since.is_none_or(|t| s.recorded_at >= t))
            .collect()
    }

    pub fn node_aggregates(&self, window_days: Option<u32>, group_by: GroupBy) -> Vec<NodeAggregate> {
        let since = window_start(window_days);
        aggregate_nodes(&self.events_since(since), &self.samples_since(since), group_by)
    }

    /// Node aggregates and session rollup over a trailing window
    pub fn overview(&self, window_days: Option<u32>, group_by: GroupBy) -> StatsOverview {
        let since = window_start(window_days);
        build_overview(
            window_days,
            &self.events_since(since),
            &self.samples_since(since),
            &self.sessions_since(since),
            group_by,
            self.dropped_count(),
        )
    }
}

impl Default for UsageAggregator {
    fn default() -> Self {
        Self::from_config(&crate::config::UsageConfig::default())
    }
}

/// Run a sink write in the background; failures are logged only
fn spawn_sink_write<F>(write: F)
where
    F: std::future::Future<Output = Result<(), SinkError>> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = write.await {
                    tracing::warn!("[USAGE] Failed to persist usage data: {}", e);
                }
            });
        }
        Err(_) => {
            tracing::debug!("[USAGE] No runtime available, skipping persistence");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::{FeedbackKind, UsageMetric};
    use crate::workflow::ExitReason;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<UsageEvent>>,
        sessions: Mutex<Vec<SessionRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl UsageSink for RecordingSink {
        async fn store_event(&self, event: &UsageEvent) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError("disk full".to_string()));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn store_session(&self, record: &SessionRecord) -> Result<(), SinkError> {
            self.sessions.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn session(id: &str, reason: ExitReason) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: id.to_string(),
            user_id: None,
            visited_nodes: vec!["search".to_string()],
            completed_nodes: vec!["search".to_string()],
            exit_node: Some("search".to_string()),
            exit_reason: reason,
            started_at: now - chrono::Duration::seconds(10),
            ended_at: now,
        }
    }

    #[test]
    fn test_malformed_events_only_increase_dropped_count() {
        let aggregator = UsageAggregator::new(10);
        aggregator.record(UsageEvent::new("search", "s1", UsageMetric::Usage));

        aggregator.record(UsageEvent::new("", "s1", UsageMetric::Usage));
        aggregator.record(UsageEvent::new("search", "s1", UsageMetric::ResponseTime { ms: -1.0 }));
        aggregator.record_raw(json!({"nodeId": "search"}));

        assert_eq!(aggregator.dropped_count(), 3);
        assert_eq!(aggregator.events_since(None).len(), 1);
        assert!(aggregator.samples_since(None).is_empty());
    }

    #[test]
    fn test_logs_are_keyed_by_node_and_session() {
        let aggregator = UsageAggregator::new(10);
        aggregator.record(UsageEvent::new("search", "s1", UsageMetric::Usage));
        aggregator.record(UsageEvent::new("search", "s1", UsageMetric::ResponseTime { ms: 40.0 }));
        aggregator.record(UsageEvent::new("search", "s2", UsageMetric::Usage));

        assert_eq!(aggregator.node_log("search", "s1").len(), 2);
        assert_eq!(aggregator.node_log("search", "s2").len(), 1);
        assert!(aggregator.node_log("draft", "s1").is_empty());
    }

    #[test]
    fn test_overview_combines_nodes_and_sessions() {
        let aggregator = UsageAggregator::new(3);
        for ms in [100.0, 200.0, 300.0, 400.0, 500.0] {
            aggregator.record(UsageEvent::new("draft", "s1", UsageMetric::ResponseTime { ms }));
        }
        aggregator.record(UsageEvent::new("draft", "s1", UsageMetric::Usage));
        aggregator.record(UsageEvent::new(
            "draft",
            "s1",
            UsageMetric::Feedback { feedback: FeedbackKind::Adopt },
        ));
        aggregator.record_session(session("s1", ExitReason::Complete));
        aggregator.record_session(session("s2", ExitReason::Abandon));

        let overview = aggregator.overview(Some(7), GroupBy::Node);

        let draft = &overview.node_aggregates[0];
        // Only the three most recent samples remain in the window
        assert_eq!(draft.sample_count, 3);
        assert_eq!(draft.p50_ms, 400.0);
        assert_eq!(draft.adoption_rate, 1.0);
        assert_eq!(overview.session_rollup.session_count, 2);
        assert_eq!(overview.session_rollup.completion_rate, 0.5);
        assert_eq!(overview.dropped_events, 0);
    }

    #[test]
    fn test_repeated_exit_replaces_session_record() {
        let aggregator = UsageAggregator::new(10);
        aggregator.record_session(session("s1", ExitReason::Abandon));
        aggregator.record_session(session("s1", ExitReason::Complete));

        let sessions = aggregator.sessions_since(None);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].exit_reason, ExitReason::Complete);
    }

    #[test]
    fn test_event_logs_evict_oldest_first() {
        let aggregator = UsageAggregator::new(10).with_retention(3, 10);
        aggregator.record(UsageEvent::new("search", "s1", UsageMetric::Usage));
        aggregator.record(UsageEvent::new("draft", "s1", UsageMetric::Usage));
        aggregator.record(UsageEvent::new("search", "s2", UsageMetric::Usage));
        aggregator.record(UsageEvent::new("search", "s2", UsageMetric::ResponseTime { ms: 20.0 }));

        assert_eq!(aggregator.events_since(None).len(), 3);
        assert!(aggregator.node_log("search", "s1").is_empty());
        assert_eq!(aggregator.node_log("draft", "s1").len(), 1);
        assert_eq!(aggregator.node_log("search", "s2").len(), 2);

        for i in 0..100 {
            aggregator.record(UsageEvent::new("search", format!("bulk-{i}"), UsageMetric::Usage));
        }
        assert_eq!(aggregator.events_since(None).len(), 3);
        assert_eq!(lock(&aggregator.logs).by_key.len(), 3);
    }

    #[test]
    fn test_session_records_are_bounded() {
        let aggregator = UsageAggregator::new(10).with_retention(100, 2);
        aggregator.record_session(session("s1", ExitReason::Complete));
        aggregator.record_session(session("s2", ExitReason::Complete));
        aggregator.record_session(session("s3", ExitReason::Abandon));

        assert_eq!(aggregator.sessions_since(None).len(), 2);
        assert!(aggregator.session_record("s1").is_none());
        assert_eq!(
            aggregator.session_record("s3").map(|r| r.exit_reason),
            Some(ExitReason::Abandon)
        );
    }

    #[tokio::test]
    async fn test_sink_receives_accepted_events() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = UsageAggregator::new(10).with_sink(sink.clone());

        aggregator.record(UsageEvent::new("search", "s1", UsageMetric::Usage));
        aggregator.record(UsageEvent::new("", "s1", UsageMetric::Usage));
        aggregator.record_session(session("s1", ExitReason::Complete));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.events.lock().unwrap().len(), 1);
        assert_eq!(sink.sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_reach_producer() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let aggregator = UsageAggregator::new(10).with_sink(sink);

        aggregator.record(UsageEvent::new("search", "s1", UsageMetric::Usage));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(aggregator.events_since(None).len(), 1);
        assert_eq!(aggregator.dropped_count(), 0);
    }
}
