//! Query-time statistics over usage events and session records
//!
//! Everything here is a pure function of its inputs so the in-memory
//! aggregator and the persisted event store produce identical numbers.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::buffer::ResponseSample;
use super::events::{FeedbackKind, SessionRecord, UsageEvent, UsageMetric};
use crate::workflow::{ExitReason, NodeType, WorkflowContext};

/// Value at percentile `p` (0..=1) of ascending `sorted` samples.
///
/// Uses `index = min(floor(n * p), n - 1)`; an empty slice yields 0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let index = ((n as f64 * p).floor() as usize).min(n - 1);
    sorted[index]
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Grouping key for node aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum GroupBy {
    #[default]
    Node,
    NodeType,
}

/// Derived statistics for one node (or node type)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct NodeAggregate {
    /// Node id, or the node type name when grouped by type
    pub key: String,
    pub node_type: Option<NodeType>,
    pub usage_count: u64,
    pub sample_count: u64,
    pub avg_response_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub likes: u64,
    pub dislikes: u64,
    pub adopts: u64,
    pub edits: u64,
    pub regenerates: u64,
    pub adoption_rate: f64,
    pub edit_rate: f64,
    pub satisfaction_rate: f64,
    pub avg_content_length: f64,
}

#[derive(Default)]
struct NodeAccumulator {
    node_type: Option<NodeType>,
    usage: u64,
    feedback: BTreeMap<&'static str, u64>,
    content_total: f64,
    content_count: u64,
    samples: Vec<f64>,
}

impl NodeAccumulator {
    fn count(&self, kind: FeedbackKind) -> u64 {
        self.feedback.get(kind.as_str()).copied().unwrap_or(0)
    }

    fn finish(mut self, key: String) -> NodeAggregate {
        self.samples.sort_by(|a, b| a.total_cmp(b));
        let sample_count = self.samples.len() as u64;
        let avg_response_ms = if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        };

        let likes = self.count(FeedbackKind::Like);
        let dislikes = self.count(FeedbackKind::Dislike);
        let adopts = self.count(FeedbackKind::Adopt);
        let edits = self.count(FeedbackKind::Edit);

        NodeAggregate {
            key,
            node_type: self.node_type,
            usage_count: self.usage,
            sample_count,
            avg_response_ms,
            p50_ms: percentile(&self.samples, 0.50),
            p95_ms: percentile(&self.samples, 0.95),
            p99_ms: percentile(&self.samples, 0.99),
            likes,
            dislikes,
            adopts,
            edits,
            regenerates: self.count(FeedbackKind::Regenerate),
            adoption_rate: ratio(adopts, self.usage),
            edit_rate: ratio(edits, self.usage),
            satisfaction_rate: ratio(likes, likes + dislikes),
            avg_content_length: if self.content_count == 0 {
                0.0
            } else {
                self.content_total / self.content_count as f64
            },
        }
    }
}

fn group_key(node_id: &str, node_type: Option<NodeType>, group_by: GroupBy) -> String {
    match (group_by, node_type) {
        (GroupBy::NodeType, Some(t)) => t.as_str().to_string(),
        // Events without a type fall back to their node id
        _ => node_id.to_string(),
    }
}

/// Aggregate events per node or node type.
///
/// Counts come from `events`; latency figures come only from `samples`, which
/// is the bounded recent window. Response-time events in `events` are ignored.
pub fn aggregate_nodes<'a>(
    events: impl IntoIterator<Item = &'a UsageEvent>,
    samples: &[ResponseSample],
    group_by: GroupBy,
) -> Vec<NodeAggregate> {
    let mut groups: BTreeMap<String, NodeAccumulator> = BTreeMap::new();

    for event in events {
        let acc = groups
            .entry(group_key(&event.node_id, event.node_type, group_by))
            .or_default();
        if acc.node_type.is_none() {
            acc.node_type = event.node_type;
        }
        match event.metric {
            UsageMetric::Usage => acc.usage += 1,
            UsageMetric::Feedback { feedback } => {
                *acc.feedback.entry(feedback.as_str()).or_insert(0) += 1;
            }
            UsageMetric::ContentLength { chars } => {
                acc.content_total += chars;
                acc.content_count += 1;
            }
            UsageMetric::ResponseTime { .. } => {}
        }
    }

    for sample in samples {
        let acc = groups
            .entry(group_key(&sample.node_id, sample.node_type, group_by))
            .or_default();
        if acc.node_type.is_none() {
            acc.node_type = sample.node_type;
        }
        acc.samples.push(sample.ms);
    }

    groups
        .into_iter()
        .map(|(key, acc)| acc.finish(key))
        .collect()
}

/// Per-session statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub visited_count: usize,
    pub completed_count: usize,
    /// Visited but not completed, in visitation order
    pub skipped_nodes: Vec<String>,
    pub path_efficiency_score: f64,
    pub exit_node: Option<String>,
    pub exit_reason: Option<ExitReason>,
    pub duration_ms: Option<i64>,
}

impl SessionStats {
    fn build(
        session_id: &str,
        visited: &[String],
        completed: &[String],
        exit_node: Option<String>,
        exit_reason: Option<ExitReason>,
        duration_ms: Option<i64>,
    ) -> Self {
        let skipped_nodes = visited
            .iter()
            .filter(|id| !completed.contains(id))
            .cloned()
            .collect();
        let path_efficiency_score = if visited.is_empty() {
            0.0
        } else {
            completed.len() as f64 / visited.len() as f64
        };

        Self {
            session_id: session_id.to_string(),
            visited_count: visited.len(),
            completed_count: completed.len(),
            skipped_nodes,
            path_efficiency_score,
            exit_node,
            exit_reason,
            duration_ms,
        }
    }

    pub fn from_record(record: &SessionRecord) -> Self {
        Self::build(
            &record.session_id,
            &record.visited_nodes,
            &record.completed_nodes,
            record.exit_node.clone(),
            Some(record.exit_reason),
            Some((record.ended_at - record.started_at).num_milliseconds()),
        )
    }

    /// Stats of a live or ended session
    pub fn from_context(context: &WorkflowContext) -> Self {
        let visited: Vec<String> = context.visited_nodes.iter().cloned().collect();
        let completed: Vec<String> = context.completed_nodes.iter().cloned().collect();
        let ended_at = context.exit.as_ref().map(|e| e.ended_at).unwrap_or_else(Utc::now);
        Self::build(
            &context.session_id,
            &visited,
            &completed,
            context.exit.as_ref().and_then(|e| e.exit_node.clone()),
            context.exit.as_ref().map(|e| e.reason),
            Some((ended_at - context.started_at).num_milliseconds()),
        )
    }
}

/// Rollup across finished sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionRollup {
    pub session_count: u64,
    pub completed_sessions: u64,
    pub completion_rate: f64,
    pub avg_path_efficiency: f64,
    pub avg_duration_ms: f64,
    /// Sessions per exit node
    pub exit_points: BTreeMap<String, u64>,
    /// Sessions per exit reason
    pub exit_reasons: BTreeMap<String, u64>,
}

impl SessionRollup {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a SessionRecord>) -> Self {
        let mut rollup = SessionRollup::default();
        let mut efficiency_total = 0.0;
        let mut duration_total = 0.0;

        for record in records {
            let stats = SessionStats::from_record(record);
            rollup.session_count += 1;
            if record.exit_reason == ExitReason::Complete {
                rollup.completed_sessions += 1;
            }
            efficiency_total += stats.path_efficiency_score;
            duration_total += stats.duration_ms.unwrap_or(0).max(0) as f64;
            if let Some(node) = &record.exit_node {
                *rollup.exit_points.entry(node.clone()).or_insert(0) += 1;
            }
            *rollup
                .exit_reasons
                .entry(record.exit_reason.as_str().to_string())
                .or_insert(0) += 1;
        }

        if rollup.session_count > 0 {
            let n = rollup.session_count as f64;
            rollup.completion_rate = rollup.completed_sessions as f64 / n;
            rollup.avg_path_efficiency = efficiency_total / n;
            rollup.avg_duration_ms = duration_total / n;
        }
        rollup
    }
}

/// Aggregate of one node over one UTC day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct DailyNodeRollup {
    pub date: NaiveDate,
    pub aggregate: NodeAggregate,
}

/// Group events into per-day, per-node aggregates, oldest day first.
///
/// Each day's latency figures use at most `sample_capacity` of that day's
/// most recent response-time samples.
pub fn daily_rollups<'a>(
    events: impl IntoIterator<Item = &'a UsageEvent>,
    sample_capacity: usize,
) -> Vec<DailyNodeRollup> {
    let mut days: BTreeMap<NaiveDate, Vec<&UsageEvent>> = BTreeMap::new();
    for event in events {
        days.entry(event.timestamp.date_naive()).or_default().push(event);
    }

    days.into_iter()
        .flat_map(|(date, day_events)| {
            let samples = ResponseSample::window(day_events.iter().copied(), sample_capacity);
            aggregate_nodes(day_events, &samples, GroupBy::Node)
                .into_iter()
                .map(move |aggregate| DailyNodeRollup { date, aggregate })
        })
        .collect()
}

/// Answer to a stats overview query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct StatsOverview {
    pub window_days: Option<u32>,
    pub generated_at: DateTime<Utc>,
    pub node_aggregates: Vec<NodeAggregate>,
    pub session_rollup: SessionRollup,
    pub dropped_events: u64,
}

/// Start of a trailing window of `days` ending now; `None` means all time
pub fn window_start(days: Option<u32>) -> Option<DateTime<Utc>> {
    days.map(|d| Utc::now() - chrono::Duration::days(i64::from(d.max(1))))
}

/// Build an overview from raw inputs already restricted to the window
pub fn build_overview(
    window_days: Option<u32>,
    events: &[UsageEvent],
    samples: &[ResponseSample],
    sessions: &[SessionRecord],
    group_by: GroupBy,
    dropped_events: u64,
) -> StatsOverview {
    StatsOverview {
        window_days,
        generated_at: Utc::now(),
        node_aggregates: aggregate_nodes(events, samples, group_by),
        session_rollup: SessionRollup::from_records(sessions),
        dropped_events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(node: &str, metric: UsageMetric) -> UsageEvent {
        UsageEvent::new(node, "s1", metric)
    }

    fn sample(node: &str, ms: f64) -> ResponseSample {
        ResponseSample {
            node_id: node.to_string(),
            node_type: None,
            ms,
            recorded_at: Utc::now(),
        }
    }

    fn record(visited: &[&str], completed: &[&str], exit: Option<&str>, reason: ExitReason) -> SessionRecord {
        let started_at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        SessionRecord {
            session_id: "s1".to_string(),
            user_id: None,
            visited_nodes: visited.iter().map(|s| s.to_string()).collect(),
            completed_nodes: completed.iter().map(|s| s.to_string()).collect(),
            exit_node: exit.map(|s| s.to_string()),
            exit_reason: reason,
            started_at,
            ended_at: started_at + chrono::Duration::seconds(90),
        }
    }

    #[test]
    fn test_percentiles() {
        let sorted = [100.0, 200.0, 300.0, 400.0, 500.0];
        assert_eq!(percentile(&sorted, 0.50), 300.0);
        assert_eq!(percentile(&sorted, 0.95), 500.0);
        assert_eq!(percentile(&sorted, 0.99), 500.0);
        assert_eq!(percentile(&sorted, 0.0), 100.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_node_aggregate_rates() {
        let events = vec![
            event("draft", UsageMetric::Usage),
            event("draft", UsageMetric::Usage),
            event("draft", UsageMetric::Usage),
            event("draft", UsageMetric::Usage),
            event("draft", UsageMetric::Feedback { feedback: FeedbackKind::Adopt }),
            event("draft", UsageMetric::Feedback { feedback: FeedbackKind::Edit }),
            event("draft", UsageMetric::Feedback { feedback: FeedbackKind::Edit }),
            event("draft", UsageMetric::Feedback { feedback: FeedbackKind::Like }),
            event("draft", UsageMetric::Feedback { feedback: FeedbackKind::Like }),
            event("draft", UsageMetric::Feedback { feedback: FeedbackKind::Like }),
            event("draft", UsageMetric::Feedback { feedback: FeedbackKind::Dislike }),
            event("draft", UsageMetric::ContentLength { chars: 100.0 }),
            event("draft", UsageMetric::ContentLength { chars: 300.0 }),
        ];
        let samples: Vec<_> = [500.0, 100.0, 300.0, 200.0, 400.0]
            .into_iter()
            .map(|ms| sample("draft", ms))
            .collect();

        let aggregates = aggregate_nodes(&events, &samples, GroupBy::Node);
        assert_eq!(aggregates.len(), 1);
        let draft = &aggregates[0];

        assert_eq!(draft.key, "draft");
        assert_eq!(draft.usage_count, 4);
        assert_eq!(draft.adoption_rate, 0.25);
        assert_eq!(draft.edit_rate, 0.5);
        assert_eq!(draft.satisfaction_rate, 0.75);
        assert_eq!(draft.avg_content_length, 200.0);
        assert_eq!(draft.avg_response_ms, 300.0);
        assert_eq!(draft.p50_ms, 300.0);
        assert_eq!(draft.sample_count, 5);
    }

    #[test]
    fn test_rates_are_zero_without_usage() {
        let events = vec![event("search", UsageMetric::Feedback { feedback: FeedbackKind::Adopt })];
        let aggregates = aggregate_nodes(&events, &[], GroupBy::Node);

        assert_eq!(aggregates[0].adoption_rate, 0.0);
        assert_eq!(aggregates[0].edit_rate, 0.0);
        assert_eq!(aggregates[0].satisfaction_rate, 0.0);
        assert_eq!(aggregates[0].p99_ms, 0.0);
    }

    #[test]
    fn test_group_by_node_type() {
        let events = vec![
            event("draft-a", UsageMetric::Usage).with_node_type(NodeType::Draft),
            event("draft-b", UsageMetric::Usage).with_node_type(NodeType::Draft),
            event("search", UsageMetric::Usage).with_node_type(NodeType::Search),
        ];

        let by_type = aggregate_nodes(&events, &[], GroupBy::NodeType);
        let keys: Vec<_> = by_type.iter().map(|a| (a.key.as_str(), a.usage_count)).collect();
        assert_eq!(keys, vec![("draft", 2), ("search", 1)]);

        let by_node = aggregate_nodes(&events, &[], GroupBy::Node);
        assert_eq!(by_node.len(), 3);
    }

    #[test]
    fn test_abandoned_session_stats() {
        let stats = SessionStats::from_record(&record(
            &["A", "B", "C"],
            &["A", "B"],
            Some("C"),
            ExitReason::Abandon,
        ));

        assert_eq!(stats.visited_count, 3);
        assert_eq!(stats.completed_count, 2);
        assert_eq!(stats.skipped_nodes, vec!["C".to_string()]);
        assert!((stats.path_efficiency_score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.duration_ms, Some(90_000));
    }

    #[test]
    fn test_empty_session_efficiency_is_zero() {
        let stats = SessionStats::from_context(&WorkflowContext::new("empty"));
        assert_eq!(stats.path_efficiency_score, 0.0);
        assert!(stats.skipped_nodes.is_empty());
        assert!(stats.exit_reason.is_none());
    }

    #[test]
    fn test_session_rollup() {
        let records = vec![
            record(&["A", "B"], &["A", "B"], Some("B"), ExitReason::Complete),
            record(&["A", "B", "C"], &["A", "B"], Some("C"), ExitReason::Abandon),
            record(&[], &[], None, ExitReason::Timeout),
            record(&["A"], &[], Some("C"), ExitReason::Abandon),
        ];

        let rollup = SessionRollup::from_records(&records);
        assert_eq!(rollup.session_count, 4);
        assert_eq!(rollup.completed_sessions, 1);
        assert_eq!(rollup.completion_rate, 0.25);
        assert_eq!(rollup.exit_points.get("C"), Some(&2));
        assert_eq!(rollup.exit_points.get("B"), Some(&1));
        assert_eq!(rollup.exit_reasons.get("abandon"), Some(&2));
        assert_eq!(rollup.avg_duration_ms, 90_000.0);
        let expected_efficiency = (1.0 + 2.0 / 3.0 + 0.0 + 0.0) / 4.0;
        assert!((rollup.avg_path_efficiency - expected_efficiency).abs() < 1e-9);
    }

    #[test]
    fn test_daily_rollups_split_by_utc_day() {
        let day1 = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
        let events = vec![
            event("search", UsageMetric::Usage).at(day1),
            event("search", UsageMetric::ResponseTime { ms: 120.0 }).at(day1),
            event("search", UsageMetric::Usage).at(day2),
            event("draft", UsageMetric::Usage).at(day2),
        ];

        let rollups = daily_rollups(&events, 1000);
        let keys: Vec<_> = rollups
            .iter()
            .map(|r| (r.date.to_string(), r.aggregate.key.clone(), r.aggregate.usage_count))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("2026-03-01".to_string(), "search".to_string(), 1),
                ("2026-03-02".to_string(), "draft".to_string(), 1),
                ("2026-03-02".to_string(), "search".to_string(), 1),
            ]
        );
        assert_eq!(rollups[0].aggregate.p50_ms, 120.0);
    }
}
