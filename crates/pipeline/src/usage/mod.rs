//! Usage aggregation: event ingestion and derived statistics

pub mod aggregate;
pub mod aggregator;
pub mod buffer;
pub mod events;

pub use aggregate::{
    DailyNodeRollup, GroupBy, NodeAggregate, SessionRollup, SessionStats, StatsOverview,
    aggregate_nodes, build_overview, daily_rollups, percentile, window_start,
};
pub use aggregator::{SinkError, UsageAggregator, UsageSink};
pub use buffer::{ResponseSample, SampleBuffer};
pub use events::{DropReason, FeedbackKind, SessionRecord, UsageEvent, UsageMetric};
