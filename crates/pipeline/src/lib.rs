//! Content pipeline core
//!
//! Walks a request through the search, package, strategize, draft and publish
//! stages, delegating each one to an external generative service, and
//! aggregates usage, feedback and session signals per stage.
//!
//! ```text
//! caller -> PipelineService -> StageExecutor -> StepGateway -> stage service
//!                |                  |
//!                |                  +-> UsageAggregator (usage, latency, length)
//!                +-> RecommendationEngine (next steps)
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod service;
pub mod usage;
pub mod workflow;

pub use config::{
    ConfigError, GatewayConfig, PipelineConfig, RecommendationWeights, SessionConfig, UsageConfig,
};
pub use error::{Result, StageError, StageErrorKind};
pub use gateway::{GatewayPolicy, HttpTransport, StageTransport, StepGateway};
pub use service::{ExecuteStageResponse, PipelineService, SessionInfo, StageErrorBody};
pub use usage::{
    GroupBy, SessionRecord, SessionStats, StatsOverview, UsageAggregator, UsageEvent, UsageSink,
};
pub use workflow::{
    ExitReason, NodeType, Recommendation, StageInputs, StageOutput, WorkflowContext,
    WorkflowGraph, WorkflowNode,
};
