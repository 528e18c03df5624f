//! Stage orchestration: the node graph, per-session context, execution and
//! next-step recommendations

pub mod executor;
pub mod graph;
pub mod in_flight;
pub mod payload;
pub mod recommend;
pub mod session;
pub mod types;

pub use executor::{StageExecutor, StagePhase, validate_inputs};
pub use graph::WorkflowGraph;
pub use in_flight::{InFlightGuard, InFlightRegistry};
pub use payload::build_payload;
pub use recommend::{Recommendation, RecommendationEngine};
pub use session::{SessionHandle, SessionRegistry};
pub use types::{
    Channel, ExitReason, NodeType, SessionExit, StageInputs, StageOutput, StageResult,
    WorkflowContext, WorkflowNode,
};
