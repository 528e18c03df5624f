use std::sync::Arc;

use db::DBService;
use pipeline::PipelineService;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PipelineService>,
    /// Durable usage store; `None` keeps statistics in memory only
    pub store: Option<DBService>,
    pub sample_capacity: usize,
}

impl AppState {
    pub fn new(service: Arc<PipelineService>, store: Option<DBService>, sample_capacity: usize) -> Self {
        Self {
            service,
            store,
            sample_capacity,
        }
    }

    pub fn service(&self) -> &PipelineService {
        &self.service
    }
}
