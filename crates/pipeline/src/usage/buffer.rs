//! Bounded window of recent response-time samples

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{UsageEvent, UsageMetric};
use crate::workflow::NodeType;

/// One response-time observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSample {
    pub node_id: String,
    pub node_type: Option<NodeType>,
    pub ms: f64,
    pub recorded_at: DateTime<Utc>,
}

impl ResponseSample {
    pub fn from_event(event: &UsageEvent) -> Option<Self> {
        match event.metric {
            UsageMetric::ResponseTime { ms } => Some(Self {
                node_id: event.node_id.clone(),
                node_type: event.node_type,
                ms,
                recorded_at: event.timestamp,
            }),
            _ => None,
        }
    }

    /// The `capacity` most recent samples among `events`, oldest first
    pub fn window<'a>(events: impl IntoIterator<Item = &'a UsageEvent>, capacity: usize) -> Vec<Self> {
        let mut samples: Vec<Self> = events.into_iter().filter_map(Self::from_event).collect();
        samples.sort_by_key(|s| s.recorded_at);
        if samples.len() > capacity {
            samples.drain(..samples.len() - capacity);
        }
        samples
    }
}

/// FIFO ring buffer shared by every session in the process
#[derive(Debug)]
pub struct SampleBuffer {
    capacity: usize,
    samples: Mutex<VecDeque<ResponseSample>>,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample, evicting the oldest when full
    pub fn push(&self, sample: ResponseSample) {
        if self.capacity == 0 {
            return;
        }
        let mut samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        while samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current window, oldest first
    pub fn snapshot(&self) -> Vec<ResponseSample> {
        self.samples
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
