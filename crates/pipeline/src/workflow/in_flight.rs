//! In-flight markers for (session, node) pairs

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::StageError;

type PairKey = (String, String);

/// Tracks which (session, node) pairs currently have an execution running
#[derive(Debug, Default, Clone)]
pub struct InFlightRegistry {
    pairs: Arc<Mutex<HashSet<PairKey>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PairKey>> {
        // A panic while holding the lock cannot leave the set half-updated
        self.pairs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the pair, or fail with `AlreadyRunning` if it is held.
    /// The marker is released when the returned guard is dropped.
    pub fn try_acquire(&self, session_id: &str, node_id: &str) -> Result<InFlightGuard, StageError> {
        let key = (session_id.to_string(), node_id.to_string());
        let mut pairs = self.lock();
        if !pairs.insert(key.clone()) {
            return Err(StageError::AlreadyRunning {
                session_id: session_id.to_string(),
                node_id: node_id.to_string(),
            });
        }
        Ok(InFlightGuard {
            registry: self.clone(),
            key: Some(key),
        })
    }

    pub fn is_running(&self, session_id: &str, node_id: &str) -> bool {
        self.lock()
            .contains(&(session_id.to_string(), node_id.to_string()))
    }

    /// Node ids currently running for a session
    pub fn running_for_session(&self, session_id: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(s, _)| s == session_id)
            .map(|(_, n)| n.clone())
            .collect()
    }

    fn release(&self, key: &PairKey) {
        self.lock().remove(key);
    }
}

/// RAII marker for a running execution
#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlightRegistry,
    key: Option<PairKey>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.registry.release(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let registry = InFlightRegistry::new();
        let _guard = registry.try_acquire("s1", "draft").unwrap();

        let err = registry.try_acquire("s1", "draft").unwrap_err();
        assert_eq!(
            err,
            StageError::AlreadyRunning {
                session_id: "s1".to_string(),
                node_id: "draft".to_string()
            }
        );
    }

    #[test]
    fn test_distinct_pairs_do_not_conflict() {
        let registry = InFlightRegistry::new();
        let _a = registry.try_acquire("s1", "draft").unwrap();
        let _b = registry.try_acquire("s1", "search").unwrap();
        let _c = registry.try_acquire("s2", "draft").unwrap();

        let mut running = registry.running_for_session("s1");
        running.sort();
        assert_eq!(running, vec!["draft", "search"]);
    }

    #[test]
    fn test_drop_releases_marker() {
        let registry = InFlightRegistry::new();
        {
            let _guard = registry.try_acquire("s1", "draft").unwrap();
            assert!(registry.is_running("s1", "draft"));
        }
        assert!(!registry.is_running("s1", "draft"));
        assert!(registry.try_acquire("s1", "draft").is_ok());
    }
}
