//! Live session registry

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::WorkflowContext;

/// One live session: its context and the token that aborts its executions
#[derive(Debug)]
pub struct SessionHandle {
    session_id: String,
    context: Mutex<WorkflowContext>,
    cancel: Mutex<CancellationToken>,
    last_active: Mutex<Instant>,
}

impl SessionHandle {
    pub fn new(context: WorkflowContext) -> Self {
        Self {
            session_id: context.session_id.clone(),
            context: Mutex::new(context),
            cancel: Mutex::new(CancellationToken::new()),
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Every context access counts as activity
    fn context(&self) -> MutexGuard<'_, WorkflowContext> {
        *self.last_active.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
        self.context.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed()
    }

    /// Run `f` with exclusive access to the context. Never held across an await.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut WorkflowContext) -> R) -> R {
        let mut context = self.context();
        f(&mut *context)
    }

    pub fn snapshot(&self) -> WorkflowContext {
        self.context().clone()
    }

    /// Token for one execution; cancelled when the session is aborted
    pub fn child_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .child_token()
    }

    /// Cancel every pending execution and arm a fresh token for later ones
    pub fn abort(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(|p| p.into_inner());
        cancel.cancel();
        *cancel = CancellationToken::new();
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session with a generated id
    pub fn start(&self, user_id: Option<String>) -> Arc<SessionHandle> {
        let mut context = WorkflowContext::new(Uuid::new_v4().to_string());
        context.user_id = user_id;
        let handle = Arc::new(SessionHandle::new(context));
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(handle.session_id().to_string(), handle.clone());
        handle
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Existing session, or a new one under the caller's id
    pub fn get_or_create(&self, session_id: &str) -> Arc<SessionHandle> {
        if let Some(handle) = self.get(session_id) {
            return handle;
        }
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionHandle::new(WorkflowContext::new(session_id))))
            .clone()
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(session_id)
    }

    /// Remove and return every session idle for at least `max_idle`
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, handle)| handle.idle_for() >= max_idle)
            .map(|(id, _)| id.clone())
            .collect();
        idle.iter().filter_map(|id| sessions.remove(id)).collect()
    }

    pub fn live_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_generates_unique_sessions() {
        let registry = SessionRegistry::new();
        let a = registry.start(Some("u1".to_string()));
        let b = registry.start(None);

        assert_ne!(a.session_id(), b.session_id());
        assert_eq!(a.snapshot().user_id.as_deref(), Some("u1"));
        assert_eq!(registry.live_count(), 2);
    }

    #[test]
    fn test_get_or_create_reuses_existing() {
        let registry = SessionRegistry::new();
        let first = registry.get_or_create("s1");
        first.with_context(|ctx| ctx.mark_visited("search"));

        let second = registry.get_or_create("s1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.snapshot().visited_nodes.len(), 1);
    }

    #[test]
    fn test_remove_drops_the_handle() {
        let registry = SessionRegistry::new();
        registry.get_or_create("s1");

        assert!(registry.remove("s1").is_some());
        assert!(registry.get("s1").is_none());
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_evict_idle_keeps_recent_sessions() {
        let registry = SessionRegistry::new();
        registry.get_or_create("s1");
        registry.get_or_create("s2");

        assert!(registry.evict_idle(Duration::from_secs(3600)).is_empty());
        assert_eq!(registry.live_count(), 2);

        let evicted = registry.evict_idle(Duration::ZERO);
        assert_eq!(evicted.len(), 2);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_abort_cancels_outstanding_tokens_only() {
        let handle = SessionHandle::new(WorkflowContext::new("s1"));
        let before = handle.child_token();

        handle.abort();
        let after = handle.child_token();

        assert!(before.is_cancelled());
        assert!(!after.is_cancelled());
    }
}
