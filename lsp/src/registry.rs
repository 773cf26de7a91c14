//! Root → session map.
//!
//! Not synchronized itself; the manager wraps it in a mutex held only for
//! the duration of one call.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::session::Session;
use crate::types::{SessionId, WorkspaceRoot};

#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: BTreeMap<WorkspaceRoot, Arc<Session>>,
}

impl SessionRegistry {
    pub fn get(&self, root: &WorkspaceRoot) -> Option<Arc<Session>> {
        self.sessions.get(root).cloned()
    }

    /// Unconditional insert; returns the replaced session, if any.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn set(&mut self, root: WorkspaceRoot, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions.insert(root, session)
    }

    /// Insert only when the slot is empty.
    pub fn reserve(&mut self, root: &WorkspaceRoot, session: &Arc<Session>) -> bool {
        if self.sessions.contains_key(root) {
            return false;
        }
        self.sessions.insert(root.clone(), Arc::clone(session));
        true
    }

    pub fn remove(&mut self, root: &WorkspaceRoot) -> Option<Arc<Session>> {
        self.sessions.remove(root)
    }

    /// Remove the entry only if it still belongs to session `id`.
    pub fn remove_if(&mut self, root: &WorkspaceRoot, id: SessionId) -> Option<Arc<Session>> {
        if self.sessions.get(root).is_some_and(|s| s.id() == id) {
            return self.sessions.remove(root);
        }
        None
    }

    pub fn all(&self) -> Vec<(WorkspaceRoot, Arc<Session>)> {
        self.sessions
            .iter()
            .map(|(root, session)| (root.clone(), Arc::clone(session)))
            .collect()
    }

    pub fn roots(&self) -> Vec<WorkspaceRoot> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
