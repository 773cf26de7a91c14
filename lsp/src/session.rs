//! Per-root session and its state machine.
//!
//! `Starting → Running`, or `Starting | Running → Stopping → Absent`. A
//! session never goes back to `Starting`; restarting a root creates a new
//! [`Session`] with a fresh [`SessionId`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::host::OutputSink;
use crate::launch::Connection;
use crate::types::{SessionId, WorkspaceRoot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Stopping,
    Absent,
}

struct SessionInner {
    state: SessionState,
    connection: Option<Arc<dyn Connection>>,
    output: Option<Arc<dyn OutputSink>>,
}

/// Resources released by a stop, handed back for disposal outside the lock.
pub(crate) struct Teardown {
    pub connection: Option<Arc<dyn Connection>>,
    pub output: Option<Arc<dyn OutputSink>>,
}

pub struct Session {
    id: SessionId,
    root: WorkspaceRoot,
    inner: Mutex<SessionInner>,
    /// Set once the session is stopped; a pending launch watches it.
    cancel: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new(id: SessionId, root: WorkspaceRoot) -> Self {
        Self {
            id,
            root,
            cancel: watch::Sender::new(false),
            inner: Mutex::new(SessionInner {
                state: SessionState::Starting,
                connection: None,
                output: None,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn root(&self) -> &WorkspaceRoot {
        &self.root
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attach_output(&self, output: Arc<dyn OutputSink>) {
        self.lock().output = Some(output);
    }

    /// Receiver handed to the launcher for this session's handshake.
    pub(crate) fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// `Starting → Running`. Hands the connection back if the session was
    /// stopped while the handshake was in flight.
    pub(crate) fn promote(
        &self,
        connection: Arc<dyn Connection>,
    ) -> Result<(), Arc<dyn Connection>> {
        let mut inner = self.lock();
        if inner.state != SessionState::Starting {
            return Err(connection);
        }
        inner.state = SessionState::Running;
        inner.connection = Some(connection);
        Ok(())
    }

    /// Enter `Stopping` and take what needs disposing. A handshake still in
    /// flight is told to give up.
    ///
    /// `None` when the session already left on its own (a failed start).
    pub(crate) fn begin_stop(&self) -> Option<Teardown> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Starting | SessionState::Running => {
                self.cancel.send_replace(true);
                inner.state = SessionState::Stopping;
                Some(Teardown {
                    connection: inner.connection.take(),
                    output: inner.output.take(),
                })
            }
            SessionState::Stopping | SessionState::Absent => None,
        }
    }

    pub(crate) fn finish_stop(&self) {
        self.lock().state = SessionState::Absent;
    }

    /// Failed start. The output sink is released without being disposed so
    /// its contents stay readable.
    pub(crate) fn abandon(&self) {
        let mut inner = self.lock();
        inner.connection = None;
        inner.output = None;
        inner.state = SessionState::Absent;
    }

    /// The live connection, only while `Running`.
    pub(crate) fn connection(&self) -> Option<Arc<dyn Connection>> {
        let inner = self.lock();
        match inner.state {
            SessionState::Running => inner.connection.clone(),
            _ => None,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
