//! Session supervisor: at most one live session per context.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::connector::Connector;
use crate::errors::AssistantError;
use crate::request::{CompletionRequest, SessionOptions};
use crate::session::{CancelHandle, SessionHandle, SessionState, start_session};

/// Identifies the surface a session streams into, typically one chat tab or
/// editor pane.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ContextId(pub String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ContextId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

struct ActiveSession {
    cancel: CancelHandle,
    state: watch::Receiver<SessionState>,
}

/// Tracks the live session of each context and enforces supersession: a new
/// request for a context cancels the old session and waits for it to reach a
/// terminal state before the replacement starts, so no stale updates can
/// trail into the new session.
pub struct Supervisor {
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    active: Mutex<HashMap<ContextId, ActiveSession>>,
}

impl Supervisor {
    /// Creates a supervisor with default session options.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_options(connector, SessionOptions::default())
    }

    /// Creates a supervisor with explicit session options.
    pub fn with_options(connector: Arc<dyn Connector>, options: SessionOptions) -> Self {
        Self {
            connector,
            options,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a session for `context`, superseding any session already
    /// running there.
    pub async fn start(
        &self,
        context: ContextId,
        request: CompletionRequest,
    ) -> Result<SessionHandle, AssistantError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.remove(&context) {
            debug!(%context, "superseding active session");
            stop(previous).await;
        }
        let handle = start_session(Arc::clone(&self.connector), request, self.options.clone())?;
        active.insert(
            context,
            ActiveSession {
                cancel: handle.cancel_handle(),
                state: handle.state_receiver(),
            },
        );
        Ok(handle)
    }

    /// Cancels the session of `context`, if any, and waits for it to stop.
    ///
    /// Returns whether a session was actually cancelled.
    pub async fn cancel(&self, context: &ContextId) -> bool {
        let previous = self.active.lock().await.remove(context);
        match previous {
            Some(session) => {
                debug!(%context, "cancelling session");
                stop(session).await;
                true
            }
            None => false,
        }
    }

    /// Cancels every tracked session and waits for them to stop.
    pub async fn shutdown(&self) {
        let sessions: Vec<ActiveSession> = {
            let mut active = self.active.lock().await;
            active.drain().map(|(_, session)| session).collect()
        };
        for session in sessions {
            stop(session).await;
        }
    }
}

async fn stop(mut session: ActiveSession) {
    if session.state.borrow().is_terminal() {
        return;
    }
    session.cancel.cancel();
    let _ = session.state.wait_for(SessionState::is_terminal).await;
}
