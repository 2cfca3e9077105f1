//! Request session: one streaming completion driven on a background task.

use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;
use uuid::Uuid;

use crate::assembler::{Assembler, AssemblerStep};
use crate::connector::Connector;
use crate::errors::{AssistantError, StreamError};
use crate::protocol::{EventDecoder, StreamEvent};
use crate::render::Renderer;
use crate::request::{CompletionRequest, SessionOptions};
use crate::updates::{SessionOutput, TerminalState, Update};

/// Lifecycle state of a session, observable through its handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Connecting to the backend.
    Pending,
    /// Connected; deltas are flowing.
    Streaming,
    Completed,
    Cancelled,
    Failed(StreamError),
}

impl SessionState {
    /// Whether the session has stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed(_)
        )
    }
}

/// Requests cancellation of a running session.
///
/// Cloneable and safe to fire from any task. Cancelling a session that has
/// already reached a terminal state is a no-op.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Asks the session to stop at its next suspension point.
    pub fn cancel(&self) {
        let _ = self.flag.send(true);
    }
}

/// Consumer side of a running session.
///
/// Updates arrive in document order through a bounded buffer; a slow consumer
/// backpressures the session task rather than dropping notifications.
pub struct SessionHandle {
    session_id: Uuid,
    updates: mpsc::Receiver<Update>,
    final_rx: oneshot::Receiver<Result<SessionOutput, AssistantError>>,
    cancel: CancelHandle,
    state: watch::Receiver<SessionState>,
    saw_terminal: bool,
}

impl SessionHandle {
    /// Unique id of this session.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// A handle that cancels this session.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub(crate) fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Receives the next update, or `None` once the terminal update has been
    /// observed.
    ///
    /// Once cancellation has been requested, content updates still sitting in
    /// the delivery buffer are discarded; only the terminal update comes
    /// through.
    pub async fn next_update(&mut self) -> Option<Update> {
        if self.saw_terminal {
            return None;
        }
        loop {
            match self.updates.recv().await {
                Some(update @ Update::Terminal(_)) => {
                    self.saw_terminal = true;
                    return Some(update);
                }
                Some(update) => {
                    if self.discard_content() {
                        continue;
                    }
                    return Some(update);
                }
                None => {
                    self.saw_terminal = true;
                    return None;
                }
            }
        }
    }

    fn discard_content(&self) -> bool {
        *self.cancel.flag.borrow()
            && !matches!(
                self.state(),
                SessionState::Completed | SessionState::Failed(_)
            )
    }

    /// Drains remaining updates and returns the session's final result.
    pub async fn finish(mut self) -> Result<SessionOutput, AssistantError> {
        while self.next_update().await.is_some() {}
        self.final_rx
            .await
            .map_err(|_| AssistantError::protocol_msg("session task ended without a final result"))?
    }
}

/// Starts a streaming completion session on a spawned task.
///
/// Validation failures are reported synchronously; everything after spawn
/// surfaces through the handle.
pub fn start_session(
    connector: Arc<dyn Connector>,
    request: CompletionRequest,
    options: SessionOptions,
) -> Result<SessionHandle, AssistantError> {
    request.validate()?;
    options.validate()?;

    let session_id = Uuid::new_v4();
    let (update_tx, update_rx) = mpsc::channel(options.update_buffer_capacity);
    let (final_tx, final_rx) = oneshot::channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(SessionState::Pending);
    debug!(%session_id, model = %request.model, "starting completion session");

    let task = SessionTask {
        session_id,
        connector,
        request,
        options,
        updates: update_tx,
        cancel: cancel_rx,
        state: state_tx,
    };
    tokio::spawn(task.run(final_tx));

    Ok(SessionHandle {
        session_id,
        updates: update_rx,
        final_rx,
        cancel: CancelHandle {
            flag: Arc::new(cancel_tx),
        },
        state: state_rx,
        saw_terminal: false,
    })
}

enum Outcome {
    Completed(SessionOutput),
    Cancelled,
    Failed(StreamError),
}

struct SessionTask {
    session_id: Uuid,
    connector: Arc<dyn Connector>,
    request: CompletionRequest,
    options: SessionOptions,
    updates: mpsc::Sender<Update>,
    cancel: watch::Receiver<bool>,
    state: watch::Sender<SessionState>,
}

impl SessionTask {
    async fn run(mut self, final_tx: oneshot::Sender<Result<SessionOutput, AssistantError>>) {
        let outcome = self.drive().await;
        // state flips first so observers of the watch never see a stale
        // non-terminal state after the terminal update arrives
        match outcome {
            Outcome::Completed(output) => {
                let _ = self.state.send(SessionState::Completed);
                let _ = self
                    .updates
                    .send(Update::Terminal(TerminalState::Completed))
                    .await;
                let _ = final_tx.send(Ok(output));
                debug!(session_id = %self.session_id, "session completed");
            }
            Outcome::Failed(err) => {
                let _ = self.state.send(SessionState::Failed(err.clone()));
                let _ = self
                    .updates
                    .send(Update::Terminal(TerminalState::Failed(err.clone())))
                    .await;
                let _ = final_tx.send(Err(AssistantError::Stream(err)));
                debug!(session_id = %self.session_id, "session failed");
            }
            Outcome::Cancelled => {
                let _ = self.state.send(SessionState::Cancelled);
                let _ = self
                    .updates
                    .send(Update::Terminal(TerminalState::Cancelled))
                    .await;
                let _ = final_tx.send(Err(AssistantError::Cancelled));
                debug!(session_id = %self.session_id, "session cancelled");
            }
        }
    }

    async fn drive(&mut self) -> Outcome {
        let mut bytes = {
            let connect = self.connector.connect(&self.request);
            tokio::pin!(connect);
            tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return Outcome::Cancelled,
                conn = &mut connect => match conn {
                    Ok(stream) => stream,
                    Err(err) => return Outcome::Failed(err.into()),
                },
            }
        };
        let _ = self.state.send(SessionState::Streaming);

        let mut decoder = EventDecoder::default();
        let mut assembler = Assembler::default();
        let mut renderer = Renderer::default();

        loop {
            let read = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return Outcome::Cancelled,
                read = tokio::time::timeout(self.options.idle_timeout, bytes.next()) => read,
            };
            let events = match read {
                Err(_) => vec![StreamEvent::Error(StreamError::Connection(format!(
                    "no data received for {:?}",
                    self.options.idle_timeout
                )))],
                Ok(Some(Ok(chunk))) => decoder.push_chunk(&chunk),
                Ok(Some(Err(err))) => vec![StreamEvent::Error(err.into())],
                Ok(None) => decoder.finish(),
            };

            for event in events {
                match assembler.apply(event) {
                    AssemblerStep::NoChange => {}
                    AssemblerStep::Grew(growth) => {
                        let updates = renderer.apply(assembler.buffer().as_str(), growth);
                        if let Some(outcome) = self.deliver_all(updates).await {
                            return outcome;
                        }
                    }
                    AssemblerStep::Completed => {
                        let updates = renderer.finish(assembler.buffer().as_str());
                        if let Some(outcome) = self.deliver_all(updates).await {
                            return outcome;
                        }
                        let (text, tool_calls) =
                            std::mem::take(&mut assembler).into_parts();
                        return Outcome::Completed(SessionOutput { text, tool_calls });
                    }
                    AssemblerStep::Failed(err) => {
                        // partial content is still finalized so the consumer
                        // keeps everything delivered before the failure
                        let updates = renderer.finish(assembler.buffer().as_str());
                        if let Some(outcome) = self.deliver_all(updates).await {
                            return outcome;
                        }
                        return Outcome::Failed(err);
                    }
                }
            }
        }
    }

    async fn deliver_all(&mut self, updates: Vec<Update>) -> Option<Outcome> {
        for update in updates {
            if let Some(outcome) = self.deliver(update).await {
                return Some(outcome);
            }
        }
        None
    }

    async fn deliver(&mut self, update: Update) -> Option<Outcome> {
        tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => Some(Outcome::Cancelled),
            sent = self.updates.send(update) => match sent {
                Ok(()) => None,
                Err(_) => {
                    // a dropped handle means nobody wants the rest
                    debug!(session_id = %self.session_id, "update receiver dropped");
                    Some(Outcome::Cancelled)
                }
            },
        }
    }
}

/// Resolves once cancellation is requested; never resolves if the cancel
/// handle is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        futures::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ByteStream;
    use crate::errors::ConnectError;
    use bytes::Bytes;
    use futures::stream;
    use std::time::Duration;

    struct ScriptedConnector {
        chunks: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _request: &CompletionRequest) -> Result<ByteStream, ConnectError> {
            let chunks: Vec<Result<Bytes, ConnectError>> = self
                .chunks
                .iter()
                .copied()
                .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                .collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    /// Yields its chunks and then stalls forever.
    struct StallingConnector {
        chunks: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl Connector for StallingConnector {
        async fn connect(&self, _request: &CompletionRequest) -> Result<ByteStream, ConnectError> {
            let chunks: Vec<Result<Bytes, ConnectError>> = self
                .chunks
                .iter()
                .copied()
                .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                .collect();
            Ok(Box::pin(stream::iter(chunks).chain(stream::pending())))
        }
    }

    struct RejectingConnector;

    #[async_trait::async_trait]
    impl Connector for RejectingConnector {
        async fn connect(&self, _request: &CompletionRequest) -> Result<ByteStream, ConnectError> {
            Err(ConnectError::Http {
                status: 401,
                body: "bad key".into(),
            })
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("test-model").user("hi")
    }

    async fn drain(handle: &mut SessionHandle) -> Vec<Update> {
        let mut updates = Vec::new();
        while let Some(update) = handle.next_update().await {
            updates.push(update);
        }
        updates
    }

    #[tokio::test]
    async fn completed_session_delivers_blocks_then_terminal() {
        let connector = Arc::new(ScriptedConnector {
            chunks: vec![
                "data: {\"type\":\"delta\",\"content\":\"Hello \"}\n\n",
                "data: {\"type\":\"delta\",\"content\":\"world\"}\n\n",
                "data: [DONE]\n\n",
            ],
        });
        let mut handle =
            start_session(connector, request(), SessionOptions::default()).expect("start");
        let updates = drain(&mut handle).await;

        assert_eq!(
            updates.last(),
            Some(&Update::Terminal(TerminalState::Completed))
        );
        assert!(updates
            .iter()
            .any(|u| matches!(u, Update::BlockFinalized { source, .. } if source == "Hello world")));

        let output = handle.finish().await.expect("output");
        assert_eq!(output.text, "Hello world");
        assert!(output.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn streamed_tool_calls_are_merged_into_the_output() {
        let connector = Arc::new(ScriptedConnector {
            chunks: vec![
                "data: {\"type\":\"tool_call\",\"index\":0,\"id\":\"call_1\",\"name\":\"search\"}\n\n",
                "data: {\"type\":\"tool_call\",\"index\":0,\"arguments\":\"{\\\"q\\\":\"}\n\n",
                "data: {\"type\":\"tool_call\",\"index\":0,\"arguments\":\"\\\"rust\\\"}\"}\n\n",
                "data: [DONE]\n\n",
            ],
        });
        let handle =
            start_session(connector, request(), SessionOptions::default()).expect("start");
        let output = handle.finish().await.expect("output");
        assert_eq!(output.text, "");
        assert_eq!(output.tool_calls.len(), 1);
        assert_eq!(output.tool_calls[0].name, "search");
        assert_eq!(output.tool_calls[0].arguments, "{\"q\":\"rust\"}");
    }

    #[tokio::test]
    async fn eof_without_done_fails_but_keeps_partial_content() {
        let connector = Arc::new(ScriptedConnector {
            chunks: vec!["data: {\"type\":\"delta\",\"content\":\"partial answer\"}\n\n"],
        });
        let mut handle =
            start_session(connector, request(), SessionOptions::default()).expect("start");
        let updates = drain(&mut handle).await;

        let terminal_pos = updates
            .iter()
            .position(|u| matches!(u, Update::Terminal(_)))
            .expect("terminal");
        assert_eq!(terminal_pos, updates.len() - 1);
        assert!(matches!(
            &updates[terminal_pos],
            Update::Terminal(TerminalState::Failed(StreamError::Connection(_)))
        ));
        // the partial paragraph is finalized before the failure is reported
        assert!(updates[..terminal_pos].iter().any(
            |u| matches!(u, Update::BlockFinalized { source, .. } if source == "partial answer")
        ));

        let err = handle.finish().await.expect_err("failure");
        assert!(matches!(
            err,
            AssistantError::Stream(StreamError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn rejected_connect_fails_the_session() {
        let mut handle = start_session(
            Arc::new(RejectingConnector),
            request(),
            SessionOptions::default(),
        )
        .expect("start");
        let updates = drain(&mut handle).await;
        assert_eq!(updates.len(), 1);
        assert!(matches!(
            &updates[0],
            Update::Terminal(TerminalState::Failed(StreamError::Connection(msg)))
                if msg.contains("401")
        ));
        assert_eq!(
            handle.state(),
            SessionState::Failed(StreamError::Connection("status 401: bad key".into()))
        );
    }

    #[tokio::test]
    async fn cancellation_yields_exactly_one_terminal_update() {
        let connector = Arc::new(StallingConnector {
            chunks: vec!["data: {\"type\":\"delta\",\"content\":\"Hi\"}\n\n"],
        });
        let mut handle =
            start_session(connector, request(), SessionOptions::default()).expect("start");
        let first = handle.next_update().await.expect("first update");
        assert!(matches!(first, Update::BlockOpened { .. }));

        handle.cancel_handle().cancel();
        // buffered content updates are discarded; only the terminal gets out
        let rest = drain(&mut handle).await;
        assert_eq!(rest, vec![Update::Terminal(TerminalState::Cancelled)]);
        assert!(handle.next_update().await.is_none());

        let err = handle.finish().await.expect_err("cancelled");
        assert!(matches!(err, AssistantError::Cancelled));
    }

    #[tokio::test]
    async fn idle_timeout_fails_a_stalled_stream() {
        let connector = Arc::new(StallingConnector { chunks: vec![] });
        let options = SessionOptions::default().idle_timeout(Duration::from_millis(50));
        let mut handle = start_session(connector, request(), options).expect("start");
        let updates = drain(&mut handle).await;
        assert!(matches!(
            updates.last(),
            Some(Update::Terminal(TerminalState::Failed(
                StreamError::Connection(msg)
            ))) if msg.contains("no data received")
        ));
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_synchronously() {
        let connector = Arc::new(ScriptedConnector { chunks: vec![] });
        let result = start_session(
            connector,
            CompletionRequest::new(""),
            SessionOptions::default(),
        );
        assert!(matches!(result, Err(AssistantError::Validation(_))));
    }
}
