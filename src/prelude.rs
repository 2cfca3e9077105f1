//! Common imports for typical usage.
//!
//! This module intentionally exports the most frequently used request and
//! session types so application code needs fewer import lines.
pub use crate::{
    AssistantError, BlockKind, CancelHandle, ChatMessage, CompletionRequest, ContextId,
    EndpointConfig, HttpConnector, NodeId, SessionHandle, SessionOptions, SessionOutput,
    SessionState, StreamError, Supervisor, TerminalState, Update,
};
