//! Public notifications delivered through a session handle.

use crate::assembler::ToolCall;
use crate::errors::StreamError;
use crate::render::{BlockKind, NodeId};

/// Terminal state of a session, reported exactly once.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TerminalState {
    Completed,
    Cancelled,
    Failed(StreamError),
}

/// One ordered notification from a session.
///
/// Block notifications arrive in document order; `Terminal` is always the
/// last update a session emits.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    /// A new trailing block started growing.
    BlockOpened { id: NodeId, kind: BlockKind },
    /// The open trailing block grew by this raw text.
    BlockExtended { id: NodeId, text: String },
    /// A block became immutable. `source` is its full raw span (superseding
    /// any extensions already delivered for it) and `html` its rendering.
    BlockFinalized {
        id: NodeId,
        kind: BlockKind,
        source: String,
        html: String,
    },
    /// The session reached a terminal state.
    Terminal(TerminalState),
}

/// Aggregated result of a session that ran to completion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionOutput {
    /// Full assembled text.
    pub text: String,
    /// Tool calls merged from streamed chunks, in index order.
    pub tool_calls: Vec<ToolCall>,
}
