//! Streaming completion pipeline for an in-editor assistant.
//!
//! Response bytes from an OpenAI-compatible endpoint are decoded from SSE
//! framing, assembled into an append-only content buffer, and rendered
//! incrementally into markdown blocks. Each chat surface holds at most one
//! live session; a new request supersedes the old one cleanly.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use assistant_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), AssistantError> {
//! let connector = Arc::new(HttpConnector::from_env()?);
//! let supervisor = Supervisor::new(connector);
//!
//! let request = CompletionRequest::new("gpt-4o-mini")
//!     .system("Answer briefly.")
//!     .user("Say hello");
//!
//! let mut session = supervisor.start(ContextId::new("chat-1"), request).await?;
//! while let Some(update) = session.next_update().await {
//!     match update {
//!         Update::BlockExtended { text, .. } => print!("{text}"),
//!         Update::BlockFinalized { html, .. } => println!("\n[html] {html}"),
//!         Update::Terminal(state) => println!("\n[terminal] {state:?}"),
//!         Update::BlockOpened { .. } => {}
//!     }
//! }
//! let output = session.finish().await?;
//! println!("{}", output.text);
//! # Ok(())
//! # }
//! ```

/// Content buffer, tool-call accumulation, and event assembly.
pub mod assembler;
/// Transport seam for opening completion streams.
pub mod connector;
/// Public error types.
pub mod errors;
/// HTTP connector for OpenAI-compatible endpoints.
pub mod http;
/// Common imports for typical usage.
pub mod prelude;
/// SSE framing and event payload decoding.
pub mod protocol;
/// Incremental markdown block renderer.
pub mod render;
/// Request and session option types.
pub mod request;
/// Request session runtime and handles.
pub mod session;
/// Per-context session supervision.
pub mod supervisor;
/// Session update notifications.
pub mod updates;

pub use assembler::{Assembler, AssemblerStep, ContentBuffer, Growth, ToolCall};
pub use connector::{ByteStream, Connector};
pub use errors::{AssistantError, ConnectError, StreamError};
pub use http::{EndpointConfig, HttpConnector};
pub use protocol::{EventDecoder, SseDecoder, SseFrame, StreamEvent};
pub use render::{BlockKind, NodeId, RenderNode, Renderer};
pub use request::{ChatMessage, CompletionRequest, Role, SessionOptions};
pub use session::{CancelHandle, SessionHandle, SessionState, start_session};
pub use supervisor::{ContextId, Supervisor};
pub use updates::{SessionOutput, TerminalState, Update};
