//! Assembles decoded events into the append-only content buffer.

use std::collections::BTreeMap;

use crate::errors::StreamError;
use crate::protocol::StreamEvent;

/// Exact region appended to the content buffer by one delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Growth {
    pub offset: usize,
    pub len: usize,
}

/// Append-only accumulated text for one session.
///
/// Grows monotonically; earlier content is never rewritten. Owned exclusively
/// by the session that created it, with read-only views handed to the
/// renderer.
#[derive(Debug, Default)]
pub struct ContentBuffer {
    text: String,
}

impl ContentBuffer {
    /// Read-only view of the accumulated content.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn append(&mut self, fragment: &str) -> Growth {
        let offset = self.text.len();
        self.text.push_str(fragment);
        Growth {
            offset,
            len: fragment.len(),
        }
    }
}

/// A complete tool call merged from streamed chunks.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Merges sparse index-keyed tool-call deltas into complete calls.
///
/// Indices may be non-sequential (a backend can start tool output at index 1
/// when index 0 was a text block), so entries are keyed rather than pushed.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, ToolCall>,
}

impl ToolCallAccumulator {
    /// Folds one delta into the call at its index.
    pub fn apply(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id {
            if call.id.is_empty() {
                call.id = id;
            }
        }
        if let Some(name) = name {
            if call.name.is_empty() {
                call.name = name;
            }
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(&arguments);
        }
    }

    /// Returns the merged calls in index order, dropping incomplete entries.
    pub fn into_calls(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .filter(|call| !call.name.is_empty())
            .collect()
    }
}

/// Outcome of feeding one event to the assembler.
#[derive(Clone, Debug, PartialEq)]
pub enum AssemblerStep {
    /// The buffer grew by exactly this region.
    Grew(Growth),
    /// The event carried no visible content (tool-call delta, empty delta).
    NoChange,
    /// Terminal success; the assembler stops consuming.
    Completed,
    /// Terminal failure; the assembler stops consuming.
    Failed(StreamError),
}

/// Interprets decoded events as an ordered append-only content stream.
///
/// Append order is exactly decode order; events after a terminal one are
/// ignored.
#[derive(Debug, Default)]
pub struct Assembler {
    buffer: ContentBuffer,
    tool_calls: ToolCallAccumulator,
    done: bool,
}

impl Assembler {
    /// Consumes one event and reports how the buffer changed.
    pub fn apply(&mut self, event: StreamEvent) -> AssemblerStep {
        if self.done {
            return AssemblerStep::NoChange;
        }
        match event {
            StreamEvent::Delta(text) if text.is_empty() => AssemblerStep::NoChange,
            StreamEvent::Delta(text) => AssemblerStep::Grew(self.buffer.append(&text)),
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                self.tool_calls.apply(index, id, name, arguments);
                AssemblerStep::NoChange
            }
            StreamEvent::Done => {
                self.done = true;
                AssemblerStep::Completed
            }
            StreamEvent::Error(err) => {
                self.done = true;
                AssemblerStep::Failed(err)
            }
        }
    }

    /// The content assembled so far.
    pub fn buffer(&self) -> &ContentBuffer {
        &self.buffer
    }

    /// Consumes the assembler, returning the full text and merged tool calls.
    pub fn into_parts(self) -> (String, Vec<ToolCall>) {
        (self.buffer.text, self.tool_calls.into_calls())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_equals_concatenation_of_deltas_in_order() {
        let deltas = ["Hello ", "world", "", "!\n", "More **text**."];
        let mut assembler = Assembler::default();
        let mut expected = String::new();
        for delta in deltas {
            let step = assembler.apply(StreamEvent::Delta(delta.into()));
            if delta.is_empty() {
                assert_eq!(step, AssemblerStep::NoChange);
            } else {
                assert_eq!(
                    step,
                    AssemblerStep::Grew(Growth {
                        offset: expected.len(),
                        len: delta.len(),
                    })
                );
            }
            expected.push_str(delta);
        }
        assert_eq!(assembler.buffer().as_str(), expected);
    }

    #[test]
    fn stops_consuming_after_done() {
        let mut assembler = Assembler::default();
        assert_eq!(
            assembler.apply(StreamEvent::Delta("a".into())),
            AssemblerStep::Grew(Growth { offset: 0, len: 1 })
        );
        assert_eq!(assembler.apply(StreamEvent::Done), AssemblerStep::Completed);
        assert_eq!(
            assembler.apply(StreamEvent::Delta("late".into())),
            AssemblerStep::NoChange
        );
        assert_eq!(assembler.buffer().as_str(), "a");
    }

    #[test]
    fn error_event_reports_failure_with_reason() {
        let mut assembler = Assembler::default();
        let step = assembler.apply(StreamEvent::Error(StreamError::Upstream("boom".into())));
        assert_eq!(
            step,
            AssemblerStep::Failed(StreamError::Upstream("boom".into()))
        );
    }

    #[test]
    fn tool_call_chunks_merge_across_sparse_indices() {
        let mut assembler = Assembler::default();
        assembler.apply(StreamEvent::ToolCallDelta {
            index: 1,
            id: Some("call_b".into()),
            name: Some("write_file".into()),
            arguments: Some("{\"path\":".into()),
        });
        assembler.apply(StreamEvent::ToolCallDelta {
            index: 0,
            id: Some("call_a".into()),
            name: Some("read_file".into()),
            arguments: None,
        });
        assembler.apply(StreamEvent::ToolCallDelta {
            index: 1,
            id: None,
            name: None,
            arguments: Some("\"a.rs\"}".into()),
        });
        let (text, calls) = assembler.into_parts();
        assert!(text.is_empty());
        assert_eq!(
            calls,
            vec![
                ToolCall {
                    id: "call_a".into(),
                    name: "read_file".into(),
                    arguments: String::new(),
                },
                ToolCall {
                    id: "call_b".into(),
                    name: "write_file".into(),
                    arguments: "{\"path\":\"a.rs\"}".into(),
                },
            ]
        );
    }

    #[test]
    fn unnamed_tool_call_entries_are_dropped() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply(0, Some("call_x".into()), None, Some("{}".into()));
        assert!(acc.into_calls().is_empty());
    }
}
