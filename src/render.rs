//! Incremental markdown renderer.
//!
//! The renderer keeps an arena of block nodes whose byte spans tile the
//! content buffer exactly. Only the trailing "open" block is ever
//! re-evaluated when the buffer grows; finalized blocks are immutable and
//! never re-scanned. A new block whose first partial line is still ambiguous
//! (it could become a fence, heading, list, or thematic break) is held until
//! the line completes; ordinary prose opens and streams immediately.
//!
//! Finalized blocks are rendered to HTML with pulldown-cmark, the same way
//! the assistant's chat display consumed them historically.

use std::fmt;
use std::ops::Range;

use crate::assembler::Growth;
use crate::updates::Update;

/// Arena index of a render node. Stable for the lifetime of its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a block-level node.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    CodeFence { info: Option<String> },
    BlockQuote,
    List,
    ThematicBreak,
    /// A run of blank lines separating two blocks. Carried as its own node
    /// so that span concatenation reconstructs the buffer exactly.
    Blank,
}

/// One node of the render tree.
///
/// Spans are contiguous: each node starts where the previous one ends, and
/// concatenating all spans in arena order yields the full content buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderNode {
    pub kind: BlockKind,
    pub span: Range<usize>,
    pub finalized: bool,
}

#[derive(Debug)]
struct Fence {
    ch: u8,
    count: usize,
}

/// Classification of one complete line (newline stripped).
#[derive(Clone, Debug, PartialEq, Eq)]
enum LineKind {
    Blank,
    FenceOpen {
        ch: u8,
        count: usize,
        info: Option<String>,
    },
    Heading(u8),
    ThematicBreak,
    ListItem,
    Quote,
    Text,
}

/// Classification of a partial line that has not seen its newline yet.
#[derive(Clone, Debug, PartialEq, Eq)]
enum PartialKind {
    /// The prefix could still become more than one kind; hold it back.
    Ambiguous,
    /// The prefix has committed to a kind that a longer line cannot change.
    Settled(LineKind),
}

fn strip_indent(s: &str) -> &str {
    let mut n = 0;
    for b in s.bytes() {
        if b == b' ' && n < 3 {
            n += 1;
        } else {
            break;
        }
    }
    &s[n..]
}

fn leading_run(s: &str, ch: u8) -> usize {
    s.bytes().take_while(|&b| b == ch).count()
}

fn is_ws(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

fn is_thematic_break(line: &str) -> bool {
    let mut marker = None;
    let mut count = 0;
    for ch in line.chars() {
        if is_ws(ch) {
            continue;
        }
        match marker {
            None if matches!(ch, '-' | '*' | '_') => marker = Some(ch),
            Some(m) if ch == m => {}
            _ => return false,
        }
        count += 1;
    }
    count >= 3
}

fn is_list_item(line: &str) -> bool {
    let bytes = line.as_bytes();
    match bytes.first() {
        Some(b'-' | b'+' | b'*') => bytes.len() == 1 || matches!(bytes[1], b' ' | b'\t'),
        Some(b'0'..=b'9') => {
            let digits = line.bytes().take_while(u8::is_ascii_digit).count();
            if digits > 9 || digits == bytes.len() {
                return false;
            }
            if !matches!(bytes[digits], b'.' | b')') {
                return false;
            }
            bytes.len() == digits + 1 || matches!(bytes[digits + 1], b' ' | b'\t')
        }
        _ => false,
    }
}

fn classify_line(line: &str) -> LineKind {
    if line.chars().all(is_ws) {
        return LineKind::Blank;
    }
    let stripped = strip_indent(line);
    match stripped.bytes().next() {
        Some(ch @ (b'`' | b'~')) => {
            let count = leading_run(stripped, ch);
            let info = stripped[count..].trim();
            // backtick fences cannot carry backticks in the info string
            if count >= 3 && !(ch == b'`' && info.contains('`')) {
                return LineKind::FenceOpen {
                    ch,
                    count,
                    info: (!info.is_empty()).then(|| info.to_string()),
                };
            }
        }
        Some(b'#') => {
            let n = leading_run(stripped, b'#');
            if n <= 6
                && stripped[n..]
                    .bytes()
                    .next()
                    .is_none_or(|b| matches!(b, b' ' | b'\t'))
            {
                return LineKind::Heading(n as u8);
            }
        }
        Some(b'>') => return LineKind::Quote,
        _ => {}
    }
    if is_thematic_break(stripped) {
        return LineKind::ThematicBreak;
    }
    if is_list_item(stripped) {
        return LineKind::ListItem;
    }
    LineKind::Text
}

fn classify_partial(prefix: &str) -> PartialKind {
    if prefix.chars().all(is_ws) {
        return PartialKind::Ambiguous;
    }
    let stripped = strip_indent(prefix);
    let Some(&first) = stripped.as_bytes().first() else {
        return PartialKind::Ambiguous;
    };
    match first {
        b'`' | b'~' => {
            let run = leading_run(stripped, first);
            if run == stripped.len() || run >= 3 {
                // still only fence chars, or a fence whose info string is
                // incomplete
                PartialKind::Ambiguous
            } else {
                PartialKind::Settled(LineKind::Text)
            }
        }
        b'#' => {
            let n = leading_run(stripped, b'#');
            if n == stripped.len() {
                if n <= 6 {
                    PartialKind::Ambiguous
                } else {
                    PartialKind::Settled(LineKind::Text)
                }
            } else if n <= 6 && matches!(stripped.as_bytes()[n], b' ' | b'\t') {
                PartialKind::Settled(LineKind::Heading(n as u8))
            } else {
                PartialKind::Settled(LineKind::Text)
            }
        }
        b'>' => PartialKind::Settled(LineKind::Quote),
        b'-' | b'+' | b'*' | b'_' => {
            if stripped
                .chars()
                .all(|c| matches!(c, '-' | '+' | '*' | '_') || is_ws(c))
            {
                // could still complete as a list marker, thematic break, or
                // emphasis-led prose
                PartialKind::Ambiguous
            } else if is_list_item(stripped) {
                PartialKind::Settled(LineKind::ListItem)
            } else {
                PartialKind::Settled(LineKind::Text)
            }
        }
        b'0'..=b'9' => {
            let digits = stripped.bytes().take_while(u8::is_ascii_digit).count();
            if digits > 9 {
                return PartialKind::Settled(LineKind::Text);
            }
            match stripped.as_bytes().get(digits) {
                None => PartialKind::Ambiguous,
                Some(b'.' | b')') => {
                    if digits + 1 == stripped.len() {
                        PartialKind::Ambiguous
                    } else if matches!(stripped.as_bytes()[digits + 1], b' ' | b'\t') {
                        PartialKind::Settled(LineKind::ListItem)
                    } else {
                        PartialKind::Settled(LineKind::Text)
                    }
                }
                Some(_) => PartialKind::Settled(LineKind::Text),
            }
        }
        _ => PartialKind::Settled(LineKind::Text),
    }
}

/// Whether a line of the given kind continues the open block instead of
/// ending it.
fn continues(open: &BlockKind, line: &LineKind) -> bool {
    match (open, line) {
        (BlockKind::Blank, LineKind::Blank) => true,
        (BlockKind::Blank, _) => false,
        (_, LineKind::Text) => true,
        (BlockKind::BlockQuote, LineKind::Quote) => true,
        (BlockKind::List, LineKind::ListItem) => true,
        _ => false,
    }
}

fn is_fence_close(line: &str, fence: &Fence) -> bool {
    let stripped = strip_indent(line);
    let run = leading_run(stripped, fence.ch);
    run >= fence.count && stripped[run..].chars().all(is_ws)
}

fn could_be_fence_close(partial: &str, fence: &Fence) -> bool {
    let stripped = strip_indent(partial);
    let run = leading_run(stripped, fence.ch);
    if !stripped[run..].chars().all(is_ws) {
        return false;
    }
    run >= fence.count || stripped[run..].is_empty()
}

fn render_html(kind: &BlockKind, source: &str) -> String {
    if matches!(kind, BlockKind::Blank) {
        return String::new();
    }
    let parser = pulldown_cmark::Parser::new(source);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// Incremental block renderer over one content buffer.
///
/// Feed it every [`Growth`] notification in order via [`Renderer::apply`] and
/// close it with [`Renderer::finish`] when the stream ends. Updates come out
/// in document order.
#[derive(Debug, Default)]
pub struct Renderer {
    nodes: Vec<RenderNode>,
    open: Option<NodeId>,
    /// Start of the line currently being consumed.
    line_start: usize,
    /// Everything before this offset has been delivered as extension text.
    emitted: usize,
    fence: Option<Fence>,
    finished: bool,
}

impl Renderer {
    /// All nodes in document order.
    pub fn nodes(&self) -> &[RenderNode] {
        &self.nodes
    }

    /// Looks up one node.
    pub fn node(&self, id: NodeId) -> Option<&RenderNode> {
        self.nodes.get(id.0 as usize)
    }

    /// Processes one buffer growth and returns the resulting block updates.
    ///
    /// `buffer` must be the full content buffer after the growth was applied.
    pub fn apply(&mut self, buffer: &str, growth: Growth) -> Vec<Update> {
        debug_assert_eq!(growth.offset + growth.len, buffer.len());
        debug_assert!(!self.finished);
        let mut updates = Vec::new();
        self.consume_complete_lines(buffer, &mut updates);
        self.stream_partial(buffer, &mut updates);
        updates
    }

    /// Force-finalizes the open tail once the stream has ended.
    ///
    /// A final line with no newline is classified as-is, so an unterminated
    /// code fence still comes out as a finalized code block.
    pub fn finish(&mut self, buffer: &str) -> Vec<Update> {
        let mut updates = Vec::new();
        if self.finished {
            return updates;
        }
        self.finished = true;
        self.consume_complete_lines(buffer, &mut updates);
        if self.line_start < buffer.len() {
            self.consume_line(buffer, buffer.len(), &mut updates);
            self.line_start = buffer.len();
        }
        self.finalize_open(buffer, buffer.len(), &mut updates);
        updates
    }

    fn consume_complete_lines(&mut self, buffer: &str, updates: &mut Vec<Update>) {
        while let Some(nl) = buffer[self.line_start..].find('\n') {
            let line_end = self.line_start + nl + 1;
            self.consume_line(buffer, line_end, updates);
            self.line_start = line_end;
        }
    }

    fn consume_line(&mut self, buffer: &str, line_end: usize, updates: &mut Vec<Update>) {
        let line = buffer[self.line_start..line_end].trim_end_matches(['\n', '\r']);
        let Some(id) = self.open else {
            let kind = classify_line(line);
            self.open_from_line(buffer, line_end, kind, updates);
            return;
        };
        match self.nodes[id.0 as usize].kind.clone() {
            BlockKind::CodeFence { .. } => {
                let closes = self
                    .fence
                    .as_ref()
                    .is_some_and(|fence| is_fence_close(line, fence));
                self.extend_to(buffer, line_end, updates);
                if closes {
                    self.finalize_open(buffer, line_end, updates);
                }
            }
            // single-line blocks close at their newline
            BlockKind::Heading(_) | BlockKind::ThematicBreak => {
                self.extend_to(buffer, line_end, updates);
                self.finalize_open(buffer, line_end, updates);
            }
            kind => {
                let line_kind = classify_line(line);
                if continues(&kind, &line_kind) {
                    self.extend_to(buffer, line_end, updates);
                } else {
                    self.finalize_open(buffer, self.line_start, updates);
                    self.open_from_line(buffer, line_end, line_kind, updates);
                }
            }
        }
    }

    fn open_from_line(
        &mut self,
        buffer: &str,
        line_end: usize,
        kind: LineKind,
        updates: &mut Vec<Update>,
    ) {
        match kind {
            LineKind::Blank => {
                self.open_node(BlockKind::Blank, updates);
                self.extend_to(buffer, line_end, updates);
            }
            LineKind::FenceOpen { ch, count, info } => {
                self.fence = Some(Fence { ch, count });
                self.open_node(BlockKind::CodeFence { info }, updates);
                self.extend_to(buffer, line_end, updates);
            }
            LineKind::Heading(level) => {
                self.open_node(BlockKind::Heading(level), updates);
                self.extend_to(buffer, line_end, updates);
                self.finalize_open(buffer, line_end, updates);
            }
            LineKind::ThematicBreak => {
                self.open_node(BlockKind::ThematicBreak, updates);
                self.extend_to(buffer, line_end, updates);
                self.finalize_open(buffer, line_end, updates);
            }
            LineKind::Quote => {
                self.open_node(BlockKind::BlockQuote, updates);
                self.extend_to(buffer, line_end, updates);
            }
            LineKind::ListItem => {
                self.open_node(BlockKind::List, updates);
                self.extend_to(buffer, line_end, updates);
            }
            LineKind::Text => {
                self.open_node(BlockKind::Paragraph, updates);
                self.extend_to(buffer, line_end, updates);
            }
        }
    }

    fn stream_partial(&mut self, buffer: &str, updates: &mut Vec<Update>) {
        if self.line_start >= buffer.len() {
            return;
        }
        let partial = &buffer[self.line_start..];
        let Some(id) = self.open else {
            self.open_from_partial(buffer, updates);
            return;
        };
        match self.nodes[id.0 as usize].kind.clone() {
            BlockKind::CodeFence { .. } => {
                let hold = self
                    .fence
                    .as_ref()
                    .is_some_and(|fence| could_be_fence_close(partial, fence));
                if !hold {
                    self.extend_to(buffer, buffer.len(), updates);
                }
            }
            BlockKind::Heading(_) | BlockKind::ThematicBreak => {
                self.extend_to(buffer, buffer.len(), updates);
            }
            BlockKind::Blank => {
                if !partial.chars().all(is_ws) {
                    self.finalize_open(buffer, self.line_start, updates);
                    self.open_from_partial(buffer, updates);
                }
            }
            kind => {
                if let PartialKind::Settled(line_kind) = classify_partial(partial) {
                    if continues(&kind, &line_kind) {
                        self.extend_to(buffer, buffer.len(), updates);
                    }
                }
            }
        }
    }

    fn open_from_partial(&mut self, buffer: &str, updates: &mut Vec<Update>) {
        let partial = &buffer[self.line_start..];
        let kind = match classify_partial(partial) {
            PartialKind::Settled(LineKind::Text) => BlockKind::Paragraph,
            PartialKind::Settled(LineKind::Quote) => BlockKind::BlockQuote,
            PartialKind::Settled(LineKind::ListItem) => BlockKind::List,
            PartialKind::Settled(LineKind::Heading(level)) => BlockKind::Heading(level),
            // fences and breaks need their full first line; blanks need the
            // newline
            _ => return,
        };
        self.open_node(kind, updates);
        self.extend_to(buffer, buffer.len(), updates);
    }

    fn open_node(&mut self, kind: BlockKind, updates: &mut Vec<Update>) -> NodeId {
        debug_assert!(self.open.is_none());
        debug_assert_eq!(self.line_start, self.emitted);
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(RenderNode {
            kind: kind.clone(),
            span: self.line_start..self.line_start,
            finalized: false,
        });
        self.open = Some(id);
        updates.push(Update::BlockOpened { id, kind });
        id
    }

    fn extend_to(&mut self, buffer: &str, end: usize, updates: &mut Vec<Update>) {
        let Some(id) = self.open else {
            return;
        };
        if end > self.emitted {
            updates.push(Update::BlockExtended {
                id,
                text: buffer[self.emitted..end].to_string(),
            });
            self.emitted = end;
        }
        self.nodes[id.0 as usize].span.end = end;
    }

    fn finalize_open(&mut self, buffer: &str, end: usize, updates: &mut Vec<Update>) {
        let Some(id) = self.open.take() else {
            return;
        };
        self.fence = None;
        debug_assert!(self.emitted <= end);
        self.emitted = end;
        let node = &mut self.nodes[id.0 as usize];
        node.span.end = end;
        node.finalized = true;
        let source = buffer[node.span.start..end].to_string();
        let html = render_html(&node.kind, &source);
        updates.push(Update::BlockFinalized {
            id,
            kind: node.kind.clone(),
            source,
            html,
        });
    }
}
