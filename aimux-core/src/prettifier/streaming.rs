//! # Streaming Assembly
//!
//! Chunked provider output is buffered per stream and flushed at natural
//! boundaries so clients receive syntactically whole fragments:
//!
//! - a code fence closes,
//! - a tool-call JSON object balances its braces, or
//! - a sentence terminator appears and the buffer has grown past the flush
//!   threshold.
//!
//! The buffer is bounded. When a stream outruns every boundary the current
//! buffer is flushed verbatim and the event is reported as a backpressure
//! drop; content is never discarded, only the structural boundary is.
//!
//! Each assembler owns exactly one stream's buffer; nothing is shared
//! across streams. Flushed content always carries balanced fences, so each
//! boundary scan starts from a clean state.

use serde::Serialize;

/// Why a fragment was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    FenceClosed,
    ToolJsonBalanced,
    SentenceBoundary,
    BackpressureDrop,
    StreamEnd,
}

/// One flushed piece of a stream.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactFragment {
    pub body: String,
    pub reason: FlushReason,
}

/// Per-stream buffer with boundary detection and backpressure accounting.
pub struct StreamAssembler {
    buffer: String,
    max_buffer_bytes: usize,
    flush_threshold: usize,
    backpressure_drops: u64,
}

impl StreamAssembler {
    pub fn new(max_buffer_bytes: usize, flush_threshold: usize) -> Self {
        Self {
            buffer: String::new(),
            max_buffer_bytes: max_buffer_bytes.max(1),
            flush_threshold: flush_threshold.max(1),
            backpressure_drops: 0,
        }
    }

    /// Feed one chunk; returns every fragment that became flushable.
    pub fn push(&mut self, chunk: &str) -> Vec<ArtifactFragment> {
        self.buffer.push_str(chunk);
        let mut fragments = Vec::new();

        loop {
            if let Some(fragment) = self.try_flush_boundary() {
                fragments.push(fragment);
                continue;
            }
            if self.buffer.len() > self.max_buffer_bytes {
                self.backpressure_drops += 1;
                fragments.push(ArtifactFragment {
                    body: std::mem::take(&mut self.buffer),
                    reason: FlushReason::BackpressureDrop,
                });
                continue;
            }
            break;
        }

        fragments
    }

    /// Flush whatever remains at end of stream.
    pub fn finish(&mut self) -> Option<ArtifactFragment> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(ArtifactFragment {
                body: std::mem::take(&mut self.buffer),
                reason: FlushReason::StreamEnd,
            })
        }
    }

    pub fn backpressure_drops(&self) -> u64 {
        self.backpressure_drops
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn flush_to(&mut self, end: usize, reason: FlushReason) -> ArtifactFragment {
        let rest = self.buffer.split_off(end);
        let body = std::mem::replace(&mut self.buffer, rest);
        ArtifactFragment { body, reason }
    }

    /// Look for the next structural boundary in the buffer.
    ///
    /// Flushes only fence-balanced prefixes, so the buffer left behind never
    /// starts inside a fence the flushed part opened.
    fn try_flush_boundary(&mut self) -> Option<ArtifactFragment> {
        let mut fence_open = false;
        let mut first_opener: Option<usize> = None;
        let mut search_from = 0usize;

        while let Some(offset) = self.buffer[search_from..].find("```") {
            let marker_at = search_from + offset;
            if fence_open {
                // closing marker; flush through the end of its line
                let after = marker_at + 3;
                let line_end = self.buffer[after..]
                    .find('\n')
                    .map(|i| after + i + 1)
                    .unwrap_or(self.buffer.len());
                return Some(self.flush_to(line_end, FlushReason::FenceClosed));
            }
            fence_open = true;
            first_opener.get_or_insert(marker_at);
            search_from = marker_at + 3;
        }

        // other boundaries apply only to the region before any open fence
        let limit = first_opener.unwrap_or(self.buffer.len());
        if limit == 0 {
            return None;
        }
        let region = &self.buffer[..limit];

        // balanced tool-call JSON at the head of the region
        let lead_ws = region.len() - region.trim_start().len();
        if region[lead_ws..].starts_with('{') {
            if let Some(end) = balanced_object_end(&region[lead_ws..]) {
                return Some(self.flush_to(lead_ws + end, FlushReason::ToolJsonBalanced));
            }
            // an unbalanced object keeps buffering; no sentence flush inside it
            return None;
        }

        // sentence boundary once the buffer is large enough
        if self.buffer.len() >= self.flush_threshold {
            if let Some(end) = last_sentence_end(region) {
                return Some(self.flush_to(end, FlushReason::SentenceBoundary));
            }
        }

        None
    }
}

/// Byte offset one past the brace that balances the leading `{`, honoring
/// JSON string escapes. `None` while still unbalanced.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte offset one past the last sentence terminator, if any.
fn last_sentence_end(text: &str) -> Option<usize> {
    text.char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
}
