//! Drives the per-response state machine that watches a stream of text deltas for the
//! trigger sentinel, so the orchestrator knows whether to keep forwarding chunks to the
//! client untouched or start buffering tool-call XML for the non-streaming parser.

use crate::parser::{ParsedCall, parse_function_calls};

const MIN_LOOKAHEAD: usize = 8;

/// Which mode the detector is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Scanning incoming text for the sentinel; safe text is forwarded as it arrives.
    Detecting,
    /// The sentinel has been seen; everything from here on is buffered for the XML parser
    /// instead of being forwarded.
    ToolParsing,
}

/// Per-response streaming state. One instance is created per client request and fed every
/// delta the upstream sends, in order.
pub struct StreamingDetector {
    sentinel: String,
    lookahead: usize,
    state: State,
    buffer: String,
    think_depth: u32,
}

impl StreamingDetector {
    /// Builds a detector for one response, holding back at least `max(|sentinel|, 8)`
    /// characters of lookahead so neither the sentinel nor a `</think>` tag can be split
    /// across the chunk boundary at which a forwarding decision is made.
    pub fn new(sentinel: impl Into<String>) -> Self {
        let sentinel = sentinel.into();
        let lookahead = sentinel.chars().count().max(MIN_LOOKAHEAD);
        Self { sentinel, lookahead, state: State::Detecting, buffer: String::new(), think_depth: 0 }
    }

    pub fn is_tool_parsing(&self) -> bool {
        self.state == State::ToolParsing
    }

    /// `true` once a closing `</function_calls>` has arrived while in tool-parsing mode,
    /// meaning the orchestrator can finalize without waiting for the upstream stream to end.
    pub fn ready_to_finalize(&self) -> bool {
        self.is_tool_parsing() && self.buffer.contains("</function_calls>")
    }

    /// Feeds one streamed delta. Returns the text, if any, now safe to forward to the
    /// client unchanged. Returns an empty string while buffering tool-call XML.
    pub fn process_chunk(&mut self, delta: &str) -> String {
        self.buffer.push_str(delta);

        if self.state == State::ToolParsing {
            return String::new();
        }

        self.advance_detecting()
    }

    fn advance_detecting(&mut self) -> String {
        let char_count = self.buffer.chars().count();
        if char_count <= self.lookahead {
            return String::new();
        }

        let safe_chars = char_count - self.lookahead;
        let safe_byte_len = byte_offset(&self.buffer, safe_chars);

        let scan = scan_for_sentinel(&self.buffer[..safe_byte_len], &self.sentinel, self.think_depth);

        match scan.sentinel_at {
            Some(pos) => {
                let passthrough = self.buffer[..pos].to_string();
                self.state = State::ToolParsing;
                self.buffer = self.buffer[pos..].to_string();
                passthrough
            }
            None => {
                self.think_depth = scan.depth;
                let passthrough = self.buffer[..safe_byte_len].to_string();
                self.buffer = self.buffer[safe_byte_len..].to_string();
                passthrough
            }
        }
    }

    /// Called once the upstream stream has ended with no sentinel ever found: flushes
    /// whatever text was still held back as lookahead, since no further chunk will arrive
    /// to complete a split sentinel or `</think>` tag.
    pub fn finish(&mut self) -> String {
        if self.state == State::ToolParsing {
            return String::new();
        }

        std::mem::take(&mut self.buffer)
    }

    /// Parses the buffered tool-call XML collected since entering tool-parsing mode.
    /// Consumes the buffer; returns an empty list if the XML never resolved to a call.
    pub fn finalize(&mut self) -> Vec<ParsedCall> {
        let text = std::mem::take(&mut self.buffer);
        parse_function_calls(&text, &self.sentinel).unwrap_or_default()
    }
}

struct ScanResult {
    sentinel_at: Option<usize>,
    depth: u32,
}

/// Scans `text` for the first occurrence of `sentinel` outside any `<think>…</think>` span,
/// tracking nesting depth the same way [`crate::parser::strip_think`] does so a sentinel
/// written inside a think block is never mistaken for the real trigger.
fn scan_for_sentinel(text: &str, sentinel: &str, mut depth: u32) -> ScanResult {
    let mut idx = 0;

    while idx < text.len() {
        let rest = &text[idx..];

        if rest.starts_with("<think>") {
            depth += 1;
            idx += "<think>".len();
            continue;
        }
        if rest.starts_with("</think>") {
            depth = depth.saturating_sub(1);
            idx += "</think>".len();
            continue;
        }
        if depth == 0 && rest.starts_with(sentinel) {
            return ScanResult { sentinel_at: Some(idx), depth };
        }

        let ch_len = rest.chars().next().map(char::len_utf8).unwrap_or(1);
        idx += ch_len;
    }

    ScanResult { sentinel_at: None, depth }
}

fn byte_offset(text: &str, char_count: usize) -> usize {
    text.char_indices().nth(char_count).map(|(i, _)| i).unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: &str = "<Function_Ab12_Start/>";

    #[test]
    fn plain_text_passes_through_once_past_lookahead() {
        let mut detector = StreamingDetector::new(SENTINEL);
        let out = detector.process_chunk("a long enough chunk of plain assistant text here");
        assert!(!out.is_empty());
        assert!(!detector.is_tool_parsing());
    }

    #[test]
    fn short_chunks_are_held_until_lookahead_is_satisfied() {
        let mut detector = StreamingDetector::new(SENTINEL);
        assert_eq!(detector.process_chunk("hi"), "");
        assert_eq!(detector.process_chunk("!!"), "");
    }

    #[test]
    fn sentinel_split_across_chunks_is_still_detected() {
        let mut detector = StreamingDetector::new(SENTINEL);
        detector.process_chunk("Sure thing, here goes nothing at all ");
        let first_half = &SENTINEL[..SENTINEL.len() - 4];
        let second_half = &SENTINEL[SENTINEL.len() - 4..];

        detector.process_chunk(first_half);
        assert!(!detector.is_tool_parsing());

        detector.process_chunk(second_half);
        detector.process_chunk("<function_calls></function_calls>");
        assert!(detector.is_tool_parsing());
    }

    #[test]
    fn sentinel_inside_think_block_does_not_trigger_tool_parsing() {
        let mut detector = StreamingDetector::new(SENTINEL);
        let chunk = format!("<think>{SENTINEL} musing about whether to call a tool</think>plenty of trailing plain text past the lookahead window");
        detector.process_chunk(&chunk);
        assert!(!detector.is_tool_parsing());
    }

    #[test]
    fn sentinel_after_think_block_triggers_tool_parsing() {
        let mut detector = StreamingDetector::new(SENTINEL);
        let chunk = format!("<think>considering</think>{SENTINEL}<function_calls><function_call><tool>f</tool><args></args></function_call></function_calls>");
        detector.process_chunk(&chunk);
        assert!(detector.is_tool_parsing());
        assert!(detector.ready_to_finalize());

        let calls = detector.finalize();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "f");
    }

    #[test]
    fn finish_flushes_held_back_tail_with_no_sentinel() {
        let mut detector = StreamingDetector::new(SENTINEL);
        detector.process_chunk("short tail");
        let flushed = detector.finish();
        assert_eq!(flushed, "short tail");
    }

    #[test]
    fn ready_to_finalize_is_false_before_closing_tag_arrives() {
        let mut detector = StreamingDetector::new(SENTINEL);
        let chunk = format!("{SENTINEL}<function_calls><function_call><tool>f</tool>");
        detector.process_chunk(&chunk);
        assert!(detector.is_tool_parsing());
        assert!(!detector.ready_to_finalize());
    }
}
