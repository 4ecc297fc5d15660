//! Incremental decoder for streamed chat-completion responses.
//!
//! The wire format is server-sent messages separated by a delimiter
//! (two newlines by default). Each message may carry a `data:` prefix;
//! `data: [DONE]` terminates the stream. A payload that fails to parse is
//! NOT treated as a terminator: the delimiter may sit inside a
//! pretty-printed payload on lenient servers, so the decoder extends the
//! segment across later delimiters until it parses or input ends.

use serde_json::Value;

/// A decoded unit from the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum SsePayload {
    /// Visible text delta.
    Text(String),
    /// Reasoning-channel delta.
    Reasoning(String),
    /// End-of-stream marker.
    Done,
}

enum Decoded {
    Payload(SsePayload),
    Empty,
    Unparsed,
}

pub struct SseDecoder {
    buffer: String,
    delimiter: String,
    finished: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_delimiter("\n\n")
    }

    pub fn with_delimiter(delimiter: impl Into<String>) -> Self {
        Self {
            buffer: String::new(),
            delimiter: delimiter.into(),
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed a chunk of response bytes; returns payloads completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<SsePayload> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.push_str(chunk);

        let mut out = Vec::new();
        'consume: loop {
            // Candidate segment ends: each delimiter position, nearest
            // first. An unparseable prefix extends to the next one.
            let mut search_from = 0usize;
            loop {
                let Some(rel) = self.buffer[search_from..].find(&self.delimiter) else {
                    break 'consume;
                };
                let pos = search_from + rel;
                match decode_segment(&self.buffer[..pos]) {
                    Decoded::Payload(SsePayload::Done) => {
                        self.buffer.clear();
                        self.finished = true;
                        out.push(SsePayload::Done);
                        break 'consume;
                    }
                    Decoded::Payload(p) => {
                        self.buffer.drain(..pos + self.delimiter.len());
                        out.push(p);
                        continue 'consume;
                    }
                    Decoded::Empty => {
                        self.buffer.drain(..pos + self.delimiter.len());
                        continue 'consume;
                    }
                    Decoded::Unparsed => {
                        search_from = pos + self.delimiter.len();
                    }
                }
            }
        }
        out
    }

    /// Drain the buffer at end of stream: decode any remaining complete
    /// message, then fall back to a best-effort field extraction from an
    /// unparseable tail.
    pub fn flush(&mut self) -> Vec<SsePayload> {
        let remaining = std::mem::take(&mut self.buffer);
        let mut out = Vec::new();
        for segment in remaining.split(&self.delimiter) {
            match decode_segment(segment) {
                Decoded::Payload(SsePayload::Done) => {
                    self.finished = true;
                    out.push(SsePayload::Done);
                }
                Decoded::Payload(p) => out.push(p),
                Decoded::Empty => {}
                Decoded::Unparsed => {
                    if let Some(text) = extract_string_field(segment, "content") {
                        if !text.is_empty() {
                            out.push(SsePayload::Text(text));
                        }
                    } else if let Some(reasoning) =
                        extract_string_field(segment, "reasoning_content")
                    {
                        if !reasoning.is_empty() {
                            out.push(SsePayload::Reasoning(reasoning));
                        }
                    }
                }
            }
        }
        out
    }
}

fn decode_segment(segment: &str) -> Decoded {
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        return Decoded::Empty;
    }
    // SSE comment line.
    if trimmed.starts_with(':') && !trimmed.contains('\n') {
        return Decoded::Empty;
    }

    // Strip one leading `data:` and parse the remainder verbatim, so
    // whitespace inside a pretty-printed payload survives.
    let payload = trimmed
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(trimmed)
        .trim();
    if payload == "[DONE]" {
        return Decoded::Payload(SsePayload::Done);
    }
    if let Ok(value) = serde_json::from_str::<Value>(payload) {
        return interpret(&value);
    }

    // Standard multi-line SSE: each line carries its own `data:` prefix.
    let joined = trimmed
        .lines()
        .map(str::trim_start)
        .filter(|l| !l.is_empty() && !l.starts_with(':'))
        .map(|l| l.strip_prefix("data:").map(str::trim_start).unwrap_or(l))
        .collect::<Vec<_>>()
        .join("\n");
    if joined != payload {
        if joined.trim() == "[DONE]" {
            return Decoded::Payload(SsePayload::Done);
        }
        if let Ok(value) = serde_json::from_str::<Value>(&joined) {
            return interpret(&value);
        }
    }

    Decoded::Unparsed
}

fn interpret(value: &Value) -> Decoded {
    let delta = &value["choices"][0]["delta"];
    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            return Decoded::Payload(SsePayload::Text(text.to_owned()));
        }
    }
    if let Some(reasoning) = delta["reasoning_content"].as_str() {
        if !reasoning.is_empty() {
            return Decoded::Payload(SsePayload::Reasoning(reasoning.to_owned()));
        }
    }
    Decoded::Empty
}

/// Best-effort extraction of `"key":"…"` from a malformed JSON tail.
/// Reads the string with escape handling; an unterminated string yields
/// everything up to the end of input.
pub fn extract_string_field(raw: &str, key: &str) -> Option<String> {
    let needle = format!("\"{key}\"");
    let start = raw.find(&needle)? + needle.len();
    let rest = raw[start..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let rest = rest.strip_prefix('"')?;

    let mut out = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(out),
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('/') => out.push('/'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        out.push(ch);
                    }
                }
                Some(other) => out.push(other),
                None => break,
            },
            _ => out.push(c),
        }
    }
    // Unterminated string: return the partial content.
    Some(out)
}
