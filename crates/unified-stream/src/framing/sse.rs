// SSE (Server-Sent Events) parser: state machine for parsing event-stream text.

use unified_stream_types::Error;

/// Data payload that ends an event stream outright.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event type (from `event:` field).
    pub event_type: Option<String>,
    /// The data payload (from `data:` field(s), joined with newlines).
    pub data: String,
    /// The event ID (from `id:` field).
    pub id: Option<String>,
    /// The retry interval in milliseconds (from `retry:` field).
    pub retry: Option<u64>,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }
}

/// Incremental SSE parser that handles partial chunks.
///
/// Feed decoded text via `feed()` and receive complete events.
/// Handles `event:`, `data:`, `id:`, `retry:` fields, comment lines
/// (`:` prefix), multi-line data, CRLF, and blank line boundaries.
///
/// Once a `data: [DONE]` event is seen the parser is finished: the sentinel
/// event itself is not returned and every later byte is discarded unread.
#[derive(Debug)]
pub struct SseParser {
    /// Buffer for an incomplete line spanning chunk boundaries.
    buffer: String,
    event_type: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
    /// Whether we've seen any field for the current event.
    has_fields: bool,
    done: bool,
    max_line_bytes: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::with_max_line_bytes(super::DEFAULT_MAX_BUFFER_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            event_type: None,
            data_lines: Vec::new(),
            id: None,
            retry: None,
            has_fields: false,
            done: false,
            max_line_bytes,
        }
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk of text. Returns any complete events parsed from the chunk.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<SseEvent>, Error> {
        let mut events = Vec::new();
        if self.done {
            return Ok(events);
        }
        self.buffer.push_str(chunk);

        let mut consumed = 0;
        while let Some(rel) = self.buffer[consumed..].find('\n') {
            let pos = consumed + rel;
            let line_end = if pos > consumed && self.buffer.as_bytes()[pos - 1] == b'\r' {
                pos - 1
            } else {
                pos
            };
            let line = self.buffer[consumed..line_end].to_string();
            consumed = pos + 1;

            if line.is_empty() {
                // Blank line = event boundary
                if let Some(event) = self.emit_event() {
                    if event.is_done() {
                        tracing::debug!("event stream reached [DONE]");
                        self.done = true;
                        self.buffer.clear();
                        return Ok(events);
                    }
                    events.push(event);
                }
            } else {
                self.process_line(&line);
            }
        }
        self.buffer.drain(..consumed);

        if self.buffer.len() > self.max_line_bytes {
            return Err(Error::parse(format!(
                "event-stream line exceeds {} bytes without a line break",
                self.max_line_bytes
            )));
        }
        Ok(events)
    }

    /// Flush at end of input. A final event missing its blank-line terminator
    /// is still delivered.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.strip_suffix('\r').unwrap_or(&rest);
        if !rest.is_empty() {
            self.process_line(rest);
        }
        match self.emit_event() {
            Some(event) if event.is_done() => {
                self.done = true;
                Vec::new()
            }
            Some(event) => vec![event],
            None => Vec::new(),
        }
    }

    fn process_line(&mut self, line: &str) {
        // Comment lines start with ':'
        if line.starts_with(':') {
            return;
        }

        // A line without ':' is a field name with an empty value
        let (field, value) = match line.find(':') {
            Some(colon_pos) => {
                let value = &line[colon_pos + 1..];
                (&line[..colon_pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event_type = Some(value.to_string());
                self.has_fields = true;
            }
            "data" => {
                self.data_lines.push(value.to_string());
                self.has_fields = true;
            }
            "id" => {
                self.id = Some(value.to_string());
                self.has_fields = true;
            }
            "retry" => {
                self.retry = value.parse::<u64>().ok();
                self.has_fields = true;
            }
            _ => {}
        }
    }

    fn emit_event(&mut self) -> Option<SseEvent> {
        if !self.has_fields {
            return None;
        }

        let event = SseEvent {
            event_type: self.event_type.take(),
            data: self.data_lines.join("\n"),
            id: self.id.take(),
            retry: self.retry.take(),
        };

        self.data_lines.clear();
        self.has_fields = false;

        Some(event)
    }
}
