// Reassembly of a streamed top-level JSON array into its elements.

use unified_stream_types::Error;

/// Default cap on elements extracted from a single fed chunk.
pub const DEFAULT_MAX_ELEMENTS_PER_FEED: usize = 10_000;

/// Extracts complete elements from a JSON array that arrives in arbitrary
/// byte-sized pieces: `[{...},{...},...]`.
///
/// The scanner tracks bracket depth, string state, and escapes. Each byte is
/// examined once; scan state survives between `feed` calls so an element
/// (or an escape sequence) may be split anywhere.
#[derive(Debug)]
pub struct JsonArrayReassembler {
    /// Unconsumed text, starting at the current partial element if any.
    buffer: String,
    /// Offset in `buffer` of the next byte to scan.
    scan_pos: usize,
    /// Nesting depth inside the current element (0 = between elements).
    depth: usize,
    in_string: bool,
    escape_next: bool,
    /// Offset in `buffer` where the current element began.
    element_start: Option<usize>,
    /// The opening `[` has been seen.
    opened: bool,
    /// The closing `]` has been seen.
    closed: bool,
    max_buffer_bytes: usize,
    max_elements_per_feed: usize,
}

impl Default for JsonArrayReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonArrayReassembler {
    pub fn new() -> Self {
        Self::with_limits(
            super::DEFAULT_MAX_BUFFER_BYTES,
            DEFAULT_MAX_ELEMENTS_PER_FEED,
        )
    }

    pub fn with_limits(max_buffer_bytes: usize, max_elements_per_feed: usize) -> Self {
        Self {
            buffer: String::new(),
            scan_pos: 0,
            depth: 0,
            in_string: false,
            escape_next: false,
            element_start: None,
            opened: false,
            closed: false,
            max_buffer_bytes,
            max_elements_per_feed,
        }
    }

    /// Whether the closing bracket of the array has been consumed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Feed the next piece of text and return every element it completes, in
    /// order, as raw JSON text.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<String>, Error> {
        let mut elements = Vec::new();
        if self.closed {
            if !chunk.trim().is_empty() {
                tracing::debug!(
                    bytes = chunk.len(),
                    "discarding data after closing ']' of streamed array"
                );
            }
            return Ok(elements);
        }
        self.buffer.push_str(chunk);

        let bytes = self.buffer.as_bytes();
        let mut i = self.scan_pos;
        while i < bytes.len() {
            let b = bytes[i];

            if self.in_string {
                if self.escape_next {
                    self.escape_next = false;
                } else if b == b'\\' {
                    self.escape_next = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                i += 1;
                continue;
            }

            if !self.opened {
                match b {
                    b'[' => self.opened = true,
                    b if b.is_ascii_whitespace() => {}
                    other => {
                        return Err(Error::parse(format!(
                            "expected '[' to open streamed array, found {:?}",
                            other as char
                        )))
                    }
                }
                i += 1;
                continue;
            }

            match b {
                b'"' if self.depth > 0 => self.in_string = true,
                b'{' | b'[' => {
                    if self.depth == 0 {
                        self.element_start = Some(i);
                    }
                    self.depth += 1;
                }
                b'}' | b']' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        if let Some(start) = self.element_start.take() {
                            elements.push(self.buffer[start..=i].to_string());
                            if elements.len() > self.max_elements_per_feed {
                                return Err(Error::parse(format!(
                                    "more than {} array elements in a single chunk",
                                    self.max_elements_per_feed
                                )));
                            }
                        }
                    }
                }
                b']' => {
                    self.closed = true;
                    i += 1;
                    break;
                }
                b',' if self.depth == 0 => {}
                b if b.is_ascii_whitespace() => {}
                _ if self.depth > 0 => {}
                other => {
                    return Err(Error::parse(format!(
                        "unexpected {:?} between streamed array elements",
                        other as char
                    )))
                }
            }
            i += 1;
        }

        // Drop everything before the partial element (or everything scanned).
        let keep_from = self.element_start.unwrap_or(i);
        self.buffer.drain(..keep_from);
        self.scan_pos = i - keep_from;
        if let Some(start) = self.element_start.as_mut() {
            *start = 0;
        }
        if self.closed {
            self.buffer.clear();
            self.scan_pos = 0;
        }

        if self.buffer.len() > self.max_buffer_bytes {
            return Err(Error::parse(format!(
                "incomplete array element exceeds {} bytes",
                self.max_buffer_bytes
            )));
        }
        Ok(elements)
    }

    /// Check the end-of-input state. A partially received element means the
    /// payload was truncated.
    pub fn finish(&mut self) -> Result<(), Error> {
        if self.element_start.is_some() || self.depth > 0 || self.in_string {
            let partial = self.buffer.len();
            self.buffer.clear();
            return Err(Error::parse(format!(
                "stream ended inside an array element ({partial} bytes unparsed)"
            )));
        }
        if !self.closed && self.opened {
            tracing::debug!("streamed array ended without closing ']'");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unified_stream_types::ErrorKind;

    fn feed_all(r: &mut JsonArrayReassembler, pieces: &[&str]) -> Vec<String> {
        pieces
            .iter()
            .flat_map(|p| r.feed(p).unwrap())
            .collect()
    }

    #[test]
    fn test_whole_array_in_one_chunk() {
        let mut r = JsonArrayReassembler::new();
        let out = feed_all(&mut r, &["[{\"a\":1},{\"b\":[2,3]}]"]);
        assert_eq!(out, vec!["{\"a\":1}", "{\"b\":[2,3]}"]);
        assert!(r.is_closed());
        r.finish().unwrap();
    }

    #[test]
    fn test_brace_inside_string_does_not_end_element() {
        let mut r = JsonArrayReassembler::new();
        let out = feed_all(&mut r, &["[{\"text\":\"a}b\"", "}]"]);
        assert_eq!(out.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(parsed["text"], "a}b");
    }

    #[test]
    fn test_escape_split_after_backslash() {
        let mut r = JsonArrayReassembler::new();
        let out = feed_all(&mut r, &["[{\"text\":\"say \\", "\"hi\\\" }\"}]"]);
        assert_eq!(out.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(parsed["text"], "say \"hi\" }");
    }

    #[test]
    fn test_every_split_point_yields_same_elements() {
        let payload = "[\n{\"t\":\"x,]}\\\\\\\"\"},\r\n {\"n\":{\"deep\":[1,{\"k\":\"v\"}]}} ,{\"e\":\"é🦀\"}\n]";
        let mut whole = JsonArrayReassembler::new();
        let expected = whole.feed(payload).unwrap();
        assert_eq!(expected.len(), 3);
        for split in 0..=payload.len() {
            if !payload.is_char_boundary(split) {
                continue;
            }
            let mut r = JsonArrayReassembler::new();
            let out = feed_all(&mut r, &[&payload[..split], &payload[split..]]);
            assert_eq!(out, expected, "split at {split}");
            r.finish().unwrap();
        }
    }

    #[test]
    fn test_truncated_element_is_parse_error() {
        let mut r = JsonArrayReassembler::new();
        let out = r.feed("[{\"a\":1},{\"b\":").unwrap();
        assert_eq!(out.len(), 1);
        let err = r.finish().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn test_unclosed_array_without_partial_is_accepted() {
        let mut r = JsonArrayReassembler::new();
        assert_eq!(r.feed("[{\"a\":1},").unwrap().len(), 1);
        r.finish().unwrap();
    }

    #[test]
    fn test_missing_open_bracket_is_parse_error() {
        let mut r = JsonArrayReassembler::new();
        assert_eq!(r.feed("  {\"a\":1}").unwrap_err().kind, ErrorKind::Parse);
    }

    #[test]
    fn test_buffer_limit_enforced() {
        let mut r = JsonArrayReassembler::with_limits(32, 10);
        let err = r
            .feed("[{\"text\":\"this element never finishes and keeps growing")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn test_element_limit_per_feed_enforced() {
        let mut r = JsonArrayReassembler::with_limits(1024, 2);
        let err = r.feed("[{},{},{}]").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn test_data_after_close_is_ignored() {
        let mut r = JsonArrayReassembler::new();
        assert_eq!(r.feed("[{\"a\":1}]").unwrap().len(), 1);
        assert!(r.feed("{\"b\":2}").unwrap().is_empty());
        r.finish().unwrap();
    }
}
