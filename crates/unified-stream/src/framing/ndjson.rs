// Newline-delimited JSON framing: one document per line.

use unified_stream_types::Error;

/// Splits decoded text into complete lines. Blank lines are skipped; the final
/// line is delivered by `finish` even without a trailing newline.
#[derive(Debug)]
pub struct NdjsonParser {
    buffer: String,
    max_line_bytes: usize,
}

impl Default for NdjsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl NdjsonParser {
    pub fn new() -> Self {
        Self::with_max_line_bytes(super::DEFAULT_MAX_BUFFER_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_line_bytes,
        }
    }

    pub fn feed(&mut self, chunk: &str) -> Result<Vec<String>, Error> {
        self.buffer.push_str(chunk);
        let mut lines = Vec::new();
        let mut consumed = 0;
        while let Some(rel) = self.buffer[consumed..].find('\n') {
            let line = self.buffer[consumed..consumed + rel].trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
            consumed += rel + 1;
        }
        self.buffer.drain(..consumed);

        if self.buffer.len() > self.max_line_bytes {
            return Err(Error::parse(format!(
                "NDJSON line exceeds {} bytes without a line break",
                self.max_line_bytes
            )));
        }
        Ok(lines)
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut parser = NdjsonParser::new();
        assert!(parser.feed("{\"a\":").unwrap().is_empty());
        let lines = parser.feed("1}\n{\"b\":2}\n").unwrap();
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_blank_and_crlf_lines() {
        let mut parser = NdjsonParser::new();
        let lines = parser.feed("\r\n{\"a\":1}\r\n\n   \n").unwrap();
        assert_eq!(lines, vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_final_line_without_newline() {
        let mut parser = NdjsonParser::new();
        assert!(parser.feed("{\"last\":true}").unwrap().is_empty());
        assert_eq!(parser.finish().as_deref(), Some("{\"last\":true}"));
        assert_eq!(parser.finish(), None);
    }

    #[test]
    fn test_overlong_line_rejected() {
        let mut parser = NdjsonParser::with_max_line_bytes(8);
        assert!(parser.feed("{\"too\":\"long\"").is_err());
    }
}
