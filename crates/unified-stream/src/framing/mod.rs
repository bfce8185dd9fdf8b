//! Wire framings: turning decoded transport text into discrete JSON frames.
//!
//! Event-stream, newline-delimited JSON, and a streamed top-level JSON array
//! all reduce to the same [`Frame`] so the provider translators never care
//! which framing was used.

pub mod json_array;
pub mod ndjson;
pub mod sse;
pub mod utf8;

use serde_json::Value;
use unified_stream_types::{Error, GeminiStreamFormat};

pub use json_array::JsonArrayReassembler;
pub use ndjson::NdjsonParser;
pub use sse::{SseEvent, SseParser};
pub use utf8::Utf8Decoder;

/// Default cap on unconsumed text any decoder will hold (4 MiB).
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// One complete provider event, independent of framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event name, when the framing carries one (`event:` in SSE).
    pub event: Option<String>,
    /// Raw JSON text of the event.
    pub data: String,
}

impl Frame {
    pub fn new(event: Option<String>, data: impl Into<String>) -> Self {
        Self {
            event,
            data: data.into(),
        }
    }

    /// Parse the payload. A malformed event is a parse error.
    pub fn json(&self) -> Result<Value, Error> {
        serde_json::from_str(&self.data).map_err(|e| {
            Error::parse_with_source(format!("malformed event payload: {e}"), e)
        })
    }
}

/// Frames decoded from one chunk of text.
#[derive(Debug, Default)]
pub struct Decoded {
    pub frames: Vec<Frame>,
    /// The stream signalled its own end; nothing after this may be decoded.
    pub done: bool,
}

/// Which framing to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Sse,
    Ndjson,
    JsonArray,
    /// Decide from the first non-whitespace character.
    Auto,
}

impl From<GeminiStreamFormat> for Framing {
    fn from(format: GeminiStreamFormat) -> Self {
        match format {
            GeminiStreamFormat::Sse => Self::Sse,
            GeminiStreamFormat::Ndjson => Self::Ndjson,
            GeminiStreamFormat::JsonArray => Self::JsonArray,
            GeminiStreamFormat::Auto => Self::Auto,
        }
    }
}

/// Stateful decoder for one response body.
#[derive(Debug)]
pub enum FrameDecoder {
    Sse(SseParser),
    Ndjson(NdjsonParser),
    JsonArray(JsonArrayReassembler),
    /// Holding leading whitespace until the framing can be sniffed.
    Sniffing(String),
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        match framing {
            Framing::Sse => Self::Sse(SseParser::new()),
            Framing::Ndjson => Self::Ndjson(NdjsonParser::new()),
            Framing::JsonArray => Self::JsonArray(JsonArrayReassembler::new()),
            Framing::Auto => Self::Sniffing(String::new()),
        }
    }

    /// Pick a framing from the first non-whitespace character of the body.
    pub fn sniff(first: char) -> Framing {
        match first {
            '[' => Framing::JsonArray,
            '{' => Framing::Ndjson,
            _ => Framing::Sse,
        }
    }

    pub fn feed(&mut self, text: &str) -> Result<Decoded, Error> {
        match self {
            Self::Sse(parser) => {
                let frames = parser
                    .feed(text)?
                    .into_iter()
                    .map(|e| Frame::new(e.event_type, e.data))
                    .collect();
                Ok(Decoded {
                    frames,
                    done: parser.is_done(),
                })
            }
            Self::Ndjson(parser) => Ok(Decoded {
                frames: parser
                    .feed(text)?
                    .into_iter()
                    .map(|line| Frame::new(None, line))
                    .collect(),
                done: false,
            }),
            Self::JsonArray(reassembler) => Ok(Decoded {
                frames: reassembler
                    .feed(text)?
                    .into_iter()
                    .map(|element| Frame::new(None, element))
                    .collect(),
                done: false,
            }),
            Self::Sniffing(pending) => {
                pending.push_str(text);
                let Some(first) = pending.chars().find(|c| !c.is_whitespace()) else {
                    return Ok(Decoded::default());
                };
                let framing = Self::sniff(first);
                tracing::debug!(?framing, "detected stream framing");
                let held = std::mem::take(pending);
                *self = Self::new(framing);
                self.feed(&held)
            }
        }
    }

    /// Flush at end of input. Fails if the body ended mid-element.
    pub fn finish(&mut self) -> Result<Vec<Frame>, Error> {
        match self {
            Self::Sse(parser) => Ok(parser
                .finish()
                .into_iter()
                .map(|e| Frame::new(e.event_type, e.data))
                .collect()),
            Self::Ndjson(parser) => Ok(parser
                .finish()
                .map(|line| vec![Frame::new(None, line)])
                .unwrap_or_default()),
            Self::JsonArray(reassembler) => {
                reassembler.finish()?;
                Ok(Vec::new())
            }
            Self::Sniffing(_) => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(framing: Framing, pieces: &[&str]) -> Vec<String> {
        let mut decoder = FrameDecoder::new(framing);
        let mut out = Vec::new();
        for piece in pieces {
            let decoded = decoder.feed(piece).unwrap();
            out.extend(decoded.frames.into_iter().map(|f| f.data));
            if decoded.done {
                return out;
            }
        }
        out.extend(decoder.finish().unwrap().into_iter().map(|f| f.data));
        out
    }

    #[test]
    fn test_sniff_rules() {
        assert_eq!(FrameDecoder::sniff('['), Framing::JsonArray);
        assert_eq!(FrameDecoder::sniff('{'), Framing::Ndjson);
        assert_eq!(FrameDecoder::sniff('d'), Framing::Sse);
        assert_eq!(FrameDecoder::sniff(':'), Framing::Sse);
    }

    #[test]
    fn test_auto_detects_json_array_after_whitespace() {
        let out = decode_all(Framing::Auto, &["\n  ", "[{\"a\":1}", ",{\"a\":2}]"]);
        assert_eq!(out, vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[test]
    fn test_auto_detects_ndjson() {
        let out = decode_all(Framing::Auto, &["{\"a\":1}\n{\"a\"", ":2}"]);
        assert_eq!(out, vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[test]
    fn test_auto_detects_sse() {
        let out = decode_all(Framing::Auto, &["data: {\"a\":1}\n\n"]);
        assert_eq!(out, vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_sse_done_reported() {
        let mut decoder = FrameDecoder::new(Framing::Sse);
        let decoded = decoder.feed("data: {}\n\ndata: [DONE]\n\n").unwrap();
        assert_eq!(decoded.frames.len(), 1);
        assert!(decoded.done);
    }

    #[test]
    fn test_frame_json_parse_error() {
        let frame = Frame::new(None, "{not json");
        let err = frame.json().unwrap_err();
        assert_eq!(err.kind, unified_stream_types::ErrorKind::Parse);
    }

    #[test]
    fn test_from_stream_format() {
        assert_eq!(Framing::from(GeminiStreamFormat::Auto), Framing::Auto);
        assert_eq!(Framing::from(GeminiStreamFormat::Sse), Framing::Sse);
    }
}
