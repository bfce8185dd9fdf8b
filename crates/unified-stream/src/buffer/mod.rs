//! Token buffer: regroups small deltas into display-sized fragments.
//!
//! The buffer owns no timer. Time-based flushing happens when the caller
//! ticks [`TokenBuffer::check_time_flush`] (or adds a token), measured against
//! an injected [`Clock`].

mod stream;

pub use stream::{buffered, buffered_with_clock};

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use unified_stream_types::{Error, FinishReason, StreamChunk, Usage};

/// Time source for the time-based strategy.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Caller-supplied flush predicate over the buffered text.
pub type FlushPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum FlushStrategy {
    /// Flush once `max_tokens` tokens are buffered.
    Size,
    /// Flush once `flush_interval` has elapsed since the first buffered token.
    Time,
    /// Flush when the text ends on whitespace or punctuation.
    WordBoundary,
    /// Boundary first, then size, then time.
    Hybrid,
    Custom(FlushPredicate),
}

impl fmt::Debug for FlushStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size => f.write_str("Size"),
            Self::Time => f.write_str("Time"),
            Self::WordBoundary => f.write_str("WordBoundary"),
            Self::Hybrid => f.write_str("Hybrid"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    SizeThreshold,
    TimeInterval,
    WordBoundary,
    PunctuationBoundary,
    SentenceBoundary,
    BufferOverflow,
    ForceFlush,
    StreamComplete,
    CustomCondition,
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub strategy: FlushStrategy,
    /// Tokens per flush for `Size` and `Hybrid`.
    pub max_tokens: usize,
    /// Interval for `Time` and `Hybrid`.
    pub flush_interval: Duration,
    /// Content byte length above which the buffer flushes regardless of strategy.
    pub max_buffer_size: usize,
    /// Words required before a whitespace boundary flushes.
    pub min_words: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            strategy: FlushStrategy::Hybrid,
            max_tokens: 20,
            flush_interval: Duration::from_millis(100),
            max_buffer_size: 4096,
            min_words: 2,
        }
    }
}

impl BufferConfig {
    pub fn with_strategy(strategy: FlushStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    pub fn min_words(mut self, words: usize) -> Self {
        self.min_words = words;
        self
    }

    /// Fail fast on parameters the chosen strategy cannot work with.
    pub fn validate(&self) -> Result<(), Error> {
        let needs_size = matches!(self.strategy, FlushStrategy::Size | FlushStrategy::Hybrid);
        let needs_time = matches!(self.strategy, FlushStrategy::Time | FlushStrategy::Hybrid);
        if needs_size && self.max_tokens == 0 {
            return Err(Error::validation(format!(
                "{:?} strategy requires max_tokens > 0",
                self.strategy
            )));
        }
        if needs_time && self.flush_interval.is_zero() {
            return Err(Error::validation(format!(
                "{:?} strategy requires a flush_interval greater than zero",
                self.strategy
            )));
        }
        if self.max_buffer_size == 0 {
            return Err(Error::validation("max_buffer_size must be greater than 0"));
        }
        Ok(())
    }
}

/// Everything delivered alongside a flushed fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushInfo {
    pub reason: FlushReason,
    /// Content tokens in this fragment.
    pub token_count: usize,
    pub flushed_at: Instant,
    /// Time since the first token of this fragment was buffered.
    pub buffered_for: Duration,
    /// Reasoning text accumulated since the last flush.
    pub thinking: Option<String>,
    /// Usage seen since the last flush (terminal chunks only).
    pub usage: Option<Usage>,
    pub model: Option<String>,
    pub finish_reason: Option<FinishReason>,
}

/// A flushed fragment as an owned value.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub info: FlushInfo,
}

/// Receives flushed fragments.
pub trait FlushSink {
    fn flush(&mut self, text: &str, info: &FlushInfo);
}

impl<F> FlushSink for F
where
    F: FnMut(&str, &FlushInfo),
{
    fn flush(&mut self, text: &str, info: &FlushInfo) {
        self(text, info)
    }
}

impl FlushSink for VecDeque<Fragment> {
    fn flush(&mut self, text: &str, info: &FlushInfo) {
        self.push_back(Fragment {
            text: text.to_string(),
            info: info.clone(),
        });
    }
}

/// Running counters. Persist across flushes until [`TokenBuffer::reset_stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BufferStats {
    pub total_tokens: u64,
    pub total_flushes: u64,
    pub thinking_tokens: u64,
    pub flushes_by_reason: HashMap<FlushReason, u64>,
    /// Content tokens flushed divided by flushes.
    pub average_flush_size: f64,
    #[serde(skip)]
    flushed_tokens: u64,
}

impl BufferStats {
    pub fn flushes_for(&self, reason: FlushReason) -> u64 {
        self.flushes_by_reason.get(&reason).copied().unwrap_or(0)
    }

    fn record_flush(&mut self, reason: FlushReason, tokens: usize) {
        self.total_flushes += 1;
        self.flushed_tokens += tokens as u64;
        *self.flushes_by_reason.entry(reason).or_insert(0) += 1;
        self.average_flush_size = self.flushed_tokens as f64 / self.total_flushes as f64;
    }
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_punctuation(c: char) -> bool {
    matches!(c, ',' | ';' | ':')
}

/// Regroups tokens under a [`FlushStrategy`], delivering fragments to `S`.
pub struct TokenBuffer<S: FlushSink> {
    config: BufferConfig,
    sink: S,
    clock: Arc<dyn Clock>,
    content: String,
    thinking: String,
    token_count: usize,
    window_start: Option<Instant>,
    pending_usage: Option<Usage>,
    pending_model: Option<String>,
    pending_finish: Option<FinishReason>,
    stats: BufferStats,
}

impl<S: FlushSink> TokenBuffer<S> {
    pub fn new(config: BufferConfig, sink: S) -> Result<Self, Error> {
        Self::with_clock(config, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BufferConfig, sink: S, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            sink,
            clock,
            content: String::new(),
            thinking: String::new(),
            token_count: 0,
            window_start: None,
            pending_usage: None,
            pending_model: None,
            pending_finish: None,
            stats: BufferStats::default(),
        })
    }

    /// Add one content token. May flush.
    pub fn add_token(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.start_window();
        self.content.push_str(text);
        self.token_count += 1;
        self.stats.total_tokens += 1;

        if self.flush_if_overflowing() {
            return;
        }
        if let Some(reason) = self.strategy_reason() {
            self.flush(reason);
        }
    }

    /// Add reasoning text. Kept apart from content and ignored by the flush
    /// strategy, but it still counts toward `max_buffer_size`.
    pub fn add_thinking(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.start_window();
        self.thinking.push_str(text);
        self.stats.thinking_tokens += 1;
        self.flush_if_overflowing();
    }

    /// Feed a normalized chunk. A chunk carrying a finish reason flushes
    /// everything with [`FlushReason::StreamComplete`].
    pub fn add_stream_chunk(&mut self, chunk: &StreamChunk) {
        if !chunk.model.is_empty() {
            self.pending_model = Some(chunk.model.clone());
        }
        if let Some(usage) = &chunk.usage {
            self.pending_usage = Some(usage.clone());
        }
        if let Some(thinking) = chunk.thinking() {
            self.add_thinking(thinking);
        }
        if let Some(content) = chunk.content() {
            self.add_token(content);
        }
        if let Some(finish) = chunk.finish_reason() {
            self.pending_finish = Some(finish);
            self.flush(FlushReason::StreamComplete);
        }
    }

    /// Time tick for `Time` and `Hybrid`. Returns whether a flush happened.
    pub fn check_time_flush(&mut self) -> bool {
        if !matches!(self.config.strategy, FlushStrategy::Time | FlushStrategy::Hybrid) {
            return false;
        }
        if self.is_empty() || !self.interval_elapsed() {
            return false;
        }
        self.flush(FlushReason::TimeInterval)
    }

    /// Flush whatever is buffered. No-op on an empty buffer.
    pub fn force_flush(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.flush(FlushReason::ForceFlush)
    }

    /// Nothing buffered: no content, thinking, or pending terminal data.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
            && self.thinking.is_empty()
            && self.pending_usage.is_none()
            && self.pending_finish.is_none()
    }

    pub fn buffered_text(&self) -> &str {
        &self.content
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = BufferStats::default();
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Content and thinking together are bounded by `max_buffer_size`.
    fn flush_if_overflowing(&mut self) -> bool {
        let bytes = self.content.len() + self.thinking.len();
        if bytes <= self.config.max_buffer_size {
            return false;
        }
        tracing::debug!(bytes, limit = self.config.max_buffer_size, "token buffer overflow");
        self.flush(FlushReason::BufferOverflow)
    }

    fn start_window(&mut self) {
        if self.window_start.is_none() {
            self.window_start = Some(self.clock.now());
        }
    }

    fn interval_elapsed(&self) -> bool {
        self.window_start.is_some_and(|start| {
            self.clock.now().saturating_duration_since(start) >= self.config.flush_interval
        })
    }

    fn boundary_reason(&self) -> Option<FlushReason> {
        let last = self.content.chars().next_back()?;
        if is_sentence_end(last) {
            return Some(FlushReason::SentenceBoundary);
        }
        if is_punctuation(last) {
            return Some(FlushReason::PunctuationBoundary);
        }
        if !last.is_whitespace() {
            return None;
        }
        match self.content.trim_end().chars().next_back() {
            Some(c) if is_sentence_end(c) => Some(FlushReason::SentenceBoundary),
            Some(c) if is_punctuation(c) => Some(FlushReason::PunctuationBoundary),
            Some(_) if self.content.split_whitespace().count() >= self.config.min_words => {
                Some(FlushReason::WordBoundary)
            }
            _ => None,
        }
    }

    fn strategy_reason(&self) -> Option<FlushReason> {
        let size = || {
            (self.token_count >= self.config.max_tokens).then_some(FlushReason::SizeThreshold)
        };
        let time = || self.interval_elapsed().then_some(FlushReason::TimeInterval);
        match &self.config.strategy {
            FlushStrategy::Size => size(),
            FlushStrategy::Time => time(),
            FlushStrategy::WordBoundary => self.boundary_reason(),
            FlushStrategy::Hybrid => self.boundary_reason().or_else(size).or_else(time),
            FlushStrategy::Custom(predicate) => {
                predicate(&self.content).then_some(FlushReason::CustomCondition)
            }
        }
    }

    /// Deliver the accumulator to the sink and reset it.
    fn flush(&mut self, reason: FlushReason) -> bool {
        if self.is_empty() {
            return false;
        }
        let now = self.clock.now();
        let info = FlushInfo {
            reason,
            token_count: self.token_count,
            flushed_at: now,
            buffered_for: self
                .window_start
                .map(|start| now.saturating_duration_since(start))
                .unwrap_or_default(),
            thinking: (!self.thinking.is_empty()).then(|| std::mem::take(&mut self.thinking)),
            usage: self.pending_usage.take(),
            model: self.pending_model.take(),
            finish_reason: self.pending_finish.take(),
        };
        let text = std::mem::take(&mut self.content);
        self.stats.record_flush(reason, self.token_count);
        self.token_count = 0;
        self.window_start = None;

        self.sink.flush(&text, &info);
        true
    }
}

impl<S: FlushSink> fmt::Debug for TokenBuffer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBuffer")
            .field("strategy", &self.config.strategy)
            .field("buffered_bytes", &self.content.len())
            .field("token_count", &self.token_count)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
