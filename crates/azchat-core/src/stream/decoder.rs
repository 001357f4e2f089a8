//! Line-oriented decoding of the `data: <json>` event stream.
//!
//! The body looks like:
//! ```text
//! data: {"id":"...","choices":[{"index":0,"delta":{"content":"Hel"}}]}
//!
//! data: {"id":"...","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}
//!
//! data: [DONE]
//! ```
//! Lines without the `data: ` prefix are ignored. Payloads that fail to parse
//! are skipped and counted, never fatal.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::ai::types::ChatChunk;
use crate::error::ChatError;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// The parts of one decoded chunk the rest of the pipeline cares about.
/// Only `choices[0]` is consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    pub role: Option<String>,
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}

impl StreamEvent {
    pub fn content(text: &str) -> Self {
        Self { content: Some(text.to_string()), ..Default::default() }
    }

    pub fn finish(reason: &str) -> Self {
        Self { finish_reason: Some(reason.to_string()), ..Default::default() }
    }

    pub fn is_stop(&self) -> bool {
        self.finish_reason.as_deref() == Some("stop")
    }
}

/// What a single `data:` line decodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseRecord {
    Event(StreamEvent),
    /// The `[DONE]` sentinel. Nothing after it is read.
    Done,
}

#[derive(Debug)]
pub enum LineOutcome {
    Record(SseRecord),
    /// Blank, not a `data:` line, or a chunk without choices.
    Ignored,
    Malformed(serde_json::Error),
}

/// Counters for one decoded body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub lines: usize,
    pub records: usize,
    pub ignored: usize,
    pub skipped_malformed: usize,
}

impl DecodeStats {
    /// Fold one line into the counters and return its record, if any.
    fn observe(&mut self, line: &str) -> Option<SseRecord> {
        self.lines += 1;
        match decode_line(line) {
            LineOutcome::Record(record) => {
                self.records += 1;
                Some(record)
            }
            LineOutcome::Ignored => {
                self.ignored += 1;
                None
            }
            LineOutcome::Malformed(e) => {
                self.skipped_malformed += 1;
                debug!(error = %e, line, "skipping malformed event");
                None
            }
        }
    }

    fn log_summary(&self) {
        if self.skipped_malformed > 0 {
            warn!(
                lines = self.lines,
                records = self.records,
                skipped_malformed = self.skipped_malformed,
                "event stream contained malformed lines"
            );
        } else {
            debug!(lines = self.lines, records = self.records, "event stream decoded");
        }
    }
}

pub fn decode_line(line: &str) -> LineOutcome {
    let line = line.trim_end_matches('\r');
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineOutcome::Ignored;
    };

    if payload == DONE_SENTINEL {
        return LineOutcome::Record(SseRecord::Done);
    }

    let chunk: ChatChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => return LineOutcome::Malformed(e),
    };

    match chunk.choices.into_iter().next() {
        Some(choice) => LineOutcome::Record(SseRecord::Event(StreamEvent {
            role: choice.delta.role,
            content: choice.delta.content,
            finish_reason: choice.finish_reason,
        })),
        None => LineOutcome::Ignored,
    }
}

/// Splits arriving byte chunks on `\n`, holding back the incomplete tail.
///
/// Works on bytes so a multi-byte character split across two chunks is
/// reassembled before it is decoded.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let newline_pos = self.buf.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=newline_pos).collect();
        Some(String::from_utf8_lossy(&line[..newline_pos]).into_owned())
    }

    /// Whatever is left once the source is exhausted.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Lazily decode a fully buffered body. Stops at `[DONE]`, which is yielded.
pub struct BodyDecoder<'a> {
    lines: std::slice::Split<'a, u8, fn(&u8) -> bool>,
    stats: DecodeStats,
    done: bool,
}

fn is_newline(b: &u8) -> bool {
    *b == b'\n'
}

pub fn decode_body(raw: &[u8]) -> BodyDecoder<'_> {
    BodyDecoder {
        lines: raw.split(is_newline as fn(&u8) -> bool),
        stats: DecodeStats::default(),
        done: false,
    }
}

impl BodyDecoder<'_> {
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }
}

impl Iterator for BodyDecoder<'_> {
    type Item = SseRecord;

    fn next(&mut self) -> Option<SseRecord> {
        if self.done {
            return None;
        }
        for raw_line in self.lines.by_ref() {
            let line = String::from_utf8_lossy(raw_line);
            if let Some(record) = self.stats.observe(&line) {
                if record == SseRecord::Done {
                    self.done = true;
                }
                return Some(record);
            }
        }
        self.done = true;
        None
    }
}

/// Decode records as body bytes arrive.
///
/// Yields `Err(ChatError::EmptyResponse)` if the body ended without a single
/// byte, and `Err(ChatError::Transport)` if reading the body failed midway.
/// With an `idle_timeout`, a gap longer than that between two reads yields
/// `Err(ChatError::Stalled)`; the total length of the body is not limited.
/// The stream ends right after `[DONE]`.
pub fn decode_stream<S, E>(
    byte_stream: S,
    idle_timeout: Option<Duration>,
) -> impl Stream<Item = Result<SseRecord, ChatError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    async_stream::stream! {
        let mut byte_stream = std::pin::pin!(byte_stream);
        let mut splitter = LineSplitter::new();
        let mut stats = DecodeStats::default();
        let mut received = 0usize;

        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, byte_stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        stats.log_summary();
                        yield Err(ChatError::Stalled { stage: "reading the body", after: limit });
                        return;
                    }
                },
                None => byte_stream.next().await,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    stats.log_summary();
                    yield Err(e.into());
                    return;
                }
            };
            received += chunk.len();
            splitter.push(&chunk);

            while let Some(line) = splitter.next_line() {
                if let Some(record) = stats.observe(&line) {
                    let done = record == SseRecord::Done;
                    yield Ok(record);
                    if done {
                        stats.log_summary();
                        return;
                    }
                }
            }
        }

        if received == 0 {
            yield Err(ChatError::EmptyResponse);
            return;
        }

        if let Some(line) = splitter.finish() {
            if let Some(record) = stats.observe(&line) {
                yield Ok(record);
            }
        }
        stats.log_summary();
    }
}
