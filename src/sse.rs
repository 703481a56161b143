//! Server-Sent Events wire format
//!
//! [`SseDecoder`] reads upstream streams (llama-server, LLM backends) and
//! the `*_event` helpers build every frame this service sends downstream.

use std::collections::VecDeque;
use std::convert::Infallible;

use axum::response::sse::Event;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;

use crate::logging::LogEntry;

/// End-of-stream marker shared by upstream and downstream streams
pub const DONE_MARKER: &str = "[DONE]";

/// A decoded upstream frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    Done,
}

/// Incremental `data:` line decoder
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence or
/// between `\r` and `\n`. Only `data:` fields are surfaced; comments and
/// other fields are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = parse_line(&line[..line.len() - 1]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Option<SseFrame> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Option<SseFrame> {
    let line = String::from_utf8_lossy(line);
    let line = line.strip_suffix('\r').unwrap_or(&line);
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim() == DONE_MARKER {
        Some(SseFrame::Done)
    } else if payload.is_empty() {
        None
    } else {
        Some(SseFrame::Data(payload.to_string()))
    }
}

/// One item of a token stream
///
/// Every streaming source (local model, LLM backends) is normalized to this
/// before it reaches a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    Token(String),
    Done,
    Error(String),
}

pub type TokenStream = BoxStream<'static, TokenEvent>;

/// Raw upstream body chunks; errors are already rendered as text
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, String>>;

struct DecodeState<F> {
    bytes: ByteStream,
    decoder: SseDecoder,
    parse: F,
    pending: VecDeque<TokenEvent>,
    finished: bool,
}

impl<F> DecodeState<F>
where
    F: FnMut(&str) -> Vec<TokenEvent>,
{
    fn enqueue(&mut self, frames: Vec<SseFrame>) {
        for frame in frames {
            if self.finished {
                return;
            }
            let events = match frame {
                SseFrame::Done => vec![TokenEvent::Done],
                SseFrame::Data(payload) => (self.parse)(&payload),
            };
            for event in events {
                let terminal = !matches!(event, TokenEvent::Token(_));
                self.pending.push_back(event);
                if terminal {
                    self.finished = true;
                    break;
                }
            }
        }
    }
}

/// Decode an upstream SSE body into token events
///
/// `parse` maps one `data:` payload to zero or more events. The resulting
/// stream ends with exactly one `Done` or `Error`; anything after the first
/// terminal event is ignored, and end of body counts as `Done`.
pub fn token_stream<F>(bytes: ByteStream, parse: F) -> TokenStream
where
    F: FnMut(&str) -> Vec<TokenEvent> + Send + 'static,
{
    let state = DecodeState {
        bytes,
        decoder: SseDecoder::new(),
        parse,
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.push(&chunk);
                    state.enqueue(frames);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.push_back(TokenEvent::Error(e));
                }
                None => {
                    let tail: Vec<SseFrame> = state.decoder.finish().into_iter().collect();
                    state.enqueue(tail);
                    if !state.finished {
                        state.finished = true;
                        state.pending.push_back(TokenEvent::Done);
                    }
                }
            }
        }
    })
    .boxed()
}

/// Download progress state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Downloading,
    Done,
    Error,
}

/// Download progress frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub percent: u8,
    pub message: String,
    pub status: ProgressStatus,
}

impl Progress {
    pub fn downloading(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
            status: ProgressStatus::Downloading,
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            percent: 100,
            message: message.into(),
            status: ProgressStatus::Done,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            percent: 0,
            message: message.into(),
            status: ProgressStatus::Error,
        }
    }
}

pub fn token_event(token: &str) -> Event {
    Event::default().data(json!({ "token": token }).to_string())
}

pub fn error_event(message: &str) -> Event {
    Event::default().data(json!({ "error": message }).to_string())
}

pub fn done_event() -> Event {
    Event::default().data(DONE_MARKER)
}

pub fn progress_event(progress: &Progress) -> Event {
    Event::default().data(to_json(progress))
}

pub fn log_event(entry: &LogEntry) -> Event {
    Event::default().data(to_json(entry))
}

/// Encode token events as downstream frames
///
/// Tokens become `{"token": ..}` frames. The first `Done` or `Error` (or the
/// end of `events`) closes the stream with `[DONE]`; an error frame is sent
/// just before it.
pub fn token_frames<S>(events: S) -> BoxStream<'static, Result<Event, Infallible>>
where
    S: Stream<Item = TokenEvent> + Send + 'static,
{
    stream::unfold((events.boxed(), false), |(mut events, finished)| async move {
        if finished {
            return None;
        }
        let frames = match events.next().await {
            Some(TokenEvent::Token(token)) => return Some((vec![token_event(&token)], (events, false))),
            Some(TokenEvent::Done) | None => vec![done_event()],
            Some(TokenEvent::Error(message)) => vec![error_event(&message), done_event()],
        };
        Some((frames, (events, true)))
    })
    .flat_map(|frames| stream::iter(frames.into_iter().map(Ok)))
    .boxed()
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}
