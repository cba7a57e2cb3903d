//! Server-Sent Events decoding for streaming completions.

use futures::stream::{BoxStream, StreamExt};
use std::collections::VecDeque;

use super::error::{GatewayError, UpstreamCategory};
use super::traits::ChatStream;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseBuffer {
    bytes: Vec<u8>,
    current: SseEvent,
    has_data: bool,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.bytes.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.bytes.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.bytes.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.bytes.is_empty() {
            let rest = std::mem::take(&mut self.bytes);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.current.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if !self.has_data && self.current.event.is_none() {
            return None;
        }
        self.has_data = false;
        Some(std::mem::take(&mut self.current))
    }
}

/// What a backend-specific decoder made of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseStep {
    Emit(String),
    Skip,
    Done,
}

struct StreamState<F> {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buffer: SseBuffer,
    pending: VecDeque<SseEvent>,
    decode: F,
    backend: String,
    eof: bool,
    finished: bool,
}

/// Turn an SSE response body into a stream of text increments.
///
/// The stream ends when `decode` returns [`SseStep::Done`]. A body that closes
/// before that yields a final `InvalidResponse` error.
pub fn event_stream<F>(response: reqwest::Response, backend: impl Into<String>, decode: F) -> ChatStream
where
    F: FnMut(&SseEvent) -> Result<SseStep, GatewayError> + Send + 'static,
{
    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map(|b| b.to_vec()))
        .boxed();

    let state = StreamState {
        body,
        buffer: SseBuffer::new(),
        pending: VecDeque::new(),
        decode,
        backend: backend.into(),
        eof: false,
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(event) = state.pending.pop_front() {
                match (state.decode)(&event) {
                    Ok(SseStep::Emit(text)) => return Some((Ok(text), state)),
                    Ok(SseStep::Skip) => continue,
                    Ok(SseStep::Done) => return None,
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.eof {
                state.finished = true;
                let err = GatewayError::upstream(
                    state.backend.clone(),
                    UpstreamCategory::InvalidResponse,
                    None,
                    "stream closed before end-of-stream marker",
                );
                return Some((Err(err), state));
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.buffer.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    let err = GatewayError::from_reqwest(state.backend.clone(), &e);
                    return Some((Err(err), state));
                }
                None => {
                    state.eof = true;
                    if let Some(event) = state.buffer.finish() {
                        state.pending.push_back(event);
                    }
                }
            }
        }
    })
    .boxed()
}
