//! Incremental response handling shared by every backend.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};

use super::{InferenceBackend, InferenceError, InferenceRequest};

/// Lazy, finite, non-restartable sequence of text deltas.
pub type DeltaStream = BoxStream<'static, Result<String, InferenceError>>;

/// Whether a reply is requested token by token or in one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMode {
    #[default]
    Streaming,
    Batch,
}

/// Running buffer for a streamed reply.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    buffer: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return everything received so far.
    pub fn push(&mut self, delta: &str) -> &str {
        self.buffer.push_str(delta);
        &self.buffer
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Final reply text, trimmed.
    pub fn finish(self) -> String {
        self.buffer.trim().to_string()
    }
}

/// Run one inference call to completion.
///
/// In streaming mode `on_update` sees the accumulated buffer after every
/// delta, in arrival order. A failure at any point fails the whole call;
/// nothing received before it is kept.
pub async fn collect_reply<F>(
    backend: &dyn InferenceBackend,
    request: &InferenceRequest,
    mode: ReplyMode,
    mut on_update: F,
) -> Result<String, InferenceError>
where
    F: FnMut(&str),
{
    match mode {
        ReplyMode::Batch => {
            let text = backend.complete(request).await?;
            Ok(text.trim().to_string())
        }
        ReplyMode::Streaming => {
            let mut deltas = backend.stream(request).await?;
            let mut acc = StreamAccumulator::new();
            while let Some(delta) = deltas.next().await {
                let delta = delta?;
                on_update(acc.push(&delta));
            }
            Ok(acc.finish())
        }
    }
}

/// Splits arbitrary byte chunks into complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed a chunk, returning every line it completed (without the terminator).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Whatever is left once the source is exhausted.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Payload of a server-sent-events `data:` line, if this is one.
pub fn sse_data(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Turn a chunked byte stream into a stream of lines.
///
/// A transport error is yielded once and ends the stream.
pub fn byte_lines<S, B, E>(bytes: S) -> BoxStream<'static, Result<String, InferenceError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<InferenceError> + Send + 'static,
{
    let state = LineState {
        bytes: Box::pin(bytes),
        buffer: LineBuffer::default(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.buffer.push(chunk.as_ref());
                    state.ready.extend(lines);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    if let Some(rest) = state.buffer.finish() {
                        state.ready.push_back(rest);
                    }
                }
            }
        }
    })
    .boxed()
}

struct LineState<S> {
    bytes: Pin<Box<S>>,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    done: bool,
}
