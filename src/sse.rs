//! Re-framing of an upstream `text/event-stream` body.
//!
//! Providers stream `data: {...}` lines, but network chunks carry no promise
//! of lining up with those lines. [`Reframer`] buffers raw bytes until a
//! newline shows up and only ever looks at complete lines, so a payload split
//! mid-line or mid-codepoint comes out whole. [`reframe`] drives it over a
//! `reqwest` byte stream and yields the bytes written back to the caller.

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Payload that marks the normal end of an OpenAI-compatible stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data: ";
const DATA_FIELD: &str = "data:";

/// Result of processing a single upstream SSE line.
#[derive(Debug, PartialEq)]
pub enum SseLine {
    /// Payload to re-emit as one frame.
    Data(String),
    /// The `[DONE]` sentinel; nothing after it is forwarded.
    Done,
    /// Blank line or SSE comment, nothing to emit.
    Skip,
    /// Any other field (`event:`, `id:`, stray text). Dropped with a warning.
    Unexpected(String),
}

/// Classify one line of upstream output.
///
/// * `data: <payload>` / `data:<payload>` → `SseLine::Data(payload)`
/// * `data: [DONE]`    → `SseLine::Done`
/// * empty / whitespace / `: comment` → `SseLine::Skip`
/// * anything else     → `SseLine::Unexpected(line)`
pub fn translate_sse_line(line: &str) -> SseLine {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return SseLine::Skip;
    }

    match trimmed.strip_prefix(DATA_FIELD) {
        Some(payload) => {
            let payload = payload.trim_start();
            if payload == DONE_SENTINEL {
                SseLine::Done
            } else {
                SseLine::Data(payload.to_string())
            }
        }
        None => SseLine::Unexpected(trimmed.to_string()),
    }
}

/// Encode a payload as a single SSE frame.
pub fn frame(payload: &str) -> Bytes {
    Bytes::from(format!("{}{}\n\n", DATA_PREFIX, payload))
}

/// Line buffer that turns arbitrary chunks into complete SSE payloads.
#[derive(Debug, Default)]
pub struct Reframer {
    buf: BytesMut,
    done: bool,
}

impl Reframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes still waiting for a newline.
    #[cfg(test)]
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Append a chunk and return every payload completed by it, in order.
    ///
    /// Once the sentinel is reached the buffer is discarded and later pushes
    /// return nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.done {
            return Vec::new();
        }

        self.buf.extend_from_slice(chunk);

        let Some(last_newline) = self.buf.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        // `\n` never occurs inside a multi-byte UTF-8 sequence, so the split
        // leaves every character of the complete region intact.
        let complete = self.buf.split_to(last_newline + 1);
        let text = String::from_utf8_lossy(&complete);

        let mut payloads = Vec::new();
        for line in text.split('\n') {
            match translate_sse_line(line) {
                SseLine::Data(payload) => payloads.push(payload),
                SseLine::Skip => {}
                SseLine::Unexpected(other) => {
                    warn!("Dropping unexpected upstream SSE line: {}", other);
                }
                SseLine::Done => {
                    self.done = true;
                    self.buf.clear();
                    break;
                }
            }
        }

        payloads
    }

    /// Upstream finished. Returns the unterminated tail that gets dropped.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let tail = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(tail)
    }
}

/// Options for a single re-framed stream.
#[derive(Debug, Clone, Default)]
pub struct ReframeOptions {
    /// End the stream when upstream stays silent this long.
    pub idle_timeout: Option<Duration>,
    /// Cancelled from outside to close the stream early.
    pub cancel: CancellationToken,
}

/// Observes each frame handed to the caller.
pub trait FrameObserver: Send + 'static {
    fn on_frame(&mut self);
}

impl FrameObserver for () {
    fn on_frame(&mut self) {}
}

impl<T: FrameObserver> FrameObserver for Option<T> {
    fn on_frame(&mut self) {
        if let Some(observer) = self {
            observer.on_frame();
        }
    }
}

struct ReframeState<S, O> {
    stream: S,
    reframer: Reframer,
    ready: std::collections::VecDeque<String>,
    options: ReframeOptions,
    observer: O,
    finished: bool,
}

enum Next {
    Chunk(Bytes),
    Failed(String),
    Ended,
    Cancelled,
    IdleTimeout,
}

/// Convert an upstream SSE byte stream into the frames sent to the caller.
///
/// The output never yields an error: upstream read failures, the idle
/// timeout and cancellation all end the stream quietly.
pub fn reframe<S, E, O>(
    byte_stream: S,
    options: ReframeOptions,
    observer: O,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    O: FrameObserver,
{
    let state = ReframeState {
        stream: byte_stream.boxed(),
        reframer: Reframer::new(),
        ready: std::collections::VecDeque::new(),
        options,
        observer,
        finished: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(payload) = st.ready.pop_front() {
                st.observer.on_frame();
                return Some((Ok::<_, std::io::Error>(frame(&payload)), st));
            }

            if st.finished || st.reframer.is_done() {
                return None;
            }

            match next_chunk(&mut st.stream, &st.options).await {
                Next::Chunk(chunk) => {
                    st.ready.extend(st.reframer.push(&chunk));
                }
                Next::Failed(e) => {
                    warn!("Upstream stream ended with an error: {}", e);
                    st.finished = true;
                }
                Next::Ended => {
                    if let Some(tail) = st.reframer.finish() {
                        debug!("Dropping unterminated upstream line: {}", tail);
                    }
                    st.finished = true;
                }
                Next::Cancelled => {
                    debug!("Stream cancelled, closing");
                    st.finished = true;
                    st.ready.clear();
                }
                Next::IdleTimeout => {
                    warn!("Upstream stream idle timeout elapsed, closing");
                    st.finished = true;
                }
            }
        }
    })
}

async fn next_chunk<S, E>(stream: &mut S, options: &ReframeOptions) -> Next
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let read = async {
        match options.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, stream.next()).await {
                Ok(item) => Some(item),
                Err(_) => None,
            },
            None => Some(stream.next().await),
        }
    };

    tokio::select! {
        biased;
        _ = options.cancel.cancelled() => Next::Cancelled,
        item = read => match item {
            None => Next::IdleTimeout,
            Some(Some(Ok(chunk))) => Next::Chunk(chunk),
            Some(Some(Err(e))) => Next::Failed(e.to_string()),
            Some(None) => Next::Ended,
        },
    }
}
