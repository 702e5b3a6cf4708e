//! Registry of in-flight streamed completions, keyed by the caller's session id.
//!
//! Each session has at most one live stream. Registering a session that
//! already streams cancels the older stream and hands ownership to the new
//! one. An entry disappears when its [`StreamHandle`] is dropped (stream
//! finished, client gone) or when it is aborted.

use crate::sse::FrameObserver;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Maximum length for session ids
const MAX_SESSION_ID_LEN: usize = 128;

/// Check that a session id is non-empty, short and made of `[A-Za-z0-9_-]`.
pub fn validate_session_id(session_id: &str) -> Result<(), String> {
    if session_id.is_empty() {
        return Err("Session ID cannot be empty".to_string());
    }

    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(format!(
            "Session ID exceeds maximum length of {} characters",
            MAX_SESSION_ID_LEN
        ));
    }

    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(
            "Session ID contains invalid characters: allowed are a-z, A-Z, 0-9, _, -".to_string(),
        );
    }

    Ok(())
}

/// Snapshot of one live stream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub frames_forwarded: u64,
}

struct Entry {
    generation: u64,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    frames: Arc<AtomicU64>,
}

#[derive(Default)]
struct Inner {
    next_generation: u64,
    entries: HashMap<String, Entry>,
}

#[derive(Default)]
pub struct StreamRegistry {
    inner: Mutex<Inner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Entries stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new stream for `session_id`, cancelling any stream it replaces.
    pub fn register(self: &Arc<Self>, session_id: &str) -> StreamHandle {
        let cancel = CancellationToken::new();
        let frames = Arc::new(AtomicU64::new(0));

        let mut inner = self.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;

        let previous = inner.entries.insert(
            session_id.to_string(),
            Entry {
                generation,
                cancel: cancel.clone(),
                started_at: Utc::now(),
                frames: frames.clone(),
            },
        );
        drop(inner);

        if let Some(previous) = previous {
            info!(
                "Session {} started a new stream, cancelling the previous one",
                session_id
            );
            previous.cancel.cancel();
        }

        StreamHandle {
            registry: Arc::clone(self),
            session_id: session_id.to_string(),
            generation,
            cancel,
            frames,
        }
    }

    /// Cancel and forget the stream of `session_id`. Returns false when none is live.
    pub fn abort(&self, session_id: &str) -> bool {
        let removed = self.lock().entries.remove(session_id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                info!("Aborted stream for session {}", session_id);
                true
            }
            None => false,
        }
    }

    /// Live streams, sorted by session id.
    pub fn list(&self) -> Vec<StreamInfo> {
        let inner = self.lock();
        let mut streams: Vec<StreamInfo> = inner
            .entries
            .iter()
            .map(|(session_id, entry)| StreamInfo {
                session_id: session_id.clone(),
                started_at: entry.started_at,
                frames_forwarded: entry.frames.load(Ordering::Relaxed),
            })
            .collect();
        streams.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        streams
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().entries.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, session_id: &str, generation: u64, frames: u64) {
        let mut inner = self.lock();
        if inner
            .entries
            .get(session_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            inner.entries.remove(session_id);
            debug!(
                "Stream for session {} released after {} frames",
                session_id, frames
            );
        }
    }
}

/// Ownership of one registry entry. Dropping it releases the entry if it is
/// still the session's current stream.
pub struct StreamHandle {
    registry: Arc<StreamRegistry>,
    session_id: String,
    generation: u64,
    cancel: CancellationToken,
    frames: Arc<AtomicU64>,
}

impl StreamHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl FrameObserver for StreamHandle {
    fn on_frame(&mut self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let frames = self.frames_forwarded();
        self.registry.release(self.session_id(), self.generation, frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release_on_drop() {
        let registry = Arc::new(StreamRegistry::new());

        let handle = registry.register("chat-1");
        assert!(registry.contains("chat-1"));
        assert_eq!(handle.session_id(), "chat-1");

        drop(handle);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_newer_registration_cancels_previous() {
        let registry = Arc::new(StreamRegistry::new());

        let first = registry.register("chat-1");
        let second = registry.register("chat-1");

        assert!(first.cancellation_token().is_cancelled());
        assert!(!second.cancellation_token().is_cancelled());
        assert_eq!(registry.len(), 1);

        // the stale handle must not evict the new owner
        drop(first);
        assert!(registry.contains("chat-1"));

        drop(second);
        assert!(!registry.contains("chat-1"));
    }

    #[test]
    fn test_abort_cancels_and_removes() {
        let registry = Arc::new(StreamRegistry::new());
        let handle = registry.register("chat-1");

        assert!(registry.abort("chat-1"));
        assert!(handle.cancellation_token().is_cancelled());
        assert!(registry.is_empty());
        assert!(!registry.abort("chat-1"));
    }

    #[test]
    fn test_list_reports_frames_sorted() {
        let registry = Arc::new(StreamRegistry::new());
        let mut b = registry.register("b-session");
        let _a = registry.register("a-session");

        b.on_frame();
        b.on_frame();

        let streams = registry.list();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].session_id, "a-session");
        assert_eq!(streams[0].frames_forwarded, 0);
        assert_eq!(streams[1].session_id, "b-session");
        assert_eq!(streams[1].frames_forwarded, 2);
        assert_eq!(b.frames_forwarded(), 2);
    }

    #[test]
    fn test_stream_info_serializes_camel_case() {
        let registry = Arc::new(StreamRegistry::new());
        let _handle = registry.register("chat-1");

        let json = serde_json::to_value(&registry.list()[0]).unwrap();
        assert_eq!(json["sessionId"], "chat-1");
        assert_eq!(json["framesForwarded"], 0);
        assert!(json["startedAt"].is_string());
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("chat_42-abc").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("has space").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id(&"a".repeat(129)).is_err());
        assert!(validate_session_id(&"a".repeat(128)).is_ok());
    }
}
