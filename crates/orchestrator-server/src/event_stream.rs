//! C8: per-session typed event stream with a replay buffer (§4.8). One logical
//! stream per session; a single writer (the Session Runner) publishes, many readers
//! (HTTP stream subscribers) replay the buffer then tail a `broadcast` channel,
//! grounded on the teacher's `ws_routes.rs` "send cached snapshot, then subscribe"
//! pattern.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use orchestrator_core::{Event, EventKind};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Ring buffer capacity per session (§4.8: "The buffer size has an upper bound").
const BUFFER_CAPACITY: usize = 2048;

struct SessionStream {
    buffer: Mutex<VecDeque<Event>>,
    sender: broadcast::Sender<Event>,
    next_sequence: AtomicU64,
    terminal_sent: std::sync::atomic::AtomicBool,
}

impl SessionStream {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(BUFFER_CAPACITY);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(BUFFER_CAPACITY)),
            sender,
            next_sequence: AtomicU64::new(1),
            terminal_sent: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

/// Shared registry of per-session event streams. One process-wide instance, held by
/// the Session Runner and by every stream-route handler (§5: "single-writer-many-
/// reader structure per session with a bounded capacity").
#[derive(Clone, Default)]
pub struct EventStreamRegistry {
    sessions: Arc<DashMap<Uuid, Arc<SessionStream>>>,
}

impl EventStreamRegistry {
    pub fn new() -> Self {
        Self { sessions: Arc::new(DashMap::new()) }
    }

    fn stream_for(&self, session_id: Uuid) -> Arc<SessionStream> {
        self.sessions.entry(session_id).or_insert_with(|| Arc::new(SessionStream::new())).clone()
    }

    /// Publish an event, assigning the next sequence number and pushing it into the
    /// buffer synchronously under `buffer`'s `std::sync::Mutex` (§4.8, §5 "events on
    /// one session's stream are totally ordered"). No `.await` appears between
    /// sequence assignment and the broadcast send, so two calls on the same session
    /// are always delivered in the order their callers *invoked* `publish_sync` /
    /// `publish`, not the order some spawned task happens to win a race. Non-blocking;
    /// events arriving after a terminal event are ignored.
    pub fn publish_sync(&self, session_id: Uuid, kind: EventKind) {
        let stream = self.stream_for(session_id);
        if stream.terminal_sent.load(Ordering::SeqCst) {
            return;
        }

        let is_terminal = kind.is_terminal();
        let sequence_no = stream.next_sequence.fetch_add(1, Ordering::SeqCst);
        let event = Event { session_id, sequence_no, emitted_at: chrono::Utc::now(), kind };

        {
            let mut buffer = stream.buffer.lock().expect("event stream buffer mutex poisoned");
            if buffer.len() >= BUFFER_CAPACITY {
                let mut dropped = 0u64;
                while buffer.len() >= BUFFER_CAPACITY {
                    let evictable_idx = buffer.iter().position(|e| !e.kind.is_buffer_protected());
                    match evictable_idx {
                        Some(idx) => {
                            buffer.remove(idx);
                            dropped += 1;
                        }
                        None => break,
                    }
                }
                if dropped > 0 {
                    let marker_seq = stream.next_sequence.fetch_add(1, Ordering::SeqCst);
                    let marker = Event {
                        session_id,
                        sequence_no: marker_seq,
                        emitted_at: chrono::Utc::now(),
                        kind: EventKind::Dropped { count: dropped },
                    };
                    buffer.push_back(marker.clone());
                    let _ = stream.sender.send(marker);
                }
            }
            buffer.push_back(event.clone());
        }

        let _ = stream.sender.send(event);

        if is_terminal {
            stream.terminal_sent.store(true, Ordering::SeqCst);
        }
    }

    /// Async wrapper around `publish_sync`, for call sites that are already in an
    /// async context and have no ordering constraint against a sync caller.
    pub async fn publish(&self, session_id: Uuid, kind: EventKind) {
        self.publish_sync(session_id, kind);
    }

    /// Idempotent: emits a synthetic `Terminal` if one has not already been sent
    /// (§4.8 `close`).
    pub async fn close(&self, session_id: Uuid) {
        let stream = self.stream_for(session_id);
        if !stream.terminal_sent.load(Ordering::SeqCst) {
            self.publish_sync(session_id, EventKind::Terminal);
        }
    }

    /// Replay buffered events with `sequence_no > last_sequence_no`, then a receiver
    /// for events published afterward (§4.8, §6 reconnection contract).
    pub async fn subscribe(
        &self,
        session_id: Uuid,
        last_sequence_no: u64,
    ) -> (Vec<Event>, broadcast::Receiver<Event>) {
        let stream = self.stream_for(session_id);
        let receiver = stream.sender.subscribe();
        let buffer = stream.buffer.lock().expect("event stream buffer mutex poisoned");
        let replay: Vec<Event> = buffer.iter().filter(|e| e.sequence_no > last_sequence_no).cloned().collect();
        (replay, receiver)
    }

    /// Drop the session's buffer and broadcast sender (§3 "Event buffer lives for the
    /// session plus a short retention window after `terminal`"); the caller is
    /// expected to schedule this after the retention window elapses.
    pub fn forget(&self, session_id: Uuid) {
        self.sessions.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_delivers_events_in_sequence_order_and_stops_at_terminal() {
        let registry = EventStreamRegistry::new();
        let session_id = Uuid::new_v4();

        registry.publish(session_id, EventKind::StageStart { stage: "analyst".to_string() }).await;
        registry.publish(session_id, EventKind::StageCompleted { stage: "analyst".to_string() }).await;
        registry.close(session_id).await;

        let (replay, _rx) = registry.subscribe(session_id, 0).await;
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[0].sequence_no, 1);
        assert_eq!(replay[1].sequence_no, 2);
        assert!(replay.last().unwrap().kind.is_terminal());
    }

    #[tokio::test]
    async fn events_after_terminal_are_ignored() {
        let registry = EventStreamRegistry::new();
        let session_id = Uuid::new_v4();
        registry.close(session_id).await;
        registry.publish(session_id, EventKind::StageStart { stage: "late".to_string() }).await;

        let (replay, _rx) = registry.subscribe(session_id, 0).await;
        assert_eq!(replay.len(), 1);
    }

    #[tokio::test]
    async fn reconnection_with_last_sequence_only_replays_newer_events() {
        let registry = EventStreamRegistry::new();
        let session_id = Uuid::new_v4();
        registry.publish(session_id, EventKind::StageStart { stage: "a".to_string() }).await;
        registry.publish(session_id, EventKind::StageStart { stage: "b".to_string() }).await;

        let (replay, _rx) = registry.subscribe(session_id, 1).await;
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].sequence_no, 2);
    }
}
