//! Per-session delivery queues and the registry the log layer routes into

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::Notify;
use tracing::debug;

use crate::events::StreamEvent;

/// Default bound of a session queue (events)
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<StreamEvent>,
    dropped: u64,
}

/// Events taken from a queue in one drain pass
#[derive(Debug, Default)]
pub struct Drained {
    pub events: Vec<StreamEvent>,
    /// Events evicted by overflow since the previous drain
    pub dropped: u64,
}

/// Bounded FIFO of translated events owned by one session
///
/// Pushing never blocks and never fails: when full, the oldest queued event
/// is evicted and counted. Producers run inside `tracing` callbacks, so a
/// push must stay cheap and must not log.
#[derive(Debug)]
pub struct SessionQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    notify: Notify,
}

impl SessionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Enqueue an event, evicting the oldest one at capacity
    pub fn push(&self, event: StreamEvent) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.items.len() >= self.capacity {
                state.items.pop_front();
                state.dropped += 1;
            }
            state.items.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Take everything currently queued, in FIFO order
    pub fn drain(&self) -> Drained {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Drained {
            events: state.items.drain(..).collect(),
            dropped: std::mem::take(&mut state.dropped),
        }
    }

    /// Resolves after the next push (or immediately if a push happened since
    /// the last wakeup)
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Live sessions by id, shared between bridges and the translator layer
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<SessionQueue>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's queue; it stays routable until the guard drops
    pub fn register(&self, session_id: &str, queue: Arc<SessionQueue>) -> SessionRegistration {
        debug!(%session_id, "SessionRegistry::register");
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), queue);
        SessionRegistration {
            registry: self.clone(),
            session_id: session_id.to_string(),
        }
    }

    /// Look up a live session's queue
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionQueue>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, session_id: &str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }
}

/// Scoped registration; removes the session from the registry on drop
#[derive(Debug)]
pub struct SessionRegistration {
    registry: SessionRegistry,
    session_id: String,
}

impl SessionRegistration {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        debug!(session_id = %self.session_id, "SessionRegistration::drop: deregistering");
        self.registry.remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StreamKind;
    use std::time::Duration;

    fn event(n: usize) -> StreamEvent {
        StreamEvent::new(StreamKind::Thought, "💭", n.to_string())
    }

    #[test]
    fn test_drain_is_fifo() {
        let queue = SessionQueue::new(10);
        for i in 0..3 {
            queue.push(event(i));
        }
        let drained = queue.drain();
        let contents: Vec<&str> = drained.events.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["0", "1", "2"]);
        assert_eq!(drained.dropped, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest_and_counts() {
        let queue = SessionQueue::new(3);
        for i in 0..5 {
            queue.push(event(i));
        }
        assert_eq!(queue.len(), 3);

        let drained = queue.drain();
        let contents: Vec<&str> = drained.events.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);
        assert_eq!(drained.dropped, 2);

        // Counter resets after a drain
        queue.push(event(9));
        assert_eq!(queue.drain().dropped, 0);
    }

    #[tokio::test]
    async fn test_push_wakes_waiter() {
        let queue = Arc::new(SessionQueue::new(4));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue.notified().await;
                queue.drain().events.len()
            })
        };
        tokio::task::yield_now().await;
        queue.push(event(1));

        let got = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(got, 1);
    }

    #[test]
    fn test_registration_is_scoped() {
        let registry = SessionRegistry::new();
        let queue = Arc::new(SessionQueue::new(4));
        {
            let guard = registry.register("s-1", Arc::clone(&queue));
            assert_eq!(guard.session_id(), "s-1");
            assert!(registry.get("s-1").is_some());
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.get("s-1").is_none());
        assert!(registry.is_empty());
    }
}
