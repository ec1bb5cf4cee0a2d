//! Event bus with synchronous listeners and a broadcast fan-out

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::types::{EventEnvelope, WorkflowEvent};

/// Capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 1000;

/// Callback invoked for every emitted event
pub type Listener = Arc<dyn Fn(&WorkflowEvent) -> anyhow::Result<()> + Send + Sync>;

type ListenerList = Mutex<Vec<(usize, Listener)>>;

fn lock(listeners: &ListenerList) -> MutexGuard<'_, Vec<(usize, Listener)>> {
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Event bus for publishing and subscribing to workflow events
///
/// Listeners registered with [`EventBus::subscribe`] run on the emitting thread, in
/// subscription order. A listener that fails or panics is logged and skipped; the
/// remaining listeners still run and the emitter never sees the failure.
#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<ListenerList>,
    next_listener_id: Arc<AtomicUsize>,
    sender: broadcast::Sender<EventEnvelope>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with specified broadcast capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: Arc::new(AtomicUsize::new(0)),
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a synchronous listener
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&WorkflowEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Subscribe to enveloped events on a broadcast channel
    ///
    /// Note: Events published before subscribing will not be received.
    pub fn subscribe_stream(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Deliver an event to every current listener, then to stream subscribers
    ///
    /// Returns the envelope that was published.
    pub fn emit(&self, event: WorkflowEvent) -> EventEnvelope {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        // Snapshot so listeners may subscribe or unsubscribe while being called.
        let snapshot: Vec<(usize, Listener)> = lock(&self.listeners).clone();

        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    listener_id = id,
                    event = event.kind(),
                    error = %e,
                    "Event listener failed"
                ),
                Err(_) => error!(
                    listener_id = id,
                    event = event.kind(),
                    "Event listener panicked"
                ),
            }
        }

        let envelope = EventEnvelope::new(sequence, event);
        // No stream subscribers is fine; the event is simply dropped.
        let _ = self.sender.send(envelope.clone());
        envelope
    }

    /// Get the number of synchronous listeners
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Get the number of stream subscribers
    pub fn stream_subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the total number of events emitted
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listener_count", &self.listener_count())
            .field("stream_subscriber_count", &self.stream_subscriber_count())
            .field("event_count", &self.event_count())
            .finish()
    }
}

/// Handle returned by [`EventBus::subscribe`]
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: usize,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Remove the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).retain(|(id, _)| *id != self.id);
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use triad_core::WorkflowPhase;

    fn aborted(reason: &str) -> WorkflowEvent {
        WorkflowEvent::WorkflowAborted {
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_listeners_called_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            bus.subscribe(move |_| {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }

        bus.emit(aborted("test"));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_listener_does_not_stop_delivery() {
        let bus = EventBus::new();
        let received = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| anyhow::bail!("listener broke"));
        bus.subscribe(|_| panic!("listener exploded"));
        let counter = Arc::clone(&received);
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(aborted("test"));
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        let sub = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let _other = bus.subscribe(|_| Ok(()));

        bus.emit(aborted("one"));
        sub.unsubscribe();
        sub.unsubscribe();
        bus.emit(aborted("two"));

        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let sub = bus.subscribe(move |_| {
            if let Some(sub) = inner.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(sub);

        bus.emit(aborted("once"));
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_receives_envelopes_with_sequence() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_stream();

        bus.emit(WorkflowEvent::PhaseChanged {
            from: WorkflowPhase::Idle,
            to: WorkflowPhase::Planning,
        });
        bus.emit(aborted("done"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.event.kind(), "workflow_aborted");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        let envelope = bus.emit(aborted("nobody listening"));
        assert_eq!(envelope.sequence, 0);
        assert_eq!(bus.event_count(), 1);
    }

    #[test]
    fn test_clone_shares_listeners_and_sequence() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        bus2.subscribe(|_| Ok(()));
        assert_eq!(bus1.listener_count(), 1);

        bus1.emit(aborted("a"));
        bus2.emit(aborted("b"));
        assert_eq!(bus1.event_count(), 2);
    }
}
