//! Observation side-channel for bulkhead transitions.
//!
//! Every state transition a request goes through emits a [`BulkheadEvent`] to
//! the listeners registered on the compartment's configuration. Emission is
//! synchronous but panic-isolated per listener, and listeners must not block:
//! they run on the admission/execution critical path.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// An observation emitted at a request state transition.
///
/// Each variant carries the compartment name, the request id, and the
/// timing or queue-size datum relevant at that transition.
#[derive(Debug, Clone)]
pub enum BulkheadEvent {
    /// The request did not find a free slot and was appended to the queue.
    Queued {
        /// Compartment name.
        bulkhead: String,
        /// Request id.
        request_id: u64,
        /// When the transition happened.
        timestamp: Instant,
        /// Queue length after the append.
        queue_depth: usize,
    },
    /// The request began executing (immediately or after promotion).
    Executing {
        /// Compartment name.
        bulkhead: String,
        /// Request id.
        request_id: u64,
        /// When the transition happened.
        timestamp: Instant,
        /// Number of executing requests including this one.
        concurrent: usize,
    },
    /// The request's work completed with a value.
    Completed {
        /// Compartment name.
        bulkhead: String,
        /// Request id.
        request_id: u64,
        /// When the transition happened.
        timestamp: Instant,
        /// Time spent executing.
        execution_time: Duration,
    },
    /// The request's work returned an error.
    Failed {
        /// Compartment name.
        bulkhead: String,
        /// Request id.
        request_id: u64,
        /// When the transition happened.
        timestamp: Instant,
        /// Time spent executing before the failure.
        execution_time: Duration,
    },
    /// The request was rejected at submission because the queue was full.
    Rejected {
        /// Compartment name.
        bulkhead: String,
        /// Request id.
        request_id: u64,
        /// When the transition happened.
        timestamp: Instant,
        /// Queue length at the moment of rejection.
        queue_depth: usize,
    },
    /// The request ran past the execution timeout and was settled as timed out.
    ExecutionTimedOut {
        /// Compartment name.
        bulkhead: String,
        /// Request id.
        request_id: u64,
        /// When the transition happened.
        timestamp: Instant,
        /// The execution timeout that was exceeded.
        limit: Duration,
    },
    /// The request waited past the queue timeout without being promoted.
    QueueTimedOut {
        /// Compartment name.
        bulkhead: String,
        /// Request id.
        request_id: u64,
        /// When the transition happened.
        timestamp: Instant,
        /// How long the request waited in the queue.
        waited: Duration,
    },
}

impl BulkheadEvent {
    /// Returns the kind of transition, e.g. `"queued"` or `"completed"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            BulkheadEvent::Queued { .. } => "queued",
            BulkheadEvent::Executing { .. } => "executing",
            BulkheadEvent::Completed { .. } => "completed",
            BulkheadEvent::Failed { .. } => "failed",
            BulkheadEvent::Rejected { .. } => "rejected",
            BulkheadEvent::ExecutionTimedOut { .. } => "execution_timeout",
            BulkheadEvent::QueueTimedOut { .. } => "queue_timeout",
        }
    }

    /// Returns the name of the compartment that emitted this event.
    pub fn bulkhead(&self) -> &str {
        match self {
            BulkheadEvent::Queued { bulkhead, .. }
            | BulkheadEvent::Executing { bulkhead, .. }
            | BulkheadEvent::Completed { bulkhead, .. }
            | BulkheadEvent::Failed { bulkhead, .. }
            | BulkheadEvent::Rejected { bulkhead, .. }
            | BulkheadEvent::ExecutionTimedOut { bulkhead, .. }
            | BulkheadEvent::QueueTimedOut { bulkhead, .. } => bulkhead,
        }
    }

    /// Returns the id of the request this event concerns.
    pub fn request_id(&self) -> u64 {
        match self {
            BulkheadEvent::Queued { request_id, .. }
            | BulkheadEvent::Executing { request_id, .. }
            | BulkheadEvent::Completed { request_id, .. }
            | BulkheadEvent::Failed { request_id, .. }
            | BulkheadEvent::Rejected { request_id, .. }
            | BulkheadEvent::ExecutionTimedOut { request_id, .. }
            | BulkheadEvent::QueueTimedOut { request_id, .. } => *request_id,
        }
    }

    /// Returns when this event occurred.
    pub fn timestamp(&self) -> Instant {
        match self {
            BulkheadEvent::Queued { timestamp, .. }
            | BulkheadEvent::Executing { timestamp, .. }
            | BulkheadEvent::Completed { timestamp, .. }
            | BulkheadEvent::Failed { timestamp, .. }
            | BulkheadEvent::Rejected { timestamp, .. }
            | BulkheadEvent::ExecutionTimedOut { timestamp, .. }
            | BulkheadEvent::QueueTimedOut { timestamp, .. } => *timestamp,
        }
    }
}

/// Trait for observing bulkhead events.
pub trait EventListener: Send + Sync {
    /// Called at each transition. Must not block.
    fn on_event(&self, event: &BulkheadEvent);
}

/// A collection of event listeners.
#[derive(Clone, Default)]
pub struct EventListeners {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventListeners {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Adds a listener to the collection.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to all registered listeners.
    ///
    /// A panicking listener does not prevent the remaining listeners from
    /// receiving the event.
    pub fn emit(&self, event: &BulkheadEvent) {
        for listener in &self.listeners {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
        }
    }

    /// Returns true if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

/// A function-based event listener.
pub struct FnListener<F>
where
    F: Fn(&BulkheadEvent) + Send + Sync,
{
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&BulkheadEvent) + Send + Sync,
{
    /// Creates a new function-based listener.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&BulkheadEvent) + Send + Sync,
{
    fn on_event(&self, event: &BulkheadEvent) {
        (self.f)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_event() -> BulkheadEvent {
        BulkheadEvent::Queued {
            bulkhead: "test".to_string(),
            request_id: 42,
            timestamp: Instant::now(),
            queue_depth: 3,
        }
    }

    #[test]
    fn listeners_all_receive_events() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&counter);
        let c2 = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        listeners.add(FnListener::new(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(listeners.len(), 2);

        listeners.emit(&sample_event());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_starve_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(|_| panic!("bad listener")));
        listeners.add(FnListener::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&sample_event());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_accessors() {
        let event = sample_event();
        assert_eq!(event.event_type(), "queued");
        assert_eq!(event.bulkhead(), "test");
        assert_eq!(event.request_id(), 42);

        let event = BulkheadEvent::ExecutionTimedOut {
            bulkhead: "db".to_string(),
            request_id: 7,
            timestamp: Instant::now(),
            limit: Duration::from_millis(50),
        };
        assert_eq!(event.event_type(), "execution_timeout");
        assert_eq!(event.bulkhead(), "db");
    }
}
