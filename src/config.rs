//! Configuration for a bulkhead compartment.

use crate::events::{BulkheadEvent, EventListener, EventListeners, FnListener};
use crate::request::RequestContext;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Producer invoked instead of raising `QueueFull` when the
/// [`Fallback`](RejectionStrategy::Fallback) strategy is selected.
///
/// Receives the rejected request's context so a degraded response can be
/// built from the caller-supplied payload.
pub type FallbackFn<R> = Arc<dyn Fn(&RequestContext) -> R + Send + Sync>;

/// What to do with a request that cannot be admitted or queued.
///
/// Modeled as a tagged variant so a `Fallback` strategy cannot exist without
/// its producer.
#[derive(Clone)]
pub enum RejectionStrategy<R> {
    /// Raise [`QueueFull`](crate::BulkheadError::QueueFull) to the caller.
    Throw,
    /// Invoke the producer and return its value as the request's result.
    Fallback(FallbackFn<R>),
}

impl<R> fmt::Debug for RejectionStrategy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionStrategy::Throw => f.write_str("Throw"),
            RejectionStrategy::Fallback(_) => f.write_str("Fallback(..)"),
        }
    }
}

/// Immutable policy for one compartment: concurrency and queue limits, the
/// two timeouts, and the rejection strategy. Set at creation, fixed for the
/// compartment's lifetime.
pub struct BulkheadConfig<R> {
    pub(crate) name: String,
    pub(crate) max_concurrent: usize,
    pub(crate) max_queue_size: usize,
    pub(crate) queue_timeout: Duration,
    pub(crate) execution_timeout: Duration,
    pub(crate) rejection_strategy: RejectionStrategy<R>,
    pub(crate) event_listeners: EventListeners,
}

impl<R> BulkheadConfig<R> {
    /// Creates a new configuration builder.
    pub fn builder() -> BulkheadConfigBuilder<R> {
        BulkheadConfigBuilder::new()
    }

    /// Compartment name, used in events, logs, and metrics labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upper bound on simultaneously executing requests.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Upper bound on requests waiting for a free slot.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Longest a request may wait in the queue before forced rejection.
    pub fn queue_timeout(&self) -> Duration {
        self.queue_timeout
    }

    /// Longest a request may run before being treated as failed.
    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }
}

impl<R> fmt::Debug for BulkheadConfig<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkheadConfig")
            .field("name", &self.name)
            .field("max_concurrent", &self.max_concurrent)
            .field("max_queue_size", &self.max_queue_size)
            .field("queue_timeout", &self.queue_timeout)
            .field("execution_timeout", &self.execution_timeout)
            .field("rejection_strategy", &self.rejection_strategy)
            .field("listeners", &self.event_listeners.len())
            .finish()
    }
}

/// Builder for [`BulkheadConfig`].
pub struct BulkheadConfigBuilder<R> {
    name: String,
    max_concurrent: usize,
    max_queue_size: usize,
    queue_timeout: Duration,
    execution_timeout: Duration,
    rejection_strategy: RejectionStrategy<R>,
    event_listeners: EventListeners,
}

impl<R> BulkheadConfigBuilder<R> {
    /// Creates a builder with the default limits: 10 concurrent, queue of
    /// 100, 30s queue timeout, 60s execution timeout, `Throw` on rejection.
    pub fn new() -> Self {
        Self {
            name: "bulkhead".to_string(),
            max_concurrent: 10,
            max_queue_size: 100,
            queue_timeout: Duration::from_secs(30),
            execution_timeout: Duration::from_secs(60),
            rejection_strategy: RejectionStrategy::Throw,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the compartment name.
    ///
    /// Default: "bulkhead"
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the maximum number of simultaneously executing requests.
    ///
    /// Default: 10
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the maximum number of requests waiting for a slot.
    ///
    /// Default: 100
    pub fn max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    /// Sets the maximum time a request may wait in the queue.
    ///
    /// Default: 30 seconds
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Sets the maximum time a request may execute.
    ///
    /// Work that runs past this limit is settled as timed out but is not
    /// cancelled; it may keep running in the background.
    ///
    /// Default: 60 seconds
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Selects the `Fallback` rejection strategy with the given producer.
    ///
    /// When the queue is full the producer is invoked with the rejected
    /// request's context and its value is returned to the caller instead of
    /// a [`QueueFull`](crate::BulkheadError::QueueFull) error.
    pub fn fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> R + Send + Sync + 'static,
    {
        self.rejection_strategy = RejectionStrategy::Fallback(Arc::new(f));
        self
    }

    /// Registers a raw event listener receiving every [`BulkheadEvent`].
    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Registers a callback for queue admissions, called with the queue
    /// depth after the append.
    pub fn on_queued<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BulkheadEvent::Queued { queue_depth, .. } = event {
                f(*queue_depth);
            }
        }));
        self
    }

    /// Registers a callback for execution starts, called with the number of
    /// concurrent requests including the one starting.
    pub fn on_executing<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BulkheadEvent::Executing { concurrent, .. } = event {
                f(*concurrent);
            }
        }));
        self
    }

    /// Registers a callback for successful completions, called with the
    /// execution time.
    pub fn on_completed<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BulkheadEvent::Completed { execution_time, .. } = event {
                f(*execution_time);
            }
        }));
        self
    }

    /// Registers a callback for work failures, called with the execution
    /// time up to the failure.
    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BulkheadEvent::Failed { execution_time, .. } = event {
                f(*execution_time);
            }
        }));
        self
    }

    /// Registers a callback for queue-full rejections, called with the queue
    /// depth at the moment of rejection.
    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BulkheadEvent::Rejected { queue_depth, .. } = event {
                f(*queue_depth);
            }
        }));
        self
    }

    /// Registers a callback for execution timeouts, called with the exceeded
    /// limit.
    pub fn on_execution_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BulkheadEvent::ExecutionTimedOut { limit, .. } = event {
                f(*limit);
            }
        }));
        self
    }

    /// Registers a callback for queue timeouts, called with the time the
    /// request waited.
    pub fn on_queue_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BulkheadEvent::QueueTimedOut { waited, .. } = event {
                f(*waited);
            }
        }));
        self
    }

    /// Builds the configuration.
    ///
    /// # Panics
    ///
    /// Panics if any limit is zero: `max_concurrent`, `max_queue_size`,
    /// `queue_timeout`, and `execution_timeout` must all be positive.
    pub fn build(self) -> BulkheadConfig<R> {
        assert!(self.max_concurrent > 0, "max_concurrent must be positive");
        assert!(self.max_queue_size > 0, "max_queue_size must be positive");
        assert!(
            self.queue_timeout > Duration::ZERO,
            "queue_timeout must be positive"
        );
        assert!(
            self.execution_timeout > Duration::ZERO,
            "execution_timeout must be positive"
        );
        BulkheadConfig {
            name: self.name,
            max_concurrent: self.max_concurrent,
            max_queue_size: self.max_queue_size,
            queue_timeout: self.queue_timeout,
            execution_timeout: self.execution_timeout,
            rejection_strategy: self.rejection_strategy,
            event_listeners: self.event_listeners,
        }
    }
}

impl<R> Default for BulkheadConfigBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}
