//! The admission/queue/execution engine.
//!
//! A [`Bulkhead`] decides, for every submission, between immediate execution,
//! queueing, and rejection, then drives the admitted work to exactly one
//! terminal outcome. All mutations of the executing set, the waiter queue,
//! and the counters happen under one mutex, and the lock is never held
//! across an await, so the `executing <= max_concurrent` and
//! `queued <= max_queue_size` invariants hold at every observable instant.

use crate::config::{BulkheadConfig, RejectionStrategy};
use crate::error::BulkheadError;
use crate::events::BulkheadEvent;
use crate::request::RequestContext;
use crate::stats::{BulkheadStats, StatsRecorder};
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace};

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, gauge};
#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

#[cfg(feature = "metrics")]
fn describe_metrics() {
    METRICS_INIT.call_once(|| {
        describe_counter!("bulkhead_requests_total", "Requests submitted");
        describe_counter!(
            "bulkhead_requests_rejected_total",
            "Requests rejected because the queue was full"
        );
        describe_counter!(
            "bulkhead_requests_completed_total",
            "Requests that completed successfully"
        );
        describe_counter!("bulkhead_requests_failed_total", "Requests whose work failed");
        describe_counter!(
            "bulkhead_execution_timeouts_total",
            "Requests that exceeded the execution timeout"
        );
        describe_counter!(
            "bulkhead_queue_timeouts_total",
            "Requests that timed out waiting in the queue"
        );
        describe_gauge!("bulkhead_executing", "Currently executing requests");
        describe_gauge!("bulkhead_queue_depth", "Requests waiting in the queue");
    });
}

/// Read-only snapshot of a compartment's current occupancy.
#[derive(Debug, Clone)]
pub struct BulkheadState {
    /// Requests currently executing.
    pub executing: usize,
    /// Requests currently waiting in the queue.
    pub queued: usize,
    /// Configured concurrency limit.
    pub max_concurrent: usize,
    /// Configured queue capacity.
    pub max_queue_size: usize,
    /// `executing / max_concurrent`, as a percentage.
    pub utilization_percent: f64,
    /// `queued / max_queue_size`, as a percentage.
    pub queue_utilization_percent: f64,
    /// Whether shutdown has begun.
    pub is_shutdown: bool,
}

/// An isolated resource compartment bounding concurrent execution of
/// asynchronous work, with a bounded FIFO backlog, independent queue-wait and
/// execution timeouts, and a configurable rejection policy.
///
/// `Bulkhead` is a cheap handle; clones share the same compartment.
pub struct Bulkhead<R> {
    shared: Arc<Shared<R>>,
}

struct Shared<R> {
    config: BulkheadConfig<R>,
    state: Mutex<State<R>>,
    // set to true only on forced shutdown; in-flight races observe it
    force_shutdown: watch::Sender<bool>,
}

struct State<R> {
    executing: HashSet<u64>,
    queue: VecDeque<Waiter<R>>,
    shutdown: bool,
    stats: StatsRecorder,
}

struct Waiter<R> {
    id: u64,
    enqueued_at: Instant,
    grant: oneshot::Sender<Grant<R>>,
}

enum Grant<R> {
    Execute {
        reservation: SlotReservation<R>,
        concurrent: usize,
    },
    Shutdown,
}

/// A claimed execution slot. Releases itself (and promotes the next waiter)
/// on drop if the holder never settled, so a submit future dropped
/// mid-execution cannot leak a slot.
struct SlotReservation<R> {
    shared: Arc<Shared<R>>,
    id: u64,
    armed: bool,
}

impl<R> SlotReservation<R> {
    fn release(&mut self, record: impl FnOnce(&mut StatsRecorder)) -> usize {
        self.armed = false;
        Shared::release_and_promote(&self.shared, self.id, record)
    }
}

impl<R> Drop for SlotReservation<R> {
    fn drop(&mut self) {
        if self.armed {
            // holder vanished without settling; count it as a failure
            Shared::release_and_promote(&self.shared, self.id, |stats| stats.record_failed(None));
        }
    }
}

enum Decision<R> {
    Execute {
        reservation: SlotReservation<R>,
        concurrent: usize,
    },
    Reject {
        queue_depth: usize,
    },
    Queue {
        rx: oneshot::Receiver<Grant<R>>,
        queue_depth: usize,
    },
}

impl<R> Shared<R> {
    /// Frees the slot held by `id`, applies the stats mutation for its
    /// terminal outcome, and hands freed slots to queued waiters in FIFO
    /// order. Returns the executing count after promotion.
    fn release_and_promote(
        shared: &Arc<Self>,
        id: u64,
        record: impl FnOnce(&mut StatsRecorder),
    ) -> usize {
        let mut state = shared.state.lock().unwrap();
        if state.executing.remove(&id) {
            record(&mut state.stats);
            Self::promote_locked(shared, &mut state);
        }
        #[cfg(feature = "metrics")]
        shared.update_gauges_locked(&state);
        state.executing.len()
    }

    fn promote_locked(shared: &Arc<Self>, state: &mut State<R>) {
        while state.executing.len() < shared.config.max_concurrent {
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            let concurrent = state.executing.len() + 1;
            let waited = waiter.enqueued_at.elapsed();
            let reservation = SlotReservation {
                shared: Arc::clone(shared),
                id: waiter.id,
                armed: true,
            };
            match waiter.grant.send(Grant::Execute {
                reservation,
                concurrent,
            }) {
                Ok(()) => {
                    state.executing.insert(waiter.id);
                    state.stats.record_accepted(concurrent, waited);
                }
                Err(grant) => {
                    // waiter cancelled while queued; its slot goes to the
                    // next in line
                    if let Grant::Execute {
                        mut reservation, ..
                    } = grant
                    {
                        reservation.armed = false;
                    }
                }
            }
        }
    }

    #[cfg(feature = "metrics")]
    fn update_gauges_locked(&self, state: &State<R>) {
        gauge!("bulkhead_executing", "bulkhead" => self.config.name.clone())
            .set(state.executing.len() as f64);
        gauge!("bulkhead_queue_depth", "bulkhead" => self.config.name.clone())
            .set(state.queue.len() as f64);
    }
}

impl<R: Send + 'static> Bulkhead<R> {
    /// Creates a compartment with the given configuration.
    pub fn new(config: BulkheadConfig<R>) -> Self {
        #[cfg(feature = "metrics")]
        describe_metrics();
        let (force_shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State {
                    executing: HashSet::new(),
                    queue: VecDeque::new(),
                    shutdown: false,
                    stats: StatsRecorder::default(),
                }),
                force_shutdown,
            }),
        }
    }

    /// Submits a unit of work for admission.
    ///
    /// The single entry point: the work either executes immediately, waits
    /// in the queue for a slot, or is rejected, and the returned future
    /// settles with exactly one outcome. Work that outlives the execution
    /// timeout is settled as [`ExecutionTimeout`](BulkheadError::ExecutionTimeout)
    /// but keeps running in the background.
    pub async fn submit<F, E>(&self, work: F) -> Result<R, BulkheadError<E>>
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
        E: Send + 'static,
    {
        self.submit_inner(work, None).await
    }

    /// Like [`submit`](Self::submit), with an opaque caller payload attached
    /// to the request's [`RequestContext`] (visible to fallback producers).
    pub async fn submit_with_context<F, E>(
        &self,
        work: F,
        context: Arc<dyn Any + Send + Sync>,
    ) -> Result<R, BulkheadError<E>>
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
        E: Send + 'static,
    {
        self.submit_inner(work, Some(context)).await
    }

    async fn submit_inner<F, E>(
        &self,
        work: F,
        payload: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<R, BulkheadError<E>>
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
        E: Send + 'static,
    {
        let cfg = &self.shared.config;
        let request = RequestContext::new(payload);

        let decision = {
            let mut state = self.shared.state.lock().unwrap();
            if state.shutdown {
                return Err(BulkheadError::Shutdown);
            }
            state.stats.record_submitted();
            if state.executing.len() < cfg.max_concurrent {
                let concurrent = state.executing.len() + 1;
                state.executing.insert(request.id());
                state.stats.record_accepted(concurrent, Duration::ZERO);
                #[cfg(feature = "metrics")]
                self.shared.update_gauges_locked(&state);
                Decision::Execute {
                    reservation: SlotReservation {
                        shared: Arc::clone(&self.shared),
                        id: request.id(),
                        armed: true,
                    },
                    concurrent,
                }
            } else if state.queue.len() >= cfg.max_queue_size {
                state.stats.record_rejected();
                Decision::Reject {
                    queue_depth: state.queue.len(),
                }
            } else {
                let (tx, rx) = oneshot::channel();
                state.queue.push_back(Waiter {
                    id: request.id(),
                    enqueued_at: request.enqueued_at(),
                    grant: tx,
                });
                let queue_depth = state.queue.len();
                state.stats.record_queued(queue_depth);
                #[cfg(feature = "metrics")]
                self.shared.update_gauges_locked(&state);
                Decision::Queue { rx, queue_depth }
            }
        };

        #[cfg(feature = "metrics")]
        counter!("bulkhead_requests_total", "bulkhead" => cfg.name.clone()).increment(1);

        match decision {
            Decision::Execute {
                reservation,
                concurrent,
            } => self.run_slot(work, request, reservation, concurrent).await,
            Decision::Reject { queue_depth } => {
                cfg.event_listeners.emit(&BulkheadEvent::Rejected {
                    bulkhead: cfg.name.clone(),
                    request_id: request.id(),
                    timestamp: Instant::now(),
                    queue_depth,
                });
                debug!(
                    bulkhead = %cfg.name,
                    id = request.id(),
                    queue_depth,
                    "request rejected, queue full"
                );
                #[cfg(feature = "metrics")]
                counter!("bulkhead_requests_rejected_total", "bulkhead" => cfg.name.clone())
                    .increment(1);
                match &cfg.rejection_strategy {
                    RejectionStrategy::Throw => Err(BulkheadError::QueueFull {
                        max_queue_size: cfg.max_queue_size,
                    }),
                    RejectionStrategy::Fallback(producer) => Ok(producer(&request)),
                }
            }
            Decision::Queue { rx, queue_depth } => {
                self.wait_in_queue(work, request, rx, queue_depth).await
            }
        }
    }

    async fn wait_in_queue<F, E>(
        &self,
        work: F,
        request: RequestContext,
        mut rx: oneshot::Receiver<Grant<R>>,
        queue_depth: usize,
    ) -> Result<R, BulkheadError<E>>
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
        E: Send + 'static,
    {
        let cfg = &self.shared.config;
        cfg.event_listeners.emit(&BulkheadEvent::Queued {
            bulkhead: cfg.name.clone(),
            request_id: request.id(),
            timestamp: Instant::now(),
            queue_depth,
        });
        trace!(bulkhead = %cfg.name, id = request.id(), queue_depth, "request queued");

        let grant = tokio::select! {
            res = &mut rx => res.ok(),
            _ = tokio::time::sleep(cfg.queue_timeout) => {
                // The timer races the grant; whoever takes the lock first
                // wins. Still queued here means the timeout won.
                let timed_out = {
                    let mut state = self.shared.state.lock().unwrap();
                    match state.queue.iter().position(|w| w.id == request.id()) {
                        Some(pos) => {
                            state.queue.remove(pos);
                            state.stats.record_queue_timeout();
                            #[cfg(feature = "metrics")]
                            self.shared.update_gauges_locked(&state);
                            true
                        }
                        None => false,
                    }
                };
                if timed_out {
                    let waited = request.queue_time();
                    cfg.event_listeners.emit(&BulkheadEvent::QueueTimedOut {
                        bulkhead: cfg.name.clone(),
                        request_id: request.id(),
                        timestamp: Instant::now(),
                        waited,
                    });
                    debug!(
                        bulkhead = %cfg.name,
                        id = request.id(),
                        ?waited,
                        "request timed out in queue"
                    );
                    #[cfg(feature = "metrics")]
                    counter!("bulkhead_queue_timeouts_total", "bulkhead" => cfg.name.clone())
                        .increment(1);
                    return Err(BulkheadError::QueueTimeout { waited });
                }
                // Dequeued before the timer fired: the grant is already in
                // the channel (it is sent under the same lock that removed
                // us from the queue), so this request never times out here.
                rx.try_recv().ok()
            }
        };

        match grant {
            Some(Grant::Execute {
                reservation,
                concurrent,
            }) => self.run_slot(work, request, reservation, concurrent).await,
            Some(Grant::Shutdown) | None => Err(BulkheadError::Shutdown),
        }
    }

    /// Races the spawned work against the execution timeout and the forced
    /// shutdown signal; the first to settle decides the outcome and the
    /// losers are discarded. Timed-out work is detached, never aborted.
    async fn run_slot<F, E>(
        &self,
        work: F,
        mut request: RequestContext,
        mut reservation: SlotReservation<R>,
        concurrent: usize,
    ) -> Result<R, BulkheadError<E>>
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
        E: Send + 'static,
    {
        enum Outcome<R, E> {
            Settled(Result<Result<R, E>, tokio::task::JoinError>),
            TimedOut,
            Forced,
        }

        let cfg = &self.shared.config;
        request.mark_started();
        cfg.event_listeners.emit(&BulkheadEvent::Executing {
            bulkhead: cfg.name.clone(),
            request_id: request.id(),
            timestamp: Instant::now(),
            concurrent,
        });
        trace!(bulkhead = %cfg.name, id = request.id(), concurrent, "request executing");

        let mut force = self.shared.force_shutdown.subscribe();
        let mut handle = tokio::spawn(work);
        let outcome = tokio::select! {
            res = &mut handle => Outcome::Settled(res),
            _ = tokio::time::sleep(cfg.execution_timeout) => Outcome::TimedOut,
            Ok(_) = force.wait_for(|forced| *forced) => Outcome::Forced,
        };

        match outcome {
            Outcome::Settled(Ok(Ok(value))) => {
                request.mark_completed();
                let execution_time = request.execution_time().unwrap_or_default();
                let executing = reservation.release(|stats| stats.record_completed(execution_time));
                cfg.event_listeners.emit(&BulkheadEvent::Completed {
                    bulkhead: cfg.name.clone(),
                    request_id: request.id(),
                    timestamp: Instant::now(),
                    execution_time,
                });
                trace!(
                    bulkhead = %cfg.name,
                    id = request.id(),
                    ?execution_time,
                    executing,
                    "request completed"
                );
                #[cfg(feature = "metrics")]
                counter!("bulkhead_requests_completed_total", "bulkhead" => cfg.name.clone())
                    .increment(1);
                Ok(value)
            }
            Outcome::Settled(Ok(Err(error))) => {
                request.mark_completed();
                let execution_time = request.execution_time().unwrap_or_default();
                let executing =
                    reservation.release(|stats| stats.record_failed(Some(execution_time)));
                cfg.event_listeners.emit(&BulkheadEvent::Failed {
                    bulkhead: cfg.name.clone(),
                    request_id: request.id(),
                    timestamp: Instant::now(),
                    execution_time,
                });
                debug!(
                    bulkhead = %cfg.name,
                    id = request.id(),
                    ?execution_time,
                    executing,
                    "request failed"
                );
                #[cfg(feature = "metrics")]
                counter!("bulkhead_requests_failed_total", "bulkhead" => cfg.name.clone())
                    .increment(1);
                Err(BulkheadError::Execution(error))
            }
            Outcome::Settled(Err(join_error)) => {
                request.mark_completed();
                let execution_time = request.execution_time().unwrap_or_default();
                reservation.release(|stats| stats.record_failed(Some(execution_time)));
                cfg.event_listeners.emit(&BulkheadEvent::Failed {
                    bulkhead: cfg.name.clone(),
                    request_id: request.id(),
                    timestamp: Instant::now(),
                    execution_time,
                });
                #[cfg(feature = "metrics")]
                counter!("bulkhead_requests_failed_total", "bulkhead" => cfg.name.clone())
                    .increment(1);
                if join_error.is_panic() {
                    std::panic::resume_unwind(join_error.into_panic());
                }
                Err(BulkheadError::Shutdown)
            }
            Outcome::TimedOut => {
                // The slot is freed and the caller settled; the spawned task
                // keeps running detached and its eventual result is dropped.
                let executing = reservation.release(|stats| stats.record_execution_timeout());
                cfg.event_listeners.emit(&BulkheadEvent::ExecutionTimedOut {
                    bulkhead: cfg.name.clone(),
                    request_id: request.id(),
                    timestamp: Instant::now(),
                    limit: cfg.execution_timeout,
                });
                debug!(
                    bulkhead = %cfg.name,
                    id = request.id(),
                    limit = ?cfg.execution_timeout,
                    executing,
                    "request exceeded execution timeout, work detached"
                );
                #[cfg(feature = "metrics")]
                counter!("bulkhead_execution_timeouts_total", "bulkhead" => cfg.name.clone())
                    .increment(1);
                Err(BulkheadError::ExecutionTimeout {
                    limit: cfg.execution_timeout,
                })
            }
            Outcome::Forced => {
                handle.abort();
                reservation.release(|stats| stats.record_failed(None));
                debug!(
                    bulkhead = %cfg.name,
                    id = request.id(),
                    "request settled by forced shutdown"
                );
                Err(BulkheadError::Shutdown)
            }
        }
    }

    /// Begins shutdown. New submissions are rejected from this point on, and
    /// every still-queued request settles immediately with
    /// [`Shutdown`](BulkheadError::Shutdown).
    ///
    /// With `graceful` set, returns only after all in-flight work has
    /// finished naturally; otherwise every executing request is settled with
    /// a shutdown error right away and its task aborted. Idempotent.
    pub async fn shutdown(&self, graceful: bool) {
        let first = {
            let mut state = self.shared.state.lock().unwrap();
            let first = !state.shutdown;
            state.shutdown = true;
            while let Some(waiter) = state.queue.pop_front() {
                state.stats.record_rejected();
                let _ = waiter.grant.send(Grant::Shutdown);
            }
            #[cfg(feature = "metrics")]
            self.shared.update_gauges_locked(&state);
            first
        };
        if first {
            debug!(bulkhead = %self.shared.config.name, graceful, "bulkhead shutting down");
        }
        if graceful {
            loop {
                if self.shared.state.lock().unwrap().executing.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        } else {
            // send_replace so the flag is set even with no live subscriber;
            // a request between admission and subscribe still observes it
            self.shared.force_shutdown.send_replace(true);
        }
    }

    /// Compartment name.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// The compartment's immutable configuration.
    pub fn config(&self) -> &BulkheadConfig<R> {
        &self.shared.config
    }

    /// Whether shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().unwrap().shutdown
    }

    /// Read-only snapshot of current occupancy. No side effects.
    pub fn state(&self) -> BulkheadState {
        let cfg = &self.shared.config;
        let state = self.shared.state.lock().unwrap();
        BulkheadState {
            executing: state.executing.len(),
            queued: state.queue.len(),
            max_concurrent: cfg.max_concurrent,
            max_queue_size: cfg.max_queue_size,
            utilization_percent: state.executing.len() as f64 * 100.0 / cfg.max_concurrent as f64,
            queue_utilization_percent: state.queue.len() as f64 * 100.0
                / cfg.max_queue_size as f64,
            is_shutdown: state.shutdown,
        }
    }

    /// Read-only snapshot of the compartment's counters and derived rates.
    pub fn stats(&self) -> BulkheadStats {
        self.shared.state.lock().unwrap().stats.snapshot()
    }
}

impl<R> Clone for Bulkhead<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R> fmt::Debug for Bulkhead<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock().unwrap();
        f.debug_struct("Bulkhead")
            .field("name", &self.shared.config.name)
            .field("executing", &state.executing.len())
            .field("queued", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}
