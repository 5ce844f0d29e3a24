//! Per-submission bookkeeping.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Bookkeeping for a single submission: identity, optional caller payload,
/// and the timestamps that drive queue-time and execution-time accounting.
///
/// A request lives in at most one of the compartment's collections (queue or
/// executing set) at any instant and is removed from both once it settles.
pub struct RequestContext {
    id: u64,
    payload: Option<Arc<dyn Any + Send + Sync>>,
    enqueued_at: Instant,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
}

impl RequestContext {
    pub(crate) fn new(payload: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            payload,
            enqueued_at: Instant::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Process-unique id for this submission.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The caller-supplied payload, if any, downcast to `T`.
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref())
    }

    /// When the request was submitted.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// When execution began, if it has.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// When execution settled, if it has.
    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    /// Time spent waiting for a slot. While still waiting this is the time
    /// waited so far.
    pub fn queue_time(&self) -> Duration {
        match self.started_at {
            Some(started) => started.saturating_duration_since(self.enqueued_at),
            None => self.enqueued_at.elapsed(),
        }
    }

    /// Time spent executing, once the request has both started and settled.
    pub fn execution_time(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some(completed.saturating_duration_since(started))
            }
            _ => None,
        }
    }

    pub(crate) fn mark_started(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub(crate) fn mark_completed(&mut self) {
        self.completed_at = Some(Instant::now());
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("has_payload", &self.payload.is_some())
            .field("enqueued_at", &self.enqueued_at)
            .field("started_at", &self.started_at)
            .field("completed_at", &self.completed_at)
            .finish()
    }
}
