//! Compartment health counters.
//!
//! Counters are mutated only by the engine, at transition points, under the
//! engine's single state lock. Readers only ever see [`BulkheadStats`]
//! snapshots.

use std::time::Duration;

/// A point-in-time snapshot of a compartment's counters and derived rates.
#[derive(Debug, Clone, Default)]
pub struct BulkheadStats {
    /// Submissions counted (shutdown-rejected submissions are not counted).
    pub total_requests: u64,
    /// Requests that began executing, immediately or after promotion.
    pub accepted_requests: u64,
    /// Requests settled without ever executing: queue overflow, queue
    /// timeout, or shutdown while queued.
    pub rejected_requests: u64,
    /// Requests whose work completed with a value.
    pub completed_requests: u64,
    /// Requests whose work failed, panicked, or was settled by a forced
    /// shutdown while executing.
    pub failed_requests: u64,
    /// Requests that exceeded the execution timeout.
    pub timeout_requests: u64,
    /// Requests that exceeded the queue timeout (also counted in
    /// `rejected_requests`).
    pub queue_timeouts: u64,
    /// Highest number of simultaneously executing requests observed.
    pub peak_concurrency: usize,
    /// Longest queue observed.
    pub peak_queue_size: usize,
    /// Mean execution time over settled executions with a measured duration.
    pub average_execution_time: Duration,
    /// Mean queue wait over accepted requests (zero wait for immediate
    /// admissions).
    pub average_queue_time: Duration,
    /// `completed_requests / total_requests`, or 0.0 before any submission.
    pub success_rate: f64,
}

/// Running accumulation behind [`BulkheadStats`]. Lives inside the engine's
/// state mutex.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    total: u64,
    accepted: u64,
    rejected: u64,
    completed: u64,
    failed: u64,
    timed_out: u64,
    queue_timeouts: u64,
    execution_time_sum: Duration,
    execution_samples: u64,
    queue_time_sum: Duration,
    peak_concurrency: usize,
    peak_queue_size: usize,
}

impl StatsRecorder {
    pub(crate) fn record_submitted(&mut self) {
        self.total += 1;
    }

    pub(crate) fn record_accepted(&mut self, concurrent: usize, waited: Duration) {
        self.accepted += 1;
        self.queue_time_sum += waited;
        self.peak_concurrency = self.peak_concurrency.max(concurrent);
    }

    pub(crate) fn record_queued(&mut self, queue_depth: usize) {
        self.peak_queue_size = self.peak_queue_size.max(queue_depth);
    }

    pub(crate) fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    pub(crate) fn record_queue_timeout(&mut self) {
        self.rejected += 1;
        self.queue_timeouts += 1;
    }

    pub(crate) fn record_completed(&mut self, execution_time: Duration) {
        self.completed += 1;
        self.execution_time_sum += execution_time;
        self.execution_samples += 1;
    }

    pub(crate) fn record_failed(&mut self, execution_time: Option<Duration>) {
        self.failed += 1;
        if let Some(t) = execution_time {
            self.execution_time_sum += t;
            self.execution_samples += 1;
        }
    }

    pub(crate) fn record_execution_timeout(&mut self) {
        self.timed_out += 1;
    }

    pub(crate) fn snapshot(&self) -> BulkheadStats {
        let average_execution_time = if self.execution_samples > 0 {
            self.execution_time_sum / self.execution_samples as u32
        } else {
            Duration::ZERO
        };
        let average_queue_time = if self.accepted > 0 {
            self.queue_time_sum / self.accepted as u32
        } else {
            Duration::ZERO
        };
        let success_rate = if self.total > 0 {
            self.completed as f64 / self.total as f64
        } else {
            0.0
        };
        BulkheadStats {
            total_requests: self.total,
            accepted_requests: self.accepted,
            rejected_requests: self.rejected,
            completed_requests: self.completed,
            failed_requests: self.failed,
            timeout_requests: self.timed_out,
            queue_timeouts: self.queue_timeouts,
            peak_concurrency: self.peak_concurrency,
            peak_queue_size: self.peak_queue_size,
            average_execution_time,
            average_queue_time,
            success_rate,
        }
    }
}
