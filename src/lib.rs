//! Bulkhead pattern for async Rust.
//!
//! A bulkhead is an isolated resource compartment: it bounds how many units
//! of asynchronous work may execute at once, queues a bounded backlog of
//! excess requests, and rejects the rest, so a slow or overloaded downstream
//! dependency cannot exhaust the caller's resources and cascade failure into
//! unrelated call paths.
//!
//! Each compartment enforces two independent timeouts: a queue timeout (how
//! long a request may wait for a slot) and an execution timeout (how long it
//! may run once started). Work that outlives its execution timeout is settled
//! as timed out toward the caller but is *not* cancelled; it keeps running in
//! the background. This is a documented limitation, not a guarantee of
//! resource reclamation.
//!
//! # Basic Example
//!
//! ```rust
//! use bulkhead::{Bulkhead, BulkheadConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let bulkhead = Bulkhead::new(
//!     BulkheadConfig::builder()
//!         .name("database")
//!         .max_concurrent(10)
//!         .max_queue_size(100)
//!         .queue_timeout(Duration::from_secs(2))
//!         .execution_timeout(Duration::from_secs(5))
//!         .build(),
//! );
//!
//! let result: Result<String, _> = bulkhead
//!     .submit(async {
//!         // call the downstream dependency here
//!         Ok::<_, std::io::Error>("row".to_string())
//!     })
//!     .await;
//! # let _ = result;
//! # }
//! ```
//!
//! # Fallback on Rejection
//!
//! When the backlog is full a compartment either raises
//! [`BulkheadError::QueueFull`] (the default) or, with the `Fallback`
//! strategy, returns a degraded result from a caller-supplied producer:
//!
//! ```rust
//! use bulkhead::{Bulkhead, BulkheadConfig};
//!
//! # async fn example() {
//! let bulkhead = Bulkhead::new(
//!     BulkheadConfig::builder()
//!         .name("recommendations")
//!         .max_concurrent(5)
//!         .max_queue_size(10)
//!         .fallback(|_request| Vec::<String>::new())
//!         .build(),
//! );
//!
//! // At saturation this settles with the empty fallback list instead of
//! // an error.
//! let result = bulkhead
//!     .submit(async { Ok::<_, String>(vec!["item".to_string()]) })
//!     .await;
//! # let _ = result;
//! # }
//! ```
//!
//! # Monitoring
//!
//! Every request transition emits a [`BulkheadEvent`] to listeners
//! registered on the configuration, and [`Bulkhead::state`] /
//! [`Bulkhead::stats`] expose read-only snapshots:
//!
//! ```rust
//! use bulkhead::{Bulkhead, BulkheadConfig};
//!
//! # async fn example() {
//! let bulkhead: Bulkhead<()> = Bulkhead::new(
//!     BulkheadConfig::builder()
//!         .name("payments")
//!         .on_rejected(|queue_depth| {
//!             eprintln!("rejected at queue depth {queue_depth}");
//!         })
//!         .on_completed(|execution_time| {
//!             println!("completed in {execution_time:?}");
//!         })
//!         .build(),
//! );
//!
//! let stats = bulkhead.stats();
//! println!(
//!     "accepted {} of {} ({:.0}% success)",
//!     stats.accepted_requests,
//!     stats.total_requests,
//!     stats.success_rate * 100.0,
//! );
//! # }
//! ```
//!
//! # Multiple Compartments
//!
//! A [`BulkheadManager`] composes independently-failing compartments behind
//! names and coordinates shutdown:
//!
//! ```rust
//! use bulkhead::{BulkheadConfig, BulkheadManager};
//!
//! # async fn example() {
//! let manager: BulkheadManager<String> = BulkheadManager::new();
//! manager
//!     .create("orders", BulkheadConfig::builder().max_concurrent(20).build())
//!     .unwrap();
//! manager
//!     .create("search", BulkheadConfig::builder().max_concurrent(5).build())
//!     .unwrap();
//!
//! let result = manager
//!     .execute("orders", async { Ok::<_, String>("ok".to_string()) })
//!     .await;
//! # let _ = result;
//!
//! // Let in-flight work drain, reject everything still queued.
//! manager.shutdown_all(true).await;
//! # }
//! ```

pub mod bulkhead;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod request;
pub mod stats;

pub use crate::bulkhead::{Bulkhead, BulkheadState};
pub use crate::config::{BulkheadConfig, BulkheadConfigBuilder, FallbackFn, RejectionStrategy};
pub use crate::error::{BulkheadError, ManagerError, RegistryError};
pub use crate::events::{BulkheadEvent, EventListener, EventListeners, FnListener};
pub use crate::manager::BulkheadManager;
pub use crate::request::RequestContext;
pub use crate::stats::BulkheadStats;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn config_builder_round_trip() {
        let config = BulkheadConfig::<()>::builder()
            .name("smoke")
            .max_concurrent(3)
            .queue_timeout(Duration::from_millis(10))
            .build();
        assert_eq!(config.name(), "smoke");
        assert_eq!(config.max_concurrent(), 3);
    }

    #[tokio::test]
    async fn submit_happy_path() {
        let bulkhead = Bulkhead::new(BulkheadConfig::builder().name("smoke").build());
        let value = bulkhead
            .submit(async { Ok::<_, ()>(42u32) })
            .await
            .unwrap();
        assert_eq!(value, 42);

        let stats = bulkhead.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.completed_requests, 1);
    }

    #[test]
    fn error_taxonomy_is_displayable() {
        let errors: Vec<BulkheadError<String>> = vec![
            BulkheadError::QueueFull { max_queue_size: 1 },
            BulkheadError::QueueTimeout {
                waited: Duration::from_millis(30),
            },
            BulkheadError::ExecutionTimeout {
                limit: Duration::from_millis(50),
            },
            BulkheadError::Execution("downstream".to_string()),
            BulkheadError::Shutdown,
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
