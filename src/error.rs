//! Error types for bulkhead admission control.

use std::fmt;
use std::time::Duration;

/// Errors a submission can settle with.
///
/// Every request submitted to a [`Bulkhead`](crate::Bulkhead) reaches exactly
/// one terminal outcome: a value, or exactly one of these variants. `E` is the
/// caller's own work error, propagated verbatim through [`Execution`](Self::Execution).
#[derive(Debug)]
pub enum BulkheadError<E> {
    /// Rejected at submission because the backlog is already at capacity.
    QueueFull {
        /// Configured queue capacity that was exceeded.
        max_queue_size: usize,
    },
    /// Waited in the queue longer than the configured queue timeout.
    QueueTimeout {
        /// How long the request sat in the queue before giving up.
        waited: Duration,
    },
    /// Ran longer than the configured execution timeout.
    ///
    /// The underlying work is not cancelled; it may still be running in the
    /// background when this error is returned.
    ExecutionTimeout {
        /// The execution timeout that was exceeded.
        limit: Duration,
    },
    /// The caller's work itself failed.
    Execution(E),
    /// Submitted after shutdown began, or still pending when a forced
    /// shutdown occurred.
    Shutdown,
}

impl<E> fmt::Display for BulkheadError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkheadError::QueueFull { max_queue_size } => write!(
                f,
                "bulkhead queue is full: {} requests already waiting",
                max_queue_size
            ),
            BulkheadError::QueueTimeout { waited } => write!(
                f,
                "timed out after {:?} waiting for an execution slot",
                waited
            ),
            BulkheadError::ExecutionTimeout { limit } => {
                write!(f, "execution exceeded the {:?} timeout", limit)
            }
            BulkheadError::Execution(e) => write!(f, "request execution failed: {}", e),
            BulkheadError::Shutdown => write!(f, "bulkhead is shut down"),
        }
    }
}

impl<E> std::error::Error for BulkheadError<E> where E: std::error::Error {}

impl<E> BulkheadError<E> {
    /// Returns `true` for either timeout variant (queue or execution).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BulkheadError::QueueTimeout { .. } | BulkheadError::ExecutionTimeout { .. }
        )
    }

    /// Returns `true` if the request was rejected because the queue was full.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, BulkheadError::QueueFull { .. })
    }

    /// Returns `true` if the request was settled by a shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, BulkheadError::Shutdown)
    }

    /// Extracts the caller's work error, if that is what settled the request.
    pub fn into_execution_error(self) -> Option<E> {
        match self {
            BulkheadError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Registry-level errors from the [`BulkheadManager`](crate::BulkheadManager).
///
/// Fatal to the calling operation only, never to the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A compartment with this name is already registered.
    #[error("a bulkhead named {0:?} is already registered")]
    DuplicateName(String),
    /// No compartment with this name exists.
    #[error("no bulkhead named {0:?}")]
    NotFound(String),
}

/// Combined error type for [`BulkheadManager::execute`](crate::BulkheadManager::execute),
/// which can fail either at lookup or inside the compartment.
#[derive(Debug)]
pub enum ManagerError<E> {
    /// The named compartment does not exist.
    Registry(RegistryError),
    /// The compartment rejected or failed the request.
    Bulkhead(BulkheadError<E>),
}

impl<E> fmt::Display for ManagerError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::Registry(e) => e.fmt(f),
            ManagerError::Bulkhead(e) => e.fmt(f),
        }
    }
}

impl<E> std::error::Error for ManagerError<E> where E: std::error::Error {}

impl<E> From<RegistryError> for ManagerError<E> {
    fn from(err: RegistryError) -> Self {
        ManagerError::Registry(err)
    }
}

impl<E> From<BulkheadError<E>> for ManagerError<E> {
    fn from(err: BulkheadError<E>) -> Self {
        ManagerError::Bulkhead(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_limits() {
        let err: BulkheadError<String> = BulkheadError::QueueFull { max_queue_size: 7 };
        assert!(err.to_string().contains('7'));

        let err: BulkheadError<String> = BulkheadError::ExecutionTimeout {
            limit: Duration::from_millis(50),
        };
        assert!(err.to_string().contains("50ms"));
    }

    #[test]
    fn classification_helpers() {
        let err: BulkheadError<&str> = BulkheadError::QueueTimeout {
            waited: Duration::from_millis(30),
        };
        assert!(err.is_timeout());
        assert!(!err.is_queue_full());

        let err: BulkheadError<&str> = BulkheadError::Execution("boom");
        assert_eq!(err.into_execution_error(), Some("boom"));
    }

    #[test]
    fn registry_error_display() {
        let err = RegistryError::DuplicateName("payments".into());
        assert!(err.to_string().contains("payments"));
        let err = RegistryError::NotFound("orders".into());
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn manager_error_display_is_transparent() {
        let err: ManagerError<&str> = RegistryError::NotFound("orders".into()).into();
        assert_eq!(err.to_string(), "no bulkhead named \"orders\"");
    }
}
