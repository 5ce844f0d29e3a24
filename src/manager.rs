//! Named registry composing independent compartments.

use crate::bulkhead::{Bulkhead, BulkheadState};
use crate::config::BulkheadConfig;
use crate::error::{ManagerError, RegistryError};
use crate::stats::BulkheadStats;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Registry of named, mutually independent [`Bulkhead`] compartments.
///
/// Saturation or shutdown of one compartment never affects another; the
/// manager only routes by name and aggregates snapshots.
pub struct BulkheadManager<R> {
    compartments: RwLock<HashMap<String, Bulkhead<R>>>,
}

impl<R: Send + 'static> BulkheadManager<R> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            compartments: RwLock::new(HashMap::new()),
        }
    }

    /// Creates and registers a compartment under `name`.
    ///
    /// The name becomes the compartment's name, overriding whatever the
    /// configuration builder carried. Fails if the name is taken.
    pub fn create(
        &self,
        name: impl Into<String>,
        mut config: BulkheadConfig<R>,
    ) -> Result<Bulkhead<R>, RegistryError> {
        let name = name.into();
        let mut compartments = self.compartments.write().unwrap();
        if compartments.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        config.name = name.clone();
        let bulkhead = Bulkhead::new(config);
        compartments.insert(name.clone(), bulkhead.clone());
        debug!(bulkhead = %name, "compartment registered");
        Ok(bulkhead)
    }

    /// Returns a handle to the named compartment, if registered.
    pub fn get(&self, name: &str) -> Option<Bulkhead<R>> {
        self.compartments.read().unwrap().get(name).cloned()
    }

    /// Registered compartment names.
    pub fn names(&self) -> Vec<String> {
        self.compartments.read().unwrap().keys().cloned().collect()
    }

    /// Submits work to the named compartment.
    pub async fn execute<F, E>(&self, name: &str, work: F) -> Result<R, ManagerError<E>>
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
        E: Send + 'static,
    {
        let bulkhead = self
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        bulkhead.submit(work).await.map_err(ManagerError::from)
    }

    /// Submits work with a caller payload to the named compartment.
    pub async fn execute_with_context<F, E>(
        &self,
        name: &str,
        work: F,
        context: Arc<dyn Any + Send + Sync>,
    ) -> Result<R, ManagerError<E>>
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
        E: Send + 'static,
    {
        let bulkhead = self
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        bulkhead
            .submit_with_context(work, context)
            .await
            .map_err(ManagerError::from)
    }

    /// Occupancy snapshot of every registered compartment.
    pub fn all_states(&self) -> HashMap<String, BulkheadState> {
        self.compartments
            .read()
            .unwrap()
            .iter()
            .map(|(name, b)| (name.clone(), b.state()))
            .collect()
    }

    /// Counter snapshot of every registered compartment.
    pub fn all_stats(&self) -> HashMap<String, BulkheadStats> {
        self.compartments
            .read()
            .unwrap()
            .iter()
            .map(|(name, b)| (name.clone(), b.stats()))
            .collect()
    }

    /// Shuts down every compartment, concurrently. Graceful mode returns
    /// once all in-flight work across all compartments has drained.
    pub async fn shutdown_all(&self, graceful: bool) {
        let all: Vec<Bulkhead<R>> = self
            .compartments
            .read()
            .unwrap()
            .values()
            .cloned()
            .collect();
        debug!(compartments = all.len(), graceful, "shutting down all compartments");
        futures::future::join_all(all.iter().map(|b| b.shutdown(graceful))).await;
    }
}

impl<R: Send + 'static> Default for BulkheadManager<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for BulkheadManager<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let compartments = self.compartments.read().unwrap();
        f.debug_struct("BulkheadManager")
            .field("compartments", &compartments.keys().collect::<Vec<_>>())
            .finish()
    }
}
