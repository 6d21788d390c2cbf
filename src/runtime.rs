//! The assembled dependency core: config, policy, dispatcher, workers.
//!
//! [`Runtime`] wires the pieces together and exposes the whole external
//! surface in one place. Tests that want deterministic control can run
//! with zero workers and pump the policy by hand through the dispatcher.

use std::sync::Arc;
use tracing::info;

use crate::config::{ConfigError, CoreConfig};
use crate::data::{Arbiter, DataHandle, DataLayout};
use crate::dispatch::{AcquireGuard, Dispatcher};
use crate::error::Result;
use crate::metrics::MetricsSnapshot;
use crate::policy::{FifoPolicy, SchedPolicy};
use crate::task::Task;
use crate::types::{AccessMode, TaskId};
use crate::worker::WorkerPool;

/// A running dependency core.
pub struct Runtime {
    config: CoreConfig,
    dispatcher: Arc<Dispatcher>,
    pool: Option<WorkerPool>,
}

impl Runtime {
    /// Starts a runtime with the given policy.
    pub fn new(config: CoreConfig, policy: Arc<dyn SchedPolicy>) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&policy)));
        let workers = config.effective_workers();
        let pool = (workers > 0).then(|| {
            WorkerPool::spawn(
                workers,
                config.park_timeout,
                Arc::clone(&dispatcher),
                policy,
            )
        });
        info!(workers, "dependency core started");
        Ok(Self {
            config,
            dispatcher,
            pool,
        })
    }

    /// Starts a runtime over a FIFO policy.
    pub fn with_fifo(config: CoreConfig) -> std::result::Result<Self, ConfigError> {
        Self::new(config, Arc::new(FifoPolicy::new()))
    }

    /// The dispatch engine, for direct control in tests and embeddings.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Registers a data handle.
    #[must_use]
    pub fn register(&self, layout: DataLayout) -> Arc<DataHandle> {
        DataHandle::register(layout)
    }

    /// Unregisters a handle, blocking until it is idle.
    pub fn unregister(&self, handle: &Arc<DataHandle>) {
        handle.unregister();
    }

    /// Creates an arbiter, honoring the configured exclusion domain.
    #[must_use]
    pub fn create_arbiter(&self) -> Arc<Arbiter> {
        if self.config.arbiter_delegation {
            Arbiter::create_delegating()
        } else {
            Arbiter::create()
        }
    }

    /// Submits a task for execution.
    pub fn submit(&self, task: Task) -> Result<TaskId> {
        self.dispatcher.submit(task)
    }

    /// Synchronous user-side acquisition; blocks until granted.
    pub fn acquire(&self, handle: &Arc<DataHandle>, mode: AccessMode) -> Result<AcquireGuard<'_>> {
        self.dispatcher.acquire(handle, mode)
    }

    /// Callback-style user-side acquisition.
    pub fn acquire_cb(
        &self,
        handle: &Arc<DataHandle>,
        mode: AccessMode,
        granted: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.dispatcher.acquire_cb(handle, mode, granted)
    }

    /// Injects the reduction combine task for `handle` if needed.
    pub fn redux_flush(&self, handle: &Arc<DataHandle>) -> Result<bool> {
        self.dispatcher.redux_flush(handle)
    }

    /// Point-in-time dispatch statistics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.dispatcher.metrics().snapshot()
    }

    /// Stops the worker pool after draining queued work.
    pub fn shutdown(mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.pool.as_ref().map_or(0, WorkerPool::len))
            .finish_non_exhaustive()
    }
}
