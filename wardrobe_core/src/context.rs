//! Execution context.
//!
//! Owns what used to be implicit per-thread state: the main-thread dispatcher
//! and one resource pool per value type. Construct one per owning thread and
//! pass it (usually as `Arc<ExecutionContext>`) to loaders and features.
//!
//! Dropping the context closes its dispatcher. Queued host-object releases
//! run if the drop happens on the owner thread and are discarded otherwise.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use tracing::debug;

use crate::{
    config::PoolConfig,
    dispatch::MainThreadDispatcher,
    pool::{PoolStats, ResourcePool},
};

/// Pools and dispatcher for one owning thread.
pub struct ExecutionContext {
    dispatcher: MainThreadDispatcher,
    prewarm: usize,
    pools: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Creates a context owned by the calling thread.
    pub fn new() -> Self {
        Self::with_config(&PoolConfig::default())
    }

    pub fn with_config(cfg: &PoolConfig) -> Self {
        Self {
            dispatcher: MainThreadDispatcher::for_current_thread(),
            prewarm: cfg.prewarm,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &MainThreadDispatcher {
        &self.dispatcher
    }

    /// Runs host-object releases queued from other threads.
    pub fn pump(&self) -> usize {
        self.dispatcher.pump()
    }

    /// Gets or creates the pool for `T`.
    pub fn pool<T: Send + 'static>(&self) -> ResourcePool<T> {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pools
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<ResourcePool<T>>())
        {
            return pool.clone();
        }

        let pool = ResourcePool::<T>::with_capacity(self.prewarm);
        pools.insert(TypeId::of::<T>(), Box::new(pool.clone()));
        pool
    }

    /// Stats for `T`'s pool, if one was ever created.
    pub fn pool_stats<T: Send + 'static>(&self) -> Option<PoolStats> {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<ResourcePool<T>>())
            .map(ResourcePool::stats)
    }

    /// Number of value types with a pool.
    pub fn pool_count(&self) -> usize {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        let ran = self.dispatcher.close();
        if ran > 0 {
            debug!(ran, "Ran queued releases while dropping context");
        }
    }
}
