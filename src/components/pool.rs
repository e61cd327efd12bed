//! Bounded component pool.
//!
//! # Responsibilities
//! - Hand out at most `max` live instances
//! - Block callers when exhausted, up to an acquire timeout
//! - Take instances back (recycled) through a RAII guard
//!
//! # Design Decisions
//! - One mutex guards the pool state; a condvar wakes waiters on return
//! - Exhaustion blocks rather than growing past `max`
//! - Instances are created outside the lock

use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::components::Component;
use crate::error::ProcessingError;
use crate::observability::metrics;

/// Sizing of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Instances created up front by `prewarm`.
    pub min: usize,
    /// Upper bound on live instances.
    pub max: usize,
    /// How long `acquire` waits for a returned instance.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min: 1,
            max: 32,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

struct PoolState<T: ?Sized> {
    idle: Vec<Box<T>>,
    live: usize,
    closed: bool,
}

/// A bounded pool of instances of one component.
pub struct Pool<T: ?Sized + Component> {
    name: String,
    factory: Box<dyn Fn() -> Box<T> + Send + Sync>,
    settings: PoolSettings,
    state: Mutex<PoolState<T>>,
    available: Condvar,
}

impl<T: ?Sized + Component> Pool<T> {
    pub fn new(
        name: impl Into<String>,
        settings: PoolSettings,
        factory: impl Fn() -> Box<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            settings: PoolSettings {
                max: settings.max.max(1),
                min: settings.min.min(settings.max.max(1)),
                ..settings
            },
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                live: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `min` instances ahead of the first request.
    pub fn prewarm(&self) {
        let missing = {
            let mut state = self.lock();
            let missing = self.settings.min.saturating_sub(state.live);
            state.live += missing;
            missing
        };
        let created: Vec<Box<T>> = (0..missing).map(|_| (self.factory)()).collect();
        let mut state = self.lock();
        state.idle.extend(created);
        self.available.notify_all();
        tracing::debug!(pool = %self.name, instances = missing, "Pool prewarmed");
    }

    /// Take an instance, blocking while the pool is exhausted.
    pub fn acquire(self: &Arc<Self>) -> Result<PoolGuard<T>, ProcessingError> {
        let started = Instant::now();
        let deadline = started + self.settings.acquire_timeout;
        let mut state = self.lock();

        loop {
            if state.closed {
                return Err(ProcessingError::Disposed {
                    uri: self.name.clone(),
                });
            }
            if let Some(item) = state.idle.pop() {
                return Ok(self.guard(item));
            }
            if state.live < self.settings.max {
                state.live += 1;
                drop(state);
                let item = (self.factory)();
                return Ok(self.guard(item));
            }

            let now = Instant::now();
            if now >= deadline {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                tracing::warn!(pool = %self.name, max = self.settings.max, waited_ms, "Pool exhausted");
                metrics::record_pool_exhausted(&self.name);
                return Err(ProcessingError::PoolExhausted {
                    component: self.name.clone(),
                    max: self.settings.max,
                    waited_ms,
                });
            }
            let (next, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    fn guard(self: &Arc<Self>, item: Box<T>) -> PoolGuard<T> {
        PoolGuard {
            item: Some(item),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut item: Box<T>) {
        item.recycle();
        let mut state = self.lock();
        if state.closed {
            state.live = state.live.saturating_sub(1);
        } else {
            state.idle.push(item);
        }
        drop(state);
        self.available.notify_one();
    }

    /// Stop handing out instances and drop the idle ones.
    pub fn close(&self) {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            let drained = std::mem::take(&mut state.idle);
            state.live = state.live.saturating_sub(drained.len());
            drained
        };
        self.available.notify_all();
        tracing::debug!(pool = %self.name, dropped = drained.len(), "Pool closed");
    }

    /// Instances currently alive (idle or leased).
    pub fn live(&self) -> usize {
        self.lock().live
    }

    pub fn idle(&self) -> usize {
        self.lock().idle.len()
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }
}

/// Exclusive use of a pooled instance; returns it on drop.
pub struct PoolGuard<T: ?Sized + Component> {
    item: Option<Box<T>>,
    pool: Arc<Pool<T>>,
}

impl<T: ?Sized + Component> Deref for PoolGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // `item` is only taken in drop.
        match self.item.as_deref() {
            Some(item) => item,
            None => unreachable!("pool guard used after release"),
        }
    }
}

impl<T: ?Sized + Component> Drop for PoolGuard<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
