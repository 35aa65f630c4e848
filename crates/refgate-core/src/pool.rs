//! Weighted capacity pool.
//!
//! Admission control for referee jobs. Each job declares a cost; the pool
//! admits it only while `used + cost <= capacity`. Waiters sleep on a shared
//! [`Notify`] and every release wakes all of them, so a cheap job can slip in
//! ahead of an expensive one that still does not fit.
//!
//! Invariant: `0 <= used <= capacity` at every observable point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::PoolError;

struct PoolInner {
    capacity: usize,
    used: Mutex<usize>,
    notify: Notify,
    closed: AtomicBool,
}

/// Cloneable handle to a shared capacity pool.
#[derive(Clone)]
pub struct WeightedCapacityPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WeightedCapacityPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedCapacityPool")
            .field("capacity", &self.inner.capacity)
            .field("used", &self.used())
            .finish()
    }
}

impl WeightedCapacityPool {
    /// Create a pool. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity: capacity.max(1),
                used: Mutex::new(0),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Capacity currently reserved.
    pub fn used(&self) -> usize {
        *self.lock()
    }

    pub fn available(&self) -> usize {
        self.inner.capacity - *self.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Wait until `cost` fits, then reserve it.
    ///
    /// Dropping the returned future before it resolves reserves nothing, so
    /// wrapping it in `tokio::time::timeout` is safe. Fails only once the
    /// pool has been [closed](Self::close).
    pub async fn acquire(&self, cost: usize) -> Result<CapacityPermit, PoolError> {
        let cost = self.effective_cost(cost);
        loop {
            // Register interest before checking, so a release between the
            // check and the await is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(PoolError::Closed);
            }
            if self.try_reserve(cost) {
                return Ok(CapacityPermit {
                    pool: self.clone(),
                    cost,
                    released: false,
                });
            }
            notified.await;
        }
    }

    /// Reserve `cost` without waiting.
    pub fn try_acquire(&self, cost: usize) -> Option<CapacityPermit> {
        let cost = self.effective_cost(cost);
        if self.is_closed() || !self.try_reserve(cost) {
            return None;
        }
        Some(CapacityPermit {
            pool: self.clone(),
            cost,
            released: false,
        })
    }

    /// Return `cost` units and wake every waiter. Saturates at zero.
    ///
    /// Prefer dropping a [`CapacityPermit`]; this exists for callers that
    /// manage reservations by hand after [`CapacityPermit::forget`].
    pub fn release(&self, cost: usize) {
        let cost = self.effective_cost(cost);
        {
            let mut used = self.lock();
            *used = used.saturating_sub(cost);
        }
        self.inner.notify.notify_waiters();
    }

    /// Refuse all further acquisitions and wake pending waiters with
    /// [`PoolError::Closed`]. Outstanding permits still release normally.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    // A job heavier than the whole pool would never be admitted; it is
    // clamped so it runs alone instead.
    fn effective_cost(&self, cost: usize) -> usize {
        cost.clamp(1, self.inner.capacity)
    }

    fn try_reserve(&self, cost: usize) -> bool {
        let mut used = self.lock();
        if *used + cost <= self.inner.capacity {
            *used += cost;
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.inner.used.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reservation held by a running job. Releases its cost exactly once, on
/// drop or through [`release`](Self::release).
#[must_use = "dropping the permit releases its capacity immediately"]
pub struct CapacityPermit {
    pool: WeightedCapacityPool,
    cost: usize,
    released: bool,
}

impl CapacityPermit {
    /// Cost actually reserved (after clamping).
    pub fn cost(&self) -> usize {
        self.cost
    }

    /// Release now rather than at end of scope.
    pub fn release(mut self) {
        self.release_once();
    }

    /// Keep the reservation but detach it from this permit. The caller must
    /// later call [`WeightedCapacityPool::release`] with [`cost`](Self::cost).
    pub fn forget(mut self) -> usize {
        self.released = true;
        self.cost
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.release(self.cost);
        }
    }
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for CapacityPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityPermit")
            .field("cost", &self.cost)
            .field("released", &self.released)
            .finish()
    }
}
