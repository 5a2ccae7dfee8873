// ABOUTME: Thread-safe pool of reusable objects for hot allocation paths
//
// Rented objects are exclusively owned by the renter until released. Released
// objects pass through an optional reset callback and are kept only while the
// free list is below `max_size`; the rest are dropped.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Reuse counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourcePoolStats {
    /// Objects built by the factory
    pub created: u64,
    /// Rents served from the free list
    pub reused: u64,
    /// Releases kept in the free list
    pub returned: u64,
    /// Releases dropped because the free list was full
    pub discarded: u64,
}

/// Bounded free list with a factory
pub struct ResourcePool<T> {
    free: Mutex<Vec<T>>,
    max_size: usize,
    factory: Factory<T>,
    reset: Option<Reset<T>>,
    created: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
    discarded: AtomicU64,
}

impl<T> std::fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl<T> ResourcePool<T> {
    pub fn new<F>(max_size: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            free: Mutex::new(Vec::with_capacity(max_size)),
            max_size,
            factory: Box::new(factory),
            reset: None,
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Run `reset` on every object before it re-enters the pool
    #[must_use]
    pub fn with_reset<R>(mut self, reset: R) -> Self
    where
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Some(Box::new(reset));
        self
    }

    /// Take a pooled object, building one if the pool is empty
    pub fn rent(&self) -> T {
        // Bind first so the lock is released before the factory runs
        let pooled = self.free.lock().pop();
        match pooled {
            Some(item) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        }
    }

    /// Return an object; dropped if the pool is already full
    pub fn release(&self, mut item: T) {
        if let Some(reset) = &self.reset {
            reset(&mut item);
        }

        let mut free = self.free.lock();
        if free.len() < self.max_size {
            free.push(item);
            drop(free);
            self.returned.fetch_add(1, Ordering::Relaxed);
        } else {
            drop(free);
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Rent an object that returns itself to the pool when dropped
    pub fn rent_guard(self: &Arc<Self>) -> Pooled<T> {
        Pooled {
            item: Some(self.rent()),
            pool: Arc::clone(self),
        }
    }

    /// Drop every idle object
    pub fn clear(&self) {
        self.free.lock().clear();
    }

    /// Number of idle objects
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.lock().is_empty()
    }

    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> ResourcePoolStats {
        ResourcePoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Rented object that goes back to its pool on drop
pub struct Pooled<T> {
    item: Option<T>,
    pool: Arc<ResourcePool<T>>,
}

impl<T> Pooled<T> {
    /// Keep the object instead of returning it
    pub fn into_inner(mut self) -> T {
        match self.item.take() {
            Some(item) => item,
            // Only `into_inner` and `Drop` take the item, and both consume the guard
            None => unreachable!("pooled item already taken"),
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item already taken"),
        }
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item already taken"),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
