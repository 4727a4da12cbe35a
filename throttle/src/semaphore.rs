use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Fixed pool of job slots.
///
/// Cloning yields another handle to the same pool.
#[derive(Debug, Clone)]
pub struct Slots {
    capacity: usize,
    sem: Arc<tokio::sync::Semaphore>,
    counters: Arc<Counters>,
}

impl Slots {
    /// A pool of `capacity` slots; zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            sem: Arc::new(tokio::sync::Semaphore::new(capacity)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a free slot. The slot is returned when the guard is dropped.
    pub async fn acquire(&self) -> SlotGuard {
        let permit = match self.sem.clone().acquire_owned().await {
            Ok(permit) => permit,
            // the semaphore is owned by this pool and never closed
            Err(_) => unreachable!("job slot semaphore closed"),
        };
        let active = self.counters.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak.fetch_max(active, Ordering::AcqRel);
        tracing::trace!("slot acquired, {}/{} in use", active, self.capacity);
        SlotGuard {
            _permit: permit,
            counters: self.counters.clone(),
        }
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::Acquire)
    }

    /// Highest number of slots ever held at once.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct SlotGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::AcqRel);
    }
}
