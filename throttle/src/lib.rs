//! Concurrency ceiling for transfer jobs.
//!
//! A run may list many jobs but only `MaxConcurrentJobs` of them may hold an endpoint session
//! at the same time. [`Slots`] hands out one guard per running job; a job that cannot get a
//! slot waits until another job finishes and drops its guard.
//!
//! ```rust,no_run
//! # async fn example() {
//! let slots = throttle::Slots::new(2);
//! let _slot = slots.acquire().await;
//! // run the job here - the slot is released when the guard is dropped
//! # }
//! ```

mod semaphore;

pub use semaphore::{SlotGuard, Slots};
