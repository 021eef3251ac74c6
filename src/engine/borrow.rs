//! # Column Borrow Acquisition
//!
//! Queries borrow every column they touch in a chunk at once: one read or
//! write lock per component. Taking several locks one by one while other
//! threads do the same in a different order can deadlock, so queries never
//! block on a column lock. Instead:
//!
//! 1. every lock of the chunk is *tried* without blocking,
//! 2. if any attempt fails, all locks taken so far are released (the partial
//!    fetch is dropped) and the whole set is retried,
//! 3. retries spin briefly and then yield the thread.
//!
//! A thread never holds one column while waiting for another, so no lock
//! cycle can form. Under the scheduler's access rules, systems that run
//! concurrently never write a column another one touches, so the retry path
//! is only taken by ad-hoc queries issued from user threads.
//!
//! ## Backoff
//!
//! | Attempt | Action |
//! |--------:|--------|
//! | `< SPIN_LIMIT` | `spin_loop` hint |
//! | otherwise | `yield_now` every attempt |

use std::hint;
use std::thread;

const SPIN_LIMIT: u32 = 64;

/// Spin/yield backoff state for one acquisition.
#[derive(Debug, Default)]
pub struct Backoff {
    attempts: u32,
}

impl Backoff {
    /// Fresh backoff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits before the next attempt.
    #[inline]
    pub fn snooze(&mut self) {
        if self.attempts < SPIN_LIMIT {
            for _ in 0..(1u32 << (self.attempts / 8).min(6)) {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Number of failed attempts so far.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Repeats `try_acquire` until it yields a value, backing off in between.
///
/// `try_acquire` must release everything it took before returning `None`.
pub fn acquire<T>(mut try_acquire: impl FnMut() -> Option<T>) -> T {
    let mut backoff = Backoff::new();
    loop {
        if let Some(acquired) = try_acquire() {
            return acquired;
        }
        backoff.snooze();
    }
}
