//! # Counting Semaphore
//!
//! Mutex-guarded permit counter with a condition variable. Release order is
//! whatever the condition variable picks; there is no FIFO guarantee.

use parking_lot::{Condvar, Mutex};

use crate::error::{AssemblyError, AssemblyResult};

struct Permits {
    available: usize,
    closed: bool,
}

/// Counting semaphore that can be closed to cancel all waiters.
pub struct Semaphore {
    permits: Mutex<Permits>,
    granted: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(Permits {
                available: permits,
                closed: false,
            }),
            granted: Condvar::new(),
        }
    }

    /// Takes one permit, blocking until one is available.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Aborted`] if the semaphore is closed before
    /// or while waiting.
    pub fn acquire(&self) -> AssemblyResult<()> {
        let mut permits = self.permits.lock();
        loop {
            if permits.closed {
                return Err(AssemblyError::Aborted);
            }
            if permits.available > 0 {
                permits.available -= 1;
                return Ok(());
            }
            self.granted.wait(&mut permits);
        }
    }

    /// Takes one permit if one is available right now.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if permits.closed || permits.available == 0 {
            return false;
        }
        permits.available -= 1;
        true
    }

    /// Adds `count` permits, waking up to `count` waiters.
    pub fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut permits = self.permits.lock();
        permits.available += count;
        drop(permits);

        for _ in 0..count {
            if !self.granted.notify_one() {
                break;
            }
        }
    }

    /// Permits currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.lock().available
    }

    /// Closes the semaphore. Every current and future `acquire` fails.
    pub fn close(&self) {
        self.permits.lock().closed = true;
        self.granted.notify_all();
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.permits.lock().closed
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let permits = self.permits.lock();
        f.debug_struct("Semaphore")
            .field("available", &permits.available)
            .field("closed", &permits.closed)
            .finish()
    }
}
