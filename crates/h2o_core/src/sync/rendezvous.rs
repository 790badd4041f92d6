//! # Rendezvous Barrier
//!
//! A reusable barrier with reset. `capacity` participants arrive; the one
//! that brings the count to `capacity` runs the round's closing action,
//! resets the count to zero, bumps the generation and releases everyone.
//!
//! ```text
//!   arrive ─► count 1 ─┐
//!   arrive ─► count 2 ─┼─ wait for generation to change
//!   arrive ─► count 3 ─┘─► on_full(), count = 0, generation += 1, wake all
//! ```
//!
//! Waiters key on the generation rather than the count, so a fast thread
//! that arrives for the next round can never consume a wake-up meant for the
//! previous one.

use parking_lot::{Condvar, Mutex};

use crate::error::{AssemblyError, AssemblyResult};

struct Round {
    arrived: usize,
    generation: u64,
    closed: bool,
}

/// What a participant learns when the barrier releases it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arrival {
    /// Round this participant belonged to (0-based).
    pub generation: u64,
    /// True for the participant that completed the round.
    pub leader: bool,
}

/// Reusable barrier for a fixed number of participants.
pub struct Rendezvous {
    capacity: usize,
    round: Mutex<Round>,
    released: Condvar,
}

impl Rendezvous {
    /// Creates a barrier that releases every `capacity` arrivals.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Rendezvous capacity must be greater than zero");

        Self {
            capacity,
            round: Mutex::new(Round {
                arrived: 0,
                generation: 0,
                closed: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Number of participants per round.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Participants currently waiting in the open round.
    #[must_use]
    pub fn arrived(&self) -> usize {
        self.round.lock().arrived
    }

    /// Rounds completed so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.round.lock().generation
    }

    /// Arrives and blocks until the round is full.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Aborted`] if the barrier is closed.
    pub fn wait(&self) -> AssemblyResult<Arrival> {
        self.arrive_and_wait(|| {})
    }

    /// Arrives and blocks until the round is full.
    ///
    /// `on_full` runs exactly once per round, on the completing thread, while
    /// the barrier lock is still held and before anyone is released.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Aborted`] if the barrier is closed.
    pub fn arrive_and_wait<F: FnOnce()>(&self, on_full: F) -> AssemblyResult<Arrival> {
        let mut round = self.round.lock();
        if round.closed {
            return Err(AssemblyError::Aborted);
        }

        let generation = round.generation;
        round.arrived += 1;

        if round.arrived == self.capacity {
            on_full();
            round.arrived = 0;
            round.generation += 1;
            drop(round);
            self.released.notify_all();
            return Ok(Arrival {
                generation,
                leader: true,
            });
        }

        while round.generation == generation {
            if round.closed {
                return Err(AssemblyError::Aborted);
            }
            self.released.wait(&mut round);
        }

        Ok(Arrival {
            generation,
            leader: false,
        })
    }

    /// Closes the barrier and wakes every waiter with an error.
    pub fn close(&self) {
        self.round.lock().closed = true;
        self.released.notify_all();
    }
}

impl std::fmt::Debug for Rendezvous {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let round = self.round.lock();
        f.debug_struct("Rendezvous")
            .field("capacity", &self.capacity)
            .field("arrived", &round.arrived)
            .field("generation", &round.generation)
            .field("closed", &round.closed)
            .finish()
    }
}
