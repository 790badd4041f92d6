//! # Shared State
//!
//! Everything the workers share lives in one explicitly owned value,
//! handed to each worker as an `Arc<SharedState>`. No process-wide globals.
//!
//! ## Lock domains
//!
//! ```text
//! admission lock ── waiting_H, waiting_O           (matching decision)
//! barrier locks  ── in_bond, molecules_done, ...    (BondCoordinator)
//! log lock       ── log_seq                         (EventLog)
//! ```
//!
//! The admission lock is held only for the counter check-and-update. It is
//! never held across a blocking wait and never nested with a barrier lock.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::atom::{Atom, Species};
use crate::bond::BondCoordinator;
use crate::config::RunConfig;
use crate::error::AssemblyResult;
use crate::event_log::{Event, EventLog};
use crate::sync::Semaphore;

/// Atoms counted as waiting for partners.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Hydrogens admitted but not yet matched.
    pub waiting_hydrogen: u32,
    /// Oxygens admitted but not yet matched.
    pub waiting_oxygen: u32,
}

/// Waiting atoms an admission pulls into its triplet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partners {
    /// Oxygen permits to release.
    pub oxygen: usize,
    /// Hydrogen permits to release.
    pub hydrogen: usize,
}

/// Outcome of an admission decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// This atom completed a triplet; it must wake `Partners`.
    Matched(Partners),
    /// This atom was counted as waiting and must block for a permit.
    Queued,
}

/// State shared by all workers of one run.
pub struct SharedState {
    config: RunConfig,
    log: EventLog,
    admission: Mutex<QueueCounts>,
    oxygen_queue: Semaphore,
    hydrogen_queue: Semaphore,
    bond: BondCoordinator,
    aborted: AtomicBool,
}

impl SharedState {
    /// Builds the shared state. Must exist before any worker starts.
    #[must_use]
    pub fn new(config: RunConfig, log: EventLog) -> Self {
        Self {
            config,
            log,
            admission: Mutex::new(QueueCounts::default()),
            oxygen_queue: Semaphore::new(0),
            hydrogen_queue: Semaphore::new(0),
            bond: BondCoordinator::new(config.expected_molecules()),
            aborted: AtomicBool::new(false),
        }
    }

    /// Run parameters.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The activity log.
    #[inline]
    #[must_use]
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// The bond coordinator.
    #[inline]
    #[must_use]
    pub fn bond(&self) -> &BondCoordinator {
        &self.bond
    }

    /// Admission decision for an oxygen.
    ///
    /// Two waiting hydrogens complete a triplet; otherwise the oxygen waits.
    pub fn admit_oxygen(&self) -> Admission {
        let mut queue = self.admission.lock();

        if queue.waiting_hydrogen >= 2 {
            queue.waiting_hydrogen -= 2;
            Admission::Matched(Partners {
                oxygen: 0,
                hydrogen: 2,
            })
        } else {
            queue.waiting_oxygen += 1;
            Admission::Queued
        }
    }

    /// Admission decision for a hydrogen.
    ///
    /// One waiting hydrogen plus one waiting oxygen complete a triplet;
    /// otherwise the hydrogen waits.
    pub fn admit_hydrogen(&self) -> Admission {
        let mut queue = self.admission.lock();

        if queue.waiting_hydrogen >= 1 && queue.waiting_oxygen > 0 {
            queue.waiting_hydrogen -= 1;
            queue.waiting_oxygen -= 1;
            Admission::Matched(Partners {
                oxygen: 1,
                hydrogen: 1,
            })
        } else {
            queue.waiting_hydrogen += 1;
            Admission::Queued
        }
    }

    /// Admission decision for `species`.
    pub fn admit(&self, species: Species) -> Admission {
        match species {
            Species::Oxygen => self.admit_oxygen(),
            Species::Hydrogen => self.admit_hydrogen(),
        }
    }

    /// Wakes the partners a trigger pulled into its triplet.
    ///
    /// Only call while holding the round latch.
    pub fn release_partners(&self, partners: Partners) {
        self.oxygen_queue.release(partners.oxygen);
        self.hydrogen_queue.release(partners.hydrogen);
    }

    /// Blocks a queued atom until a trigger wakes it.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Aborted`](crate::AssemblyError::Aborted) if the run is aborted.
    pub fn wait_for_partners(&self, species: Species) -> AssemblyResult<()> {
        match species {
            Species::Oxygen => self.oxygen_queue.acquire(),
            Species::Hydrogen => self.hydrogen_queue.acquire(),
        }
    }

    /// Phase 1 of bonding: logs "creating molecule n" and waits for the
    /// other two participants. Returns `n`.
    ///
    /// # Errors
    ///
    /// Fails on a log write error or when the run is aborted.
    pub fn enter_bond_phase(&self, atom: Atom) -> AssemblyResult<u64> {
        let molecule = self.bond.upcoming_molecule();
        self.log.append(atom, Event::CreatingMolecule(molecule))?;
        self.bond.assemble()?;
        Ok(molecule)
    }

    /// Phase 2 of bonding: waits for all three participants to finish.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Aborted`](crate::AssemblyError::Aborted) if the run is aborted.
    pub fn enter_finish_phase(&self) -> AssemblyResult<()> {
        self.bond.complete().map(|_| ())
    }

    /// Blocks until every expected molecule has been bonded.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Aborted`](crate::AssemblyError::Aborted) if the run is aborted.
    pub fn await_shutdown(&self) -> AssemblyResult<()> {
        self.bond.await_shutdown()
    }

    /// Snapshot of the waiting counters.
    #[must_use]
    pub fn queue_counts(&self) -> QueueCounts {
        *self.admission.lock()
    }

    /// Molecules fully bonded so far.
    #[must_use]
    pub fn molecules_done(&self) -> u64 {
        self.bond.molecules_done()
    }

    /// Cancels every blocking wait. Blocked workers return
    /// [`AssemblyError::Aborted`](crate::AssemblyError::Aborted).
    pub fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(
            molecules = self.molecules_done(),
            queued = ?self.queue_counts(),
            "aborting assembly"
        );
        self.oxygen_queue.close();
        self.hydrogen_queue.close();
        self.bond.close();
    }

    /// Returns true once [`abort`](Self::abort) has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("config", &self.config)
            .field("queue", &self.queue_counts())
            .field("bond", &self.bond)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::SharedBuffer;

    fn state(oxygen: i64, hydrogen: i64) -> SharedState {
        let config = RunConfig::new(oxygen, hydrogen, 0, 0).unwrap();
        SharedState::new(config, EventLog::in_memory(&SharedBuffer::new()))
    }

    #[test]
    fn test_hydrogen_completes_triplet() {
        let state = state(1, 2);

        assert_eq!(state.admit_oxygen(), Admission::Queued);
        assert_eq!(state.admit_hydrogen(), Admission::Queued);
        assert_eq!(
            state.admit_hydrogen(),
            Admission::Matched(Partners { oxygen: 1, hydrogen: 1 })
        );
        assert_eq!(state.queue_counts(), QueueCounts::default());
    }

    #[test]
    fn test_oxygen_completes_triplet() {
        let state = state(1, 2);

        assert_eq!(state.admit_hydrogen(), Admission::Queued);
        assert_eq!(state.admit_hydrogen(), Admission::Queued);
        assert_eq!(
            state.admit_oxygen(),
            Admission::Matched(Partners { oxygen: 0, hydrogen: 2 })
        );
        // Matched hydrogens are no longer counted as waiting
        assert_eq!(state.queue_counts(), QueueCounts::default());
    }

    #[test]
    fn test_lone_species_keep_queueing() {
        let state = state(3, 1);

        for _ in 0..3 {
            assert_eq!(state.admit_oxygen(), Admission::Queued);
        }
        assert_eq!(state.admit_hydrogen(), Admission::Queued);
        assert_eq!(
            state.queue_counts(),
            QueueCounts {
                waiting_hydrogen: 1,
                waiting_oxygen: 3,
            }
        );
    }

    #[test]
    fn test_never_waits_with_a_full_triplet() {
        // Greedy matching: after every admission at least one species is short
        let state = state(40, 80);
        let arrivals = "HOHHHOOHHOHOOOHHHHHHOOOHHHOHOHHOHHHHOO";

        for symbol in arrivals.chars() {
            let species = Species::from_symbol(symbol).unwrap();
            let _ = state.admit(species);
            let q = state.queue_counts();
            assert!(!(q.waiting_oxygen >= 1 && q.waiting_hydrogen >= 2), "{q:?}");
        }
    }

    #[test]
    fn test_release_partners_grants_permits() {
        let state = state(1, 2);
        state.release_partners(Partners { oxygen: 1, hydrogen: 2 });

        state.wait_for_partners(Species::Oxygen).unwrap();
        state.wait_for_partners(Species::Hydrogen).unwrap();
        state.wait_for_partners(Species::Hydrogen).unwrap();
    }

    #[test]
    fn test_abort_cancels_queues() {
        let state = state(1, 2);
        state.abort();
        assert!(state.is_aborted());
        assert!(state.wait_for_partners(Species::Oxygen).is_err());
        assert!(state.wait_for_partners(Species::Hydrogen).is_err());
        assert!(state.bond().open_round().is_err());
    }
}
