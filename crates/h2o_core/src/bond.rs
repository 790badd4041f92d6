//! # Bond Coordinator
//!
//! Runs one molecule at a time through two rendezvous-of-three:
//!
//! ```text
//!              ┌──────────── assembly latch (1 permit) ────────────┐
//!   trigger ──►│ release partners ─► ASSEMBLY (3) ─► COMPLETION (3) │──► release latch
//!   partner ──►│                   ─► ASSEMBLY (3) ─► COMPLETION (3) │
//!   partner ──►│                   ─► ASSEMBLY (3) ─► COMPLETION (3) │
//!              └───────────────────────────────────────────────────┘
//!                                                     │
//!                         leader: molecules_done += 1, bonded_atoms += 3
//!                         every bondable atom done: open shutdown turnstile
//! ```
//!
//! The atom whose admission completed a triplet is the *trigger*. It holds
//! the assembly latch from before its partners are woken until it has passed
//! the completion barrier, so a fourth atom can never join a round already
//! underway and two rounds never share a barrier generation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AssemblyResult;
use crate::sync::{Arrival, Rendezvous, Semaphore};

/// Atoms per molecule.
pub const MOLECULE_SIZE: usize = 3;

/// Proof that the holder owns the running assembly round.
///
/// Dropping the guard frees the latch for the next triplet.
#[must_use = "dropping the guard ends the assembly round"]
pub struct RoundGuard<'a> {
    latch: &'a Semaphore,
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.latch.release(1);
    }
}

/// Coordinates the bonding of each triplet.
pub struct BondCoordinator {
    /// "Assembly in progress" latch.
    latch: Semaphore,
    /// Phase 1: all three participants are present.
    assembly: Rendezvous,
    /// Phase 2: all three participants have reported the molecule.
    completion: Rendezvous,
    /// Opens once the last expected molecule is done.
    shutdown: Semaphore,
    /// Only mutated by the completion leader, under the barrier lock.
    molecules_done: AtomicU64,
    /// Only mutated by the completion leader, under the barrier lock.
    bonded_atoms: AtomicU64,
    expected_molecules: u64,
}

impl BondCoordinator {
    /// Creates a coordinator for a run producing `expected_molecules`.
    #[must_use]
    pub fn new(expected_molecules: u64) -> Self {
        Self {
            latch: Semaphore::new(1),
            assembly: Rendezvous::new(MOLECULE_SIZE),
            completion: Rendezvous::new(MOLECULE_SIZE),
            shutdown: Semaphore::new(0),
            molecules_done: AtomicU64::new(0),
            bonded_atoms: AtomicU64::new(0),
            expected_molecules,
        }
    }

    /// Claims the assembly latch for a freshly matched triplet.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Aborted`](crate::AssemblyError::Aborted) if
    /// the run is aborted while waiting.
    pub fn open_round(&self) -> AssemblyResult<RoundGuard<'_>> {
        self.latch.acquire()?;
        Ok(RoundGuard { latch: &self.latch })
    }

    /// Ordinal of the molecule currently being assembled.
    #[inline]
    #[must_use]
    pub fn upcoming_molecule(&self) -> u64 {
        self.molecules_done.load(Ordering::Acquire) + 1
    }

    /// Phase 1: blocks until all three participants are present.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Aborted`](crate::AssemblyError::Aborted) if the run is aborted.
    pub fn assemble(&self) -> AssemblyResult<Arrival> {
        self.assembly.wait()
    }

    /// Phase 2: blocks until all three participants have finished.
    ///
    /// The participant completing the round counts the molecule and its
    /// atoms. Once every atom that can bond is done, it opens the shutdown
    /// turnstile.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Aborted`](crate::AssemblyError::Aborted) if the run is aborted.
    pub fn complete(&self) -> AssemblyResult<Arrival> {
        self.completion.arrive_and_wait(|| {
            let done = self.molecules_done.fetch_add(1, Ordering::AcqRel) + 1;
            let bonded = self.bonded_atoms.fetch_add(MOLECULE_SIZE as u64, Ordering::AcqRel)
                + MOLECULE_SIZE as u64;
            tracing::debug!(molecule = done, bonded, "molecule complete");

            if bonded == self.expected_bonded_atoms() {
                tracing::debug!(molecules = done, bonded, "every bondable atom is done");
                self.shutdown.release(1);
            }
        })
    }

    /// Blocks until every expected molecule is done.
    ///
    /// Turnstile: each passer re-releases the single permit for the next.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Aborted`](crate::AssemblyError::Aborted) if the run is aborted.
    pub fn await_shutdown(&self) -> AssemblyResult<()> {
        self.shutdown.acquire()?;
        self.shutdown.release(1);
        Ok(())
    }

    /// Molecules fully bonded so far.
    #[inline]
    #[must_use]
    pub fn molecules_done(&self) -> u64 {
        self.molecules_done.load(Ordering::Acquire)
    }

    /// Atoms that have passed the completion barrier.
    #[inline]
    #[must_use]
    pub fn bonded_atoms(&self) -> u64 {
        self.bonded_atoms.load(Ordering::Acquire)
    }

    /// Molecules this run is expected to produce.
    #[inline]
    #[must_use]
    pub fn expected_molecules(&self) -> u64 {
        self.expected_molecules
    }

    /// Atoms that end up in a molecule.
    #[inline]
    #[must_use]
    pub fn expected_bonded_atoms(&self) -> u64 {
        self.expected_molecules * MOLECULE_SIZE as u64
    }

    /// Participants waiting in the assembly barrier right now.
    #[must_use]
    pub fn in_bond(&self) -> usize {
        self.assembly.arrived()
    }

    /// Cancels every wait inside the coordinator.
    pub fn close(&self) {
        self.latch.close();
        self.assembly.close();
        self.completion.close();
        self.shutdown.close();
    }
}

impl std::fmt::Debug for BondCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BondCoordinator")
            .field("molecules_done", &self.molecules_done())
            .field("expected_molecules", &self.expected_molecules)
            .field("in_bond", &self.in_bond())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssemblyError;
    use std::sync::Arc;
    use std::thread;

    fn run_round(bond: &Arc<BondCoordinator>) -> Vec<(Arrival, Arrival)> {
        let guard = bond.open_round().unwrap();

        let partners: Vec<_> = (0..2)
            .map(|_| {
                let bond = Arc::clone(bond);
                thread::spawn(move || (bond.assemble().unwrap(), bond.complete().unwrap()))
            })
            .collect();

        let mine = (bond.assemble().unwrap(), bond.complete().unwrap());
        drop(guard);

        let mut all: Vec<_> = partners.into_iter().map(|h| h.join().unwrap()).collect();
        all.push(mine);
        all
    }

    #[test]
    fn test_round_counts_one_molecule() {
        let bond = Arc::new(BondCoordinator::new(2));
        assert_eq!(bond.upcoming_molecule(), 1);

        let arrivals = run_round(&bond);
        assert_eq!(arrivals.iter().filter(|(_, done)| done.leader).count(), 1);
        assert_eq!(bond.molecules_done(), 1);
        assert_eq!(bond.bonded_atoms(), 3);
        assert_eq!(bond.upcoming_molecule(), 2);
        assert_eq!(bond.in_bond(), 0);
    }

    #[test]
    fn test_shutdown_opens_after_last_molecule() {
        let bond = Arc::new(BondCoordinator::new(2));

        run_round(&bond);
        assert_eq!(bond.bonded_atoms(), 3);
        assert_eq!(bond.shutdown.available(), 0);

        run_round(&bond);
        assert_eq!(bond.molecules_done(), 2);
        assert_eq!(bond.bonded_atoms(), bond.expected_bonded_atoms());

        // Turnstile: any number of atoms pass and the permit stays
        for _ in 0..6 {
            bond.await_shutdown().unwrap();
        }
        assert_eq!(bond.shutdown.available(), 1);
    }

    #[test]
    fn test_latch_is_exclusive() {
        let bond = BondCoordinator::new(1);
        let guard = bond.open_round().unwrap();
        assert!(!bond.latch.try_acquire());
        drop(guard);
        assert!(bond.latch.try_acquire());
    }

    #[test]
    fn test_close_cancels_waiters() {
        let bond = Arc::new(BondCoordinator::new(1));

        let waiter = {
            let bond = Arc::clone(&bond);
            thread::spawn(move || bond.await_shutdown())
        };

        bond.close();
        assert!(matches!(waiter.join().unwrap(), Err(AssemblyError::Aborted)));
        assert!(bond.open_round().is_err());
    }
}
