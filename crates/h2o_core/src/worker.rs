//! # Atom Worker
//!
//! One OS thread per atom. Each worker walks the same state machine:
//!
//! ```text
//! STARTED ──► QUEUED ──┬─► MATCHED ──┬─► BONDING ──► DONE
//!                      └─► WAITING ──┘
//! ```
//!
//! - STARTED: log "started", sleep arrival jitter.
//! - QUEUED: log "going to queue", take the admission decision.
//! - MATCHED: this atom completed a triplet. Claim the round latch, wake
//!   the partners.
//! - WAITING: block on the species' wait queue until a trigger wakes us.
//! - BONDING: sleep bond jitter, log "creating molecule n", assembly
//!   barrier, log "molecule n created", completion barrier.
//! - DONE: wait for the last expected molecule, then exit.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::atom::Atom;
use crate::error::AssemblyResult;
use crate::event_log::Event;
use crate::shared_state::{Admission, SharedState};

/// Lifecycle phase of an atom.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomPhase {
    /// Worker spawned, arrival jitter pending.
    Started,
    /// Taking the admission decision.
    Queued,
    /// Completed a triplet on admission.
    Matched,
    /// Blocked until a trigger releases it.
    Waiting,
    /// Inside the bond coordinator.
    Bonding,
    /// Finished.
    Done,
}

/// Uniform random delay in `[0, max_units]` time units.
#[derive(Clone, Debug)]
pub struct Jitter {
    max_units: u64,
    unit: Duration,
}

impl Jitter {
    /// Creates a jitter source. `max_units == 0` never sleeps.
    #[must_use]
    pub const fn new(max_units: u64, unit: Duration) -> Self {
        Self { max_units, unit }
    }

    /// Draws one delay.
    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        if self.max_units == 0 {
            return Duration::ZERO;
        }
        let units = rng.gen_range(0..=self.max_units);
        self.unit.saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
    }

    /// Draws one delay and sleeps for it.
    pub fn sleep(&self, rng: &mut impl Rng) {
        let delay = self.sample(rng);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Drives one atom from arrival to DONE.
pub struct AtomWorker {
    atom: Atom,
    state: Arc<SharedState>,
    arrival: Jitter,
    bonding: Jitter,
    rng: ChaCha8Rng,
    phase: AtomPhase,
}

impl AtomWorker {
    /// Creates a worker whose jitter stream is derived from `seed` and the
    /// atom's identity.
    #[must_use]
    pub fn new(atom: Atom, state: Arc<SharedState>, seed: u64, unit: Duration) -> Self {
        let config = *state.config();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(atom.stream_id());

        Self {
            atom,
            state,
            arrival: Jitter::new(config.max_arrival_delay, unit),
            bonding: Jitter::new(config.max_bond_delay, unit),
            rng,
            phase: AtomPhase::Started,
        }
    }

    /// The atom this worker drives.
    #[inline]
    #[must_use]
    pub fn atom(&self) -> Atom {
        self.atom
    }

    /// Current lifecycle phase.
    #[inline]
    #[must_use]
    pub fn phase(&self) -> AtomPhase {
        self.phase
    }

    fn enter(&mut self, phase: AtomPhase) {
        tracing::trace!(atom = %self.atom, from = ?self.phase, to = ?phase, "phase");
        self.phase = phase;
    }

    /// Runs the whole protocol for this atom.
    ///
    /// # Errors
    ///
    /// Fails on a log write error, or with
    /// [`AssemblyError::Aborted`](crate::AssemblyError::Aborted) when the
    /// run is cancelled while this atom is blocked.
    pub fn run(mut self) -> AssemblyResult<()> {
        let atom = self.atom;
        let state = Arc::clone(&self.state);

        state.log().append(atom, Event::Started)?;
        self.arrival.sleep(&mut self.rng);

        self.enter(AtomPhase::Queued);
        state.log().append(atom, Event::GoingToQueue)?;

        let round = match state.admit(atom.species) {
            Admission::Matched(partners) => {
                self.enter(AtomPhase::Matched);
                let guard = state.bond().open_round()?;
                tracing::debug!(%atom, ?partners, "triplet matched, releasing partners");
                state.release_partners(partners);
                Some(guard)
            }
            Admission::Queued => {
                self.enter(AtomPhase::Waiting);
                state.wait_for_partners(atom.species)?;
                None
            }
        };

        self.enter(AtomPhase::Bonding);
        self.bonding.sleep(&mut self.rng);
        let molecule = state.enter_bond_phase(atom)?;
        state.log().append(atom, Event::MoleculeCreated(molecule))?;
        state.enter_finish_phase()?;

        // Free the latch before the shutdown wait; later triplets need it
        drop(round);
        state.await_shutdown()?;

        self.enter(AtomPhase::Done);
        Ok(())
    }
}

impl std::fmt::Debug for AtomWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomWorker")
            .field("atom", &self.atom)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::event_log::{EventLog, SharedBuffer};

    #[test]
    fn test_jitter_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let jitter = Jitter::new(5, Duration::from_micros(10));

        for _ in 0..1000 {
            let delay = jitter.sample(&mut rng);
            assert!(delay <= Duration::from_micros(50));
            assert_eq!(delay.as_micros() % 10, 0);
        }

        let none = Jitter::new(0, Duration::from_secs(1));
        assert_eq!(none.sample(&mut rng), Duration::ZERO);
    }

    #[test]
    fn test_jitter_streams_are_per_atom() {
        let config = RunConfig::new(1, 2, 1000, 1000).unwrap();
        let state = Arc::new(SharedState::new(config, EventLog::in_memory(&SharedBuffer::new())));
        let unit = Duration::from_micros(1);

        let mut a = AtomWorker::new(Atom::hydrogen(1), Arc::clone(&state), 99, unit);
        let mut b = AtomWorker::new(Atom::hydrogen(2), Arc::clone(&state), 99, unit);
        let mut a_again = AtomWorker::new(Atom::hydrogen(1), state, 99, unit);

        let draw = |w: &mut AtomWorker| -> Vec<Duration> {
            (0..8).map(|_| w.arrival.sample(&mut w.rng)).collect()
        };

        let first = draw(&mut a);
        assert_eq!(first, draw(&mut a_again));
        assert_ne!(first, draw(&mut b));
    }

    #[test]
    fn test_single_triplet_runs_to_done() {
        let config = RunConfig::new(1, 2, 0, 0).unwrap();
        let buffer = SharedBuffer::new();
        let state = Arc::new(SharedState::new(config, EventLog::in_memory(&buffer)));

        let atoms = [Atom::hydrogen(1), Atom::oxygen(1), Atom::hydrogen(2)];
        let handles: Vec<_> = atoms
            .into_iter()
            .map(|atom| {
                let worker = AtomWorker::new(atom, Arc::clone(&state), 0, Duration::from_micros(1));
                assert_eq!(worker.phase(), AtomPhase::Started);
                thread::spawn(move || worker.run())
            })
            .collect();

        for h in handles {
            h.join().unwrap().unwrap();
        }

        assert_eq!(state.molecules_done(), 1);
        assert_eq!(buffer.lines().len(), 12);
        assert_eq!(
            buffer.contents().matches("creating molecule 1").count(),
            3
        );
        assert_eq!(buffer.contents().matches("molecule 1 created").count(), 3);
    }
}
