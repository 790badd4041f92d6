//! # H2O Core
//!
//! Assembly of water molecules from independently arriving oxygen and
//! hydrogen atoms, one OS thread per atom.
//!
//! ## Guarantees
//!
//! 1. **Exactly 1 O + 2 H per molecule** - matching happens atomically under
//!    a single admission lock
//! 2. **One molecule at a time** - the atom completing a triplet holds the
//!    assembly latch until its molecule is done
//! 3. **Strictly ordered log** - every line gets the next sequence number
//!    under the log lock and is flushed before the lock is released
//!
//! ## Known Hazard
//!
//! An atom ratio that leaves surplus atoms blocks those atoms forever. This
//! is documented behavior. Set a stall timeout to have the supervisor abort
//! such a run instead.
//!
//! ## Example
//!
//! ```rust,no_run
//! use h2o_core::{EventLog, RunConfig, SimulationSettings, Supervisor};
//!
//! let config = RunConfig::new(2, 4, 100, 100)?;
//! let settings = SimulationSettings::default();
//! let log = EventLog::create(settings.output_path())?;
//!
//! let summary = Supervisor::new(config, &settings).run(log)?;
//! assert_eq!(summary.molecules, 2);
//! # Ok::<(), h2o_core::AssemblyError>(())
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod atom;
pub mod audit;
pub mod bond;
pub mod config;
pub mod error;
pub mod event_log;
pub mod shared_state;
pub mod supervisor;
pub mod sync;
pub mod worker;

pub use atom::{Atom, Species};
pub use audit::{parse_line, LineError, LogAudit, LogRecord, ParseError, Violation};
pub use bond::{BondCoordinator, RoundGuard, MOLECULE_SIZE};
pub use config::{RunConfig, SimulationSettings, DEFAULT_OUTPUT, MAX_DELAY_UNITS};
pub use error::{AssemblyError, AssemblyResult};
pub use event_log::{Event, EventLog, SharedBuffer};
pub use shared_state::{Admission, Partners, QueueCounts, SharedState};
pub use supervisor::{RunOutcome, RunSummary, Supervisor};
pub use sync::{Arrival, Rendezvous, Semaphore};
pub use worker::{AtomPhase, AtomWorker, Jitter};
