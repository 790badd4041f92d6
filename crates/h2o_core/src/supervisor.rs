//! # Supervisor
//!
//! Spawns one thread per atom, collects their completion reports and joins
//! them.
//!
//! ## Architecture
//!
//! ```text
//!   Supervisor ──spawn──► O 1 .. O NO, H 1 .. H NH
//!       ▲                        │
//!       └──── WorkerReport ◄─────┘   (crossbeam channel, one per worker)
//! ```
//!
//! Every worker owns a [`ReportGuard`] that sends its report when dropped,
//! so a panicking worker still reports and the supervisor never waits on a
//! thread that is already gone.
//!
//! Workers wait on a start gate until every thread has been spawned, so a
//! spawn failure aborts the run before any atom logs a line.
//!
//! Without a stall timeout a mismatched atom ratio blocks forever. With one,
//! the supervisor aborts the shared state once a whole timeout window passes
//! with no report and no new log line, and returns [`RunOutcome::Stalled`].

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::atom::{Atom, Species};
use crate::config::{RunConfig, SimulationSettings};
use crate::error::{AssemblyError, AssemblyResult};
use crate::event_log::EventLog;
use crate::shared_state::SharedState;
use crate::sync::Semaphore;
use crate::worker::AtomWorker;

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every worker reached DONE.
    Completed,
    /// The stall timeout fired; `blocked` workers had to be aborted.
    Stalled {
        /// Workers still blocked when the run was aborted.
        blocked: usize,
    },
}

/// Result of a finished run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Molecules bonded.
    pub molecules: u64,
    /// Lines written to the activity log.
    pub lines: u64,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

/// Body of one worker thread.
type Work = Box<dyn FnOnce() + Send + 'static>;

/// Final word from one worker thread.
#[derive(Debug)]
struct WorkerReport {
    atom: Atom,
    result: AssemblyResult<()>,
}

/// Sends the worker's report on drop, panics included.
struct ReportGuard {
    atom: Atom,
    result: Option<AssemblyResult<()>>,
    reports: Sender<WorkerReport>,
}

impl Drop for ReportGuard {
    fn drop(&mut self) {
        let result = self.result.take().unwrap_or(Err(AssemblyError::WorkerPanicked {
            species: self.atom.species,
            index: self.atom.index,
        }));
        // The supervisor outlives every worker; a closed channel means it is unwinding
        let _ = self.reports.send(WorkerReport {
            atom: self.atom,
            result,
        });
    }
}

/// Runs one simulation from spawn to join.
#[derive(Clone, Debug)]
pub struct Supervisor {
    config: RunConfig,
    seed: u64,
    time_unit: Duration,
    stall_timeout: Option<Duration>,
}

impl Supervisor {
    /// Creates a supervisor for `config`.
    #[must_use]
    pub fn new(config: RunConfig, settings: &SimulationSettings) -> Self {
        Self {
            config,
            seed: settings.resolve_seed(),
            time_unit: settings.time_unit(),
            stall_timeout: settings.stall_timeout(),
        }
    }

    /// Overrides the stall timeout.
    #[must_use]
    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Seed used for the jitter generators.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs every worker against `log` and waits for all of them.
    ///
    /// # Errors
    ///
    /// - [`AssemblyError::ResourceInit`] if a worker thread cannot be spawned.
    ///   No worker runs in that case; threads already spawned are joined.
    /// - The first fatal worker error (log write failure, panic). The run is
    ///   aborted so the other workers unblock before this returns.
    pub fn run(&self, log: EventLog) -> AssemblyResult<RunSummary> {
        self.run_with(log, |builder, work| builder.spawn(work))
    }

    fn run_with<S>(&self, log: EventLog, mut spawn: S) -> AssemblyResult<RunSummary>
    where
        S: FnMut(thread::Builder, Work) -> io::Result<JoinHandle<()>>,
    {
        let started = Instant::now();
        let state = Arc::new(SharedState::new(self.config, log));
        let gate = Arc::new(Semaphore::new(0));
        let (reports_tx, reports_rx) = unbounded();

        tracing::info!(
            oxygen = self.config.oxygen,
            hydrogen = self.config.hydrogen,
            expected_molecules = self.config.expected_molecules(),
            seed = self.seed,
            "starting assembly"
        );

        let mut handles = Vec::with_capacity(self.config.total_atoms());
        if let Err(e) = self.spawn_all(&state, &gate, &reports_tx, &mut handles, &mut spawn) {
            // Nobody has passed the gate yet
            gate.close();
            state.abort();
            for handle in handles {
                let _ = handle.join();
            }
            return Err(e);
        }
        drop(reports_tx);
        gate.release(handles.len());

        let collected = self.collect(&state, &reports_rx, handles.len());

        for handle in handles {
            // Panics are already reported through the guard
            let _ = handle.join();
        }
        let (outcome, first_error) = collected;

        state.log().flush()?;
        if let Some(e) = first_error {
            return Err(e);
        }

        let summary = RunSummary {
            outcome,
            molecules: state.molecules_done(),
            lines: state.log().len(),
            elapsed: started.elapsed(),
        };
        tracing::info!(?summary, "assembly finished");
        Ok(summary)
    }

    fn spawn_all<S>(
        &self,
        state: &Arc<SharedState>,
        gate: &Arc<Semaphore>,
        reports: &Sender<WorkerReport>,
        handles: &mut Vec<JoinHandle<()>>,
        spawn: &mut S,
    ) -> AssemblyResult<()>
    where
        S: FnMut(thread::Builder, Work) -> io::Result<JoinHandle<()>>,
    {
        for species in Species::ALL {
            for index in 1..=self.config.count_of(species) {
                let atom = Atom::new(species, index);
                let worker = AtomWorker::new(atom, Arc::clone(state), self.seed, self.time_unit);
                let gate = Arc::clone(gate);
                let reports = reports.clone();

                let builder =
                    thread::Builder::new().name(format!("{}{}", species.symbol(), index));
                let handle = spawn(
                    builder,
                    Box::new(move || {
                        let mut guard = ReportGuard {
                            atom,
                            result: None,
                            reports,
                        };
                        guard.result = Some(gate.acquire().and_then(|()| worker.run()));
                    }),
                )
                .map_err(|e| AssemblyError::ResourceInit(format!("failed to spawn {atom}: {e}")))?;

                handles.push(handle);
            }
        }

        Ok(())
    }

    /// Drains one report per worker. Returns the outcome and the first
    /// fatal error, if any.
    fn collect(
        &self,
        state: &SharedState,
        reports: &Receiver<WorkerReport>,
        workers: usize,
    ) -> (RunOutcome, Option<AssemblyError>) {
        let mut outcome = RunOutcome::Completed;
        let mut first_error = None;
        let mut aborted = 0;
        let mut progress = state.log().len();

        for _ in 0..workers {
            let Some(report) = self.next_report(state, reports, &mut progress) else {
                break;
            };

            match report.result {
                Ok(()) => tracing::debug!(atom = %report.atom, "worker done"),
                Err(AssemblyError::Aborted) => aborted += 1,
                Err(e) => {
                    tracing::error!(atom = %report.atom, error = %e, "worker failed");
                    state.abort();
                    first_error.get_or_insert(e);
                }
            }
        }

        if aborted > 0 && first_error.is_none() {
            outcome = RunOutcome::Stalled { blocked: aborted };
        }
        (outcome, first_error)
    }

    /// Waits for the next report. A stall is a whole window with neither a
    /// report nor a new log line; it aborts the run.
    fn next_report(
        &self,
        state: &SharedState,
        reports: &Receiver<WorkerReport>,
        progress: &mut u64,
    ) -> Option<WorkerReport> {
        loop {
            let window = match self.stall_window() {
                Some(window) if !state.is_aborted() => window,
                _ => return reports.recv().ok(),
            };

            match reports.recv_timeout(window) {
                Ok(report) => return Some(report),
                Err(RecvTimeoutError::Disconnected) => return None,
                Err(RecvTimeoutError::Timeout) => {
                    let lines = state.log().len();
                    if lines != *progress {
                        *progress = lines;
                        continue;
                    }
                    tracing::warn!(?window, lines, "no progress within the stall timeout");
                    state.abort();
                }
            }
        }
    }

    /// Stall timeout, never shorter than the longest jitter sleep.
    fn stall_window(&self) -> Option<Duration> {
        let longest = self.config.max_arrival_delay.max(self.config.max_bond_delay);
        let sleep = self
            .time_unit
            .saturating_mul(u32::try_from(longest).unwrap_or(u32::MAX));
        self.stall_timeout.map(|timeout| timeout.max(sleep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::SharedBuffer;

    fn settings(stall_ms: Option<u64>) -> SimulationSettings {
        SimulationSettings {
            seed: Some(11),
            stall_timeout_ms: stall_ms,
            time_unit_us: Some(10),
            ..SimulationSettings::default()
        }
    }

    #[test]
    fn test_balanced_run_completes() {
        let config = RunConfig::new(3, 6, 5, 5).unwrap();
        let buffer = SharedBuffer::new();

        let summary = Supervisor::new(config, &settings(None))
            .run(EventLog::in_memory(&buffer))
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.molecules, 3);
        // 4 lines per atom
        assert_eq!(summary.lines, 36);
        assert_eq!(buffer.lines().len(), 36);
    }

    #[test]
    fn test_surplus_stalls_and_aborts() {
        let config = RunConfig::new(2, 2, 0, 0).unwrap();
        let buffer = SharedBuffer::new();

        let summary = Supervisor::new(config, &settings(Some(200)))
            .run(EventLog::in_memory(&buffer))
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Stalled { blocked: 1 });
        assert_eq!(summary.molecules, 1);
    }

    #[test]
    fn test_stall_timeout_tolerates_slow_progress() {
        // 8 serialised rounds of up to 40 ms each outlast the 100 ms window
        let config = RunConfig::new(8, 16, 0, 40).unwrap();
        let settings = SimulationSettings {
            seed: Some(3),
            stall_timeout_ms: Some(100),
            ..SimulationSettings::default()
        };
        let buffer = SharedBuffer::new();

        let summary = Supervisor::new(config, &settings)
            .run(EventLog::in_memory(&buffer))
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.molecules, 8);
        assert_eq!(summary.lines, 96);
    }

    #[test]
    fn test_stall_window_covers_longest_sleep() {
        let config = RunConfig::new(1, 2, 20, 500).unwrap();
        let settings = SimulationSettings {
            stall_timeout_ms: Some(100),
            ..SimulationSettings::default()
        };

        let supervisor = Supervisor::new(config, &settings);
        assert_eq!(supervisor.stall_window(), Some(Duration::from_millis(500)));

        let supervisor = supervisor.with_stall_timeout(Some(Duration::from_secs(2)));
        assert_eq!(supervisor.stall_window(), Some(Duration::from_secs(2)));

        assert_eq!(supervisor.with_stall_timeout(None).stall_window(), None);
    }

    #[test]
    fn test_spawn_failure_runs_no_worker() {
        let config = RunConfig::new(2, 4, 0, 0).unwrap();
        let buffer = SharedBuffer::new();
        let mut spawned = 0;

        let err = Supervisor::new(config, &settings(None))
            .run_with(EventLog::in_memory(&buffer), |builder, work| {
                if spawned == 3 {
                    return Err(io::Error::new(io::ErrorKind::Other, "thread limit"));
                }
                spawned += 1;
                builder.spawn(work)
            })
            .unwrap_err();

        assert!(matches!(err, AssemblyError::ResourceInit(_)), "{err}");
        // The three spawned workers were held at the gate and joined
        assert!(buffer.lines().is_empty());
    }

    #[test]
    fn test_seed_is_taken_from_settings() {
        let config = RunConfig::new(1, 2, 0, 0).unwrap();
        let supervisor = Supervisor::new(config, &settings(None));
        assert_eq!(supervisor.seed(), 11);
    }
}
