//! # H2O
//!
//! Simulates water molecule assembly: one thread per oxygen and hydrogen
//! atom, one ordered activity log.
//!
//! ```bash
//! # 3 oxygens, 6 hydrogens, up to 100 ms arrival jitter, up to 50 ms bonding jitter
//! ./h2o 3 6 100 50
//!
//! # Give up when nothing finishes for 2 s, then audit the log
//! ./h2o 2 1 0 0 --stall-timeout-ms 2000 --verify
//!
//! # Diagnostics go to stderr
//! RUST_LOG=h2o_core=debug ./h2o 1 2 0 0
//! ```
//!
//! Exit code 0 after all workers finish, 1 on invalid input or any failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use h2o_core::{
    AssemblyError, AssemblyResult, EventLog, LogAudit, RunConfig, RunOutcome, SimulationSettings,
    Supervisor, Violation,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Water molecule assembly simulator.
#[derive(Parser, Debug)]
#[command(name = "h2o", version, about, allow_negative_numbers = true)]
struct Cli {
    /// Number of oxygen atoms (NO > 0)
    oxygen: i64,

    /// Number of hydrogen atoms (NH > 0)
    hydrogen: i64,

    /// Maximum arrival jitter in ms (0 <= TI <= 1000)
    max_arrival_delay: i64,

    /// Maximum bonding jitter in ms (0 <= TB <= 1000)
    max_bond_delay: i64,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Activity log destination (default: proj2.out)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Seed for the jitter generators
    #[arg(long)]
    seed: Option<u64>,

    /// Abort when no atom finishes for this many milliseconds
    #[arg(long)]
    stall_timeout_ms: Option<u64>,

    /// Audit the activity log after the run
    #[arg(long)]
    verify: bool,
}

impl Cli {
    /// Settings file first, command line flags on top.
    fn settings(&self) -> AssemblyResult<SimulationSettings> {
        let mut settings = match &self.config {
            Some(path) => SimulationSettings::load(path)?,
            None => SimulationSettings::default(),
        };

        if let Some(output) = &self.output {
            settings.output = Some(output.clone());
        }
        if self.seed.is_some() {
            settings.seed = self.seed;
        }
        if self.stall_timeout_ms.is_some() {
            settings.stall_timeout_ms = self.stall_timeout_ms;
        }
        Ok(settings)
    }

    fn run_config(&self) -> AssemblyResult<RunConfig> {
        RunConfig::new(
            self.oxygen,
            self.hydrogen,
            self.max_arrival_delay,
            self.max_bond_delay,
        )
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// How a run that got as far as the supervisor ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Completed,
    Stalled,
    Violations,
}

/// Process exit code: 0 only for a completed run, 1 for everything else.
fn exit_code(result: &AssemblyResult<Status>) -> u8 {
    match result {
        Ok(Status::Completed) => 0,
        Ok(Status::Stalled | Status::Violations) | Err(_) => 1,
    }
}

fn run(cli: &Cli) -> AssemblyResult<Status> {
    let config = cli.run_config()?;
    let settings = cli.settings()?;
    let output = settings.output_path();

    let log = EventLog::create(&output)?;
    let summary = Supervisor::new(config, &settings).run(log)?;

    tracing::info!(
        molecules = summary.molecules,
        lines = summary.lines,
        elapsed = ?summary.elapsed,
        output = %output.display(),
        "run complete"
    );

    let mut status = Status::Completed;

    if let RunOutcome::Stalled { blocked } = summary.outcome {
        eprintln!(
            "Stalled: {blocked} atom(s) never found partners ({} molecule(s) created)",
            summary.molecules
        );
        status = Status::Stalled;
    }

    if cli.verify {
        let violations = verify(&output, config.expected_molecules())?;
        for violation in &violations {
            eprintln!("Violation: {violation}");
        }
        if !violations.is_empty() {
            status = Status::Violations;
        }
    }

    Ok(status)
}

/// Audits the log at `path`.
fn verify(path: &Path, expected_molecules: u64) -> AssemblyResult<Vec<Violation>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AssemblyError::Config(format!("failed to read back {}: {e}", path.display()))
    })?;
    let audit = LogAudit::parse(&text).map_err(|e| AssemblyError::Config(e.to_string()))?;

    let violations = audit.check(Some(expected_molecules));
    if violations.is_empty() {
        eprintln!(
            "Verified: {} lines, {} molecule(s)",
            audit.len(),
            audit.completed_molecules()
        );
    }
    Ok(violations)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => {
            // --help / --version
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    init_tracing();

    let result = run(&cli);
    if let Err(e) = &result {
        eprintln!("Error: {e}");
    }
    ExitCode::from(exit_code(&result))
}
