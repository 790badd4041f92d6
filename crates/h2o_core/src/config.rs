//! # Run Configuration
//!
//! Two layers:
//!
//! - [`RunConfig`]: the four validated run parameters (NO, NH, TI, TB).
//! - [`SimulationSettings`]: everything else (output path, seed, stall
//!   timeout, jitter time unit), optionally loaded once from a TOML file.
//!
//! ```toml
//! output = "proj2.out"
//! seed = 42
//! stall_timeout_ms = 5000
//! time_unit_us = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::atom::Species;
use crate::error::{AssemblyError, AssemblyResult};

/// Largest accepted jitter bound (TI and TB).
pub const MAX_DELAY_UNITS: u64 = 1000;

/// Default output file name.
pub const DEFAULT_OUTPUT: &str = "proj2.out";

/// Default jitter unit: one millisecond.
pub const DEFAULT_TIME_UNIT_US: u64 = 1000;

/// Validated run parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of oxygen atoms (NO).
    pub oxygen: u32,
    /// Number of hydrogen atoms (NH).
    pub hydrogen: u32,
    /// Maximum arrival jitter in time units (TI).
    pub max_arrival_delay: u64,
    /// Maximum bonding jitter in time units (TB).
    pub max_bond_delay: u64,
}

impl RunConfig {
    /// Validates and builds a run configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidArgument`] if a count is not positive
    /// or a delay bound lies outside `[0, 1000]`.
    pub fn new(
        oxygen: i64,
        hydrogen: i64,
        max_arrival_delay: i64,
        max_bond_delay: i64,
    ) -> AssemblyResult<Self> {
        Ok(Self {
            oxygen: Self::count("NO", oxygen)?,
            hydrogen: Self::count("NH", hydrogen)?,
            max_arrival_delay: Self::delay("TI", max_arrival_delay)?,
            max_bond_delay: Self::delay("TB", max_bond_delay)?,
        })
    }

    fn count(name: &'static str, value: i64) -> AssemblyResult<u32> {
        if value <= 0 {
            return Err(AssemblyError::invalid(
                name,
                format!("must be greater than 0, got {value}"),
            ));
        }
        u32::try_from(value)
            .map_err(|_| AssemblyError::invalid(name, format!("too large: {value}")))
    }

    fn delay(name: &'static str, value: i64) -> AssemblyResult<u64> {
        match u64::try_from(value) {
            Ok(v) if v <= MAX_DELAY_UNITS => Ok(v),
            _ => Err(AssemblyError::invalid(
                name,
                format!("must be within [0, {MAX_DELAY_UNITS}], got {value}"),
            )),
        }
    }

    /// Number of atoms of `species`.
    #[inline]
    #[must_use]
    pub const fn count_of(&self, species: Species) -> u32 {
        match species {
            Species::Oxygen => self.oxygen,
            Species::Hydrogen => self.hydrogen,
        }
    }

    /// Total number of atoms (and worker threads).
    #[inline]
    #[must_use]
    pub const fn total_atoms(&self) -> usize {
        self.oxygen as usize + self.hydrogen as usize
    }

    /// Molecules the run can produce: `min(NO, NH / 2)`.
    #[inline]
    #[must_use]
    pub fn expected_molecules(&self) -> u64 {
        u64::from(self.oxygen.min(self.hydrogen / 2))
    }

    /// Atoms that will end up in a molecule.
    #[inline]
    #[must_use]
    pub fn expected_bonded_atoms(&self) -> u64 {
        self.expected_molecules() * 3
    }

    /// Atoms that will never find partners and block forever.
    #[inline]
    #[must_use]
    pub fn surplus_atoms(&self) -> u64 {
        self.total_atoms() as u64 - self.expected_bonded_atoms()
    }
}

/// Settings that do not change the protocol, only how a run is hosted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationSettings {
    /// Activity log destination. Defaults to [`DEFAULT_OUTPUT`].
    pub output: Option<PathBuf>,
    /// Seed for the jitter generators. Time-derived when absent.
    pub seed: Option<u64>,
    /// Abort the run when no worker finishes for this long.
    /// Absent means wait forever.
    pub stall_timeout_ms: Option<u64>,
    /// Length of one jitter unit in microseconds.
    /// Defaults to [`DEFAULT_TIME_UNIT_US`].
    pub time_unit_us: Option<u64>,
}

impl SimulationSettings {
    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Config`] on malformed input or unknown keys.
    pub fn from_toml_str(text: &str) -> AssemblyResult<Self> {
        toml::from_str(text).map_err(|e| AssemblyError::Config(e.to_string()))
    }

    /// Loads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> AssemblyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AssemblyError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Output path, falling back to [`DEFAULT_OUTPUT`].
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
    }

    /// Stall timeout as a duration.
    #[must_use]
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }

    /// Length of one jitter unit.
    #[must_use]
    pub fn time_unit(&self) -> Duration {
        Duration::from_micros(self.time_unit_us.unwrap_or(DEFAULT_TIME_UNIT_US))
    }

    /// The configured seed, or one derived from the clock.
    #[must_use]
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64)
        })
    }
}
