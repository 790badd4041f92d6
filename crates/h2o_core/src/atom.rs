//! # Atoms
//!
//! An atom is one arrival event: a species plus its 1-based index within
//! that species. Atoms are created when their worker is spawned and never
//! change.

use std::fmt;

/// Atom species.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Species {
    /// Oxygen - one per molecule.
    Oxygen,
    /// Hydrogen - two per molecule.
    Hydrogen,
}

impl Species {
    /// Both species, oxygen first.
    pub const ALL: [Species; 2] = [Species::Oxygen, Species::Hydrogen];

    /// The single character used in the activity log.
    #[inline]
    #[must_use]
    pub const fn symbol(self) -> char {
        match self {
            Self::Oxygen => 'O',
            Self::Hydrogen => 'H',
        }
    }

    /// Parses a log symbol back into a species.
    #[must_use]
    pub const fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            'O' => Some(Self::Oxygen),
            'H' => Some(Self::Hydrogen),
            _ => None,
        }
    }

    /// How many atoms of this species one molecule consumes.
    #[inline]
    #[must_use]
    pub const fn per_molecule(self) -> u32 {
        match self {
            Self::Oxygen => 1,
            Self::Hydrogen => 2,
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// One simulated atom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom {
    /// Species of the atom.
    pub species: Species,
    /// 1-based index within the species.
    pub index: u32,
}

impl Atom {
    /// Creates an atom.
    #[inline]
    #[must_use]
    pub const fn new(species: Species, index: u32) -> Self {
        Self { species, index }
    }

    /// Creates oxygen number `index`.
    #[inline]
    #[must_use]
    pub const fn oxygen(index: u32) -> Self {
        Self::new(Species::Oxygen, index)
    }

    /// Creates hydrogen number `index`.
    #[inline]
    #[must_use]
    pub const fn hydrogen(index: u32) -> Self {
        Self::new(Species::Hydrogen, index)
    }

    /// Stream id used to give every atom its own jitter sequence.
    #[inline]
    #[must_use]
    pub(crate) const fn stream_id(self) -> u64 {
        let tag: u64 = match self.species {
            Species::Oxygen => 0,
            Species::Hydrogen => 1,
        };
        (tag << 32) | self.index as u64
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.species, self.index)
    }
}
