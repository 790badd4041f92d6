//! # Log Audit
//!
//! Reads an activity log back and checks the properties every run must
//! satisfy regardless of scheduling:
//!
//! 1. Sequence numbers form `1..=K` with no gaps and no duplicates.
//! 2. Every molecule `n` has exactly three "creating molecule n" and three
//!    "molecule n created" lines, from one oxygen and two hydrogens, and the
//!    same three atoms on both sides.
//! 3. Molecule ordinals are contiguous from 1 and rounds do not interleave:
//!    all lines of molecule `n` precede the first line of molecule `n + 1`.
//! 4. Each atom's own lines follow started → going to queue → creating n →
//!    molecule n created (a blocked atom simply stops early).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use crate::atom::{Atom, Species};
use crate::event_log::{Event, UnknownEvent};

/// One parsed line of the activity log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Global sequence number.
    pub seq: u64,
    /// Atom that emitted the line.
    pub atom: Atom,
    /// What happened.
    pub event: Event,
}

/// What is wrong with a single log line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// Not of the form `<seq>: <atom>: <message>`.
    #[error("expected '<seq>: <atom>: <message>', got {0:?}")]
    Malformed(String),

    /// Sequence number is not an unsigned integer.
    #[error("bad sequence number {0:?}")]
    BadSequence(String),

    /// Atom is not `<species> <index>`.
    #[error("bad atom {0:?}")]
    BadAtom(String),

    /// Species symbol is neither `O` nor `H`.
    #[error("bad species {0:?}")]
    BadSpecies(String),

    /// Atom index is not an unsigned integer.
    #[error("bad atom index {0:?}")]
    BadIndex(String),

    /// Message is not one of the four events.
    #[error(transparent)]
    UnknownEvent(#[from] UnknownEvent),
}

/// Why a log could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {error}")]
pub struct ParseError {
    /// 1-based line number in the input.
    pub line: usize,
    /// What was wrong.
    #[source]
    pub error: LineError,
}

/// A broken invariant found in a log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A sequence number appears more than once.
    #[error("sequence number {0} appears more than once")]
    DuplicateSequence(u64),

    /// A sequence number between 1 and the maximum is missing.
    #[error("sequence number {0} is missing")]
    MissingSequence(u64),

    /// A molecule does not have exactly three lines of one kind.
    #[error("molecule {molecule}: {count} \"{kind}\" lines, expected 3")]
    WrongParticipantCount {
        /// Molecule ordinal.
        molecule: u64,
        /// "creating" or "created".
        kind: &'static str,
        /// Lines found.
        count: usize,
    },

    /// A molecule is not 1 oxygen + 2 hydrogens.
    #[error("molecule {molecule}: {oxygen} oxygen and {hydrogen} hydrogen participants")]
    WrongComposition {
        /// Molecule ordinal.
        molecule: u64,
        /// Oxygen participants.
        oxygen: usize,
        /// Hydrogen participants.
        hydrogen: usize,
    },

    /// Atoms that reported "created" are not the ones that were "creating".
    #[error("molecule {0}: created by different atoms than were creating it")]
    ParticipantMismatch(u64),

    /// Molecule ordinals skip a number.
    #[error("molecule {0} is missing")]
    MissingMolecule(u64),

    /// A line of a molecule appears before the previous molecule finished.
    #[error("molecule {later} starts before molecule {earlier} finished")]
    InterleavedMolecules {
        /// The molecule that should have finished first.
        earlier: u64,
        /// The molecule that started too early.
        later: u64,
    },

    /// An atom's lines are out of lifecycle order.
    #[error("{atom}: {event} out of order")]
    OutOfOrder {
        /// The offending atom.
        atom: Atom,
        /// The unexpected event.
        event: Event,
    },

    /// Fewer or more molecules than the run parameters allow.
    #[error("{actual} molecules, expected {expected}")]
    MoleculeCount {
        /// Molecules the parameters allow.
        expected: u64,
        /// Molecules in the log.
        actual: u64,
    },
}

/// Parses one log line: `<seq>: <species> <index>: <message>`.
///
/// # Errors
///
/// Returns the [`LineError`] describing the first malformed part.
pub fn parse_line(line: &str) -> Result<LogRecord, LineError> {
    let mut parts = line.splitn(3, ": ");
    let (Some(seq), Some(who), Some(message)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(LineError::Malformed(line.to_string()));
    };

    let seq = seq
        .trim()
        .parse()
        .map_err(|_| LineError::BadSequence(seq.to_string()))?;

    let (symbol, index) = who
        .split_once(' ')
        .ok_or_else(|| LineError::BadAtom(who.to_string()))?;
    let mut symbol_chars = symbol.chars();
    let species = match (symbol_chars.next(), symbol_chars.next()) {
        (Some(c), None) => Species::from_symbol(c),
        _ => None,
    }
    .ok_or_else(|| LineError::BadSpecies(symbol.to_string()))?;
    let index = index.parse().map_err(|_| LineError::BadIndex(index.to_string()))?;

    let event = message.parse()?;

    Ok(LogRecord {
        seq,
        atom: Atom::new(species, index),
        event,
    })
}

/// Lines of one molecule.
#[derive(Clone, Debug, Default)]
struct MoleculeLines {
    creating: Vec<Atom>,
    created: Vec<Atom>,
    first_seq: u64,
    last_seq: u64,
}

/// A parsed log ready to be checked.
#[derive(Clone, Debug)]
pub struct LogAudit {
    records: Vec<LogRecord>,
}

impl LogAudit {
    /// Parses a whole log.
    ///
    /// # Errors
    ///
    /// Returns the first malformed line.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let records = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| parse_line(line).map_err(|error| ParseError { line: i + 1, error }))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_records(records))
    }

    /// Wraps already parsed records.
    #[must_use]
    pub fn from_records(mut records: Vec<LogRecord>) -> Self {
        records.sort_by_key(|r| r.seq);
        Self { records }
    }

    /// Records in sequence order.
    #[must_use]
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Number of lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true for an empty log.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lines emitted by `species` with `event`.
    #[must_use]
    pub fn count(&self, species: Species, event: Event) -> usize {
        self.records
            .iter()
            .filter(|r| r.atom.species == species && r.event == event)
            .count()
    }

    /// Molecules for which all three "created" lines are present.
    #[must_use]
    pub fn completed_molecules(&self) -> u64 {
        let mut created: HashMap<u64, usize> = HashMap::new();
        for record in &self.records {
            if let Event::MoleculeCreated(n) = record.event {
                *created.entry(n).or_default() += 1;
            }
        }
        created.values().filter(|&&count| count == 3).count() as u64
    }

    /// Runs every check. An empty result means the log is valid.
    ///
    /// Pass `expected_molecules` to also check the molecule count.
    #[must_use]
    pub fn check(&self, expected_molecules: Option<u64>) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.check_sequence(&mut violations);
        self.check_molecules(&mut violations);
        self.check_lifecycles(&mut violations);

        if let Some(expected) = expected_molecules {
            let actual = self.completed_molecules();
            if actual != expected {
                violations.push(Violation::MoleculeCount { expected, actual });
            }
        }
        violations
    }

    fn check_sequence(&self, violations: &mut Vec<Violation>) {
        let mut expected = 1;
        let mut previous = None;

        for record in &self.records {
            if previous == Some(record.seq) {
                violations.push(Violation::DuplicateSequence(record.seq));
                continue;
            }
            while expected < record.seq {
                violations.push(Violation::MissingSequence(expected));
                expected += 1;
            }
            expected = record.seq + 1;
            previous = Some(record.seq);
        }
    }

    fn check_molecules(&self, violations: &mut Vec<Violation>) {
        let mut molecules: BTreeMap<u64, MoleculeLines> = BTreeMap::new();

        for record in &self.records {
            let Some(n) = record.event.molecule() else {
                continue;
            };
            let lines = molecules.entry(n).or_insert_with(|| MoleculeLines {
                first_seq: record.seq,
                ..MoleculeLines::default()
            });
            lines.last_seq = record.seq;
            match record.event {
                Event::CreatingMolecule(_) => lines.creating.push(record.atom),
                _ => lines.created.push(record.atom),
            }
        }

        let mut previous: Option<(u64, u64)> = None;
        let mut expected = 1;
        for (&n, lines) in &molecules {
            while expected < n {
                violations.push(Violation::MissingMolecule(expected));
                expected += 1;
            }
            expected = n + 1;

            for (kind, atoms) in [("creating", &lines.creating), ("created", &lines.created)] {
                if atoms.len() != 3 {
                    violations.push(Violation::WrongParticipantCount {
                        molecule: n,
                        kind,
                        count: atoms.len(),
                    });
                }
            }

            let oxygen = lines.creating.iter().filter(|a| a.species == Species::Oxygen).count();
            let hydrogen = lines.creating.len() - oxygen;
            if lines.creating.len() == 3 && (oxygen, hydrogen) != (1, 2) {
                violations.push(Violation::WrongComposition {
                    molecule: n,
                    oxygen,
                    hydrogen,
                });
            }

            let creating: BTreeSet<_> = lines.creating.iter().collect();
            let created: BTreeSet<_> = lines.created.iter().collect();
            if lines.created.len() == 3 && creating != created {
                violations.push(Violation::ParticipantMismatch(n));
            }

            if let Some((earlier, earlier_last)) = previous {
                if lines.first_seq < earlier_last {
                    violations.push(Violation::InterleavedMolecules { earlier, later: n });
                }
            }
            previous = Some((n, lines.last_seq));
        }
    }

    fn check_lifecycles(&self, violations: &mut Vec<Violation>) {
        let mut last: HashMap<Atom, Event> = HashMap::new();

        for record in &self.records {
            let in_order = match (last.get(&record.atom), record.event) {
                (None, Event::Started) => true,
                (Some(prev), next) => {
                    prev.stage() + 1 == next.stage()
                        && match (prev, next) {
                            (Event::CreatingMolecule(a), Event::MoleculeCreated(b)) => *a == b,
                            _ => true,
                        }
                }
                (None, _) => false,
            };

            if !in_order {
                violations.push(Violation::OutOfOrder {
                    atom: record.atom,
                    event: record.event,
                });
            }
            last.insert(record.atom, record.event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_A: &str = "\
1: O 1: started
2: H 1: started
3: H 2: started
4: H 1: going to queue
5: O 1: going to queue
6: H 2: going to queue
7: H 2: creating molecule 1
8: O 1: creating molecule 1
9: H 1: creating molecule 1
10: H 1: molecule 1 created
11: H 2: molecule 1 created
12: O 1: molecule 1 created
";

    #[test]
    fn test_parse_line() {
        let record = parse_line("42: H 7: creating molecule 3").unwrap();
        assert_eq!(record.seq, 42);
        assert_eq!(record.atom, Atom::hydrogen(7));
        assert_eq!(record.event, Event::CreatingMolecule(3));

        assert!(matches!(parse_line("42 H 7 started"), Err(LineError::Malformed(_))));
        assert!(matches!(parse_line("x: H 7: started"), Err(LineError::BadSequence(_))));
        assert!(matches!(parse_line("1: H7: started"), Err(LineError::BadAtom(_))));
        assert!(matches!(parse_line("1: N 7: started"), Err(LineError::BadSpecies(_))));
        assert!(matches!(parse_line("1: HH 7: started"), Err(LineError::BadSpecies(_))));
        assert!(matches!(parse_line("1: H seven: started"), Err(LineError::BadIndex(_))));
        assert!(matches!(parse_line("1: H 7: exploded"), Err(LineError::UnknownEvent(_))));
    }

    #[test]
    fn test_parse_error_names_the_line() {
        let text = SCENARIO_A.replace("7: H 2: creating molecule 1", "7: H 2: melting");
        let err = LogAudit::parse(&text).unwrap_err();
        assert_eq!(err.line, 7);
        assert!(matches!(err.error, LineError::UnknownEvent(_)));
    }

    #[test]
    fn test_valid_log_passes() {
        let audit = LogAudit::parse(SCENARIO_A).unwrap();
        assert_eq!(audit.len(), 12);
        assert_eq!(audit.completed_molecules(), 1);
        assert_eq!(audit.count(Species::Hydrogen, Event::Started), 2);
        assert!(audit.check(Some(1)).is_empty());
    }

    #[test]
    fn test_detects_sequence_gaps_and_duplicates() {
        let text = SCENARIO_A.replace("5: O 1", "6: O 1");
        let violations = LogAudit::parse(&text).unwrap().check(None);
        assert!(violations.contains(&Violation::DuplicateSequence(6)));

        let text = SCENARIO_A.replace("5: O 1", "13: O 1");
        let violations = LogAudit::parse(&text).unwrap().check(None);
        assert!(violations.contains(&Violation::MissingSequence(5)));
    }

    #[test]
    fn test_detects_wrong_composition() {
        let text = "\
1: H 1: started
2: H 2: started
3: H 3: started
4: H 1: going to queue
5: H 2: going to queue
6: H 3: going to queue
7: H 1: creating molecule 1
8: H 2: creating molecule 1
9: H 3: creating molecule 1
";
        let violations = LogAudit::parse(text).unwrap().check(None);
        assert!(violations.contains(&Violation::WrongComposition {
            molecule: 1,
            oxygen: 0,
            hydrogen: 3,
        }));
        assert!(violations.contains(&Violation::WrongParticipantCount {
            molecule: 1,
            kind: "created",
            count: 0,
        }));
    }

    #[test]
    fn test_detects_out_of_order_lifecycle() {
        let text = SCENARIO_A.replace("4: H 1: going to queue", "4: H 1: molecule 1 created");
        let violations = LogAudit::parse(&text).unwrap().check(None);
        assert!(violations.iter().any(
            |v| matches!(v, Violation::OutOfOrder { atom, .. } if *atom == Atom::hydrogen(1))
        ));
    }

    #[test]
    fn test_detects_interleaved_molecules() {
        let text = "\
1: O 1: creating molecule 1
2: H 1: creating molecule 1
3: O 2: creating molecule 2
4: H 2: creating molecule 1
";
        let violations = LogAudit::from_records(
            text.lines().map(|l| parse_line(l).unwrap()).collect(),
        )
        .check(None);
        assert!(violations.contains(&Violation::InterleavedMolecules { earlier: 1, later: 2 }));
    }

    #[test]
    fn test_reports_every_missing_molecule() {
        let mut records = Vec::new();
        let mut seq = 0;
        for n in [1, 4] {
            for atom in [Atom::oxygen(1), Atom::hydrogen(1), Atom::hydrogen(2)] {
                seq += 1;
                records.push(LogRecord {
                    seq,
                    atom,
                    event: Event::CreatingMolecule(n),
                });
            }
            for atom in [Atom::oxygen(1), Atom::hydrogen(1), Atom::hydrogen(2)] {
                seq += 1;
                records.push(LogRecord {
                    seq,
                    atom,
                    event: Event::MoleculeCreated(n),
                });
            }
        }

        let missing: Vec<_> = LogAudit::from_records(records)
            .check(None)
            .into_iter()
            .filter(|v| matches!(v, Violation::MissingMolecule(_)))
            .collect();
        assert_eq!(
            missing,
            vec![Violation::MissingMolecule(2), Violation::MissingMolecule(3)]
        );
    }

    #[test]
    fn test_reports_molecule_count() {
        let audit = LogAudit::parse(SCENARIO_A).unwrap();
        assert_eq!(
            audit.check(Some(2)),
            vec![Violation::MoleculeCount { expected: 2, actual: 1 }]
        );
    }
}
