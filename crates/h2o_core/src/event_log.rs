//! # Event Log
//!
//! **One ordered sink for every worker.**
//!
//! Each call to [`EventLog::append`] takes the log lock, assigns the next
//! sequence number, writes exactly one line and flushes before releasing the
//! lock. Nothing is buffered across lines.
//!
//! ## Format
//!
//! ```text
//! <seq>: <species> <index>: <message>
//!
//! 1: O 1: started
//! 2: H 1: started
//! 3: H 1: going to queue
//! 4: O 1: creating molecule 1
//! ```
//!
//! Line order equals lock-acquisition order. Each atom's own lines follow its
//! causal order; lines of different atoms interleave freely.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::atom::Atom;
use crate::error::{AssemblyError, AssemblyResult};

/// Something an atom reports during its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// Worker spawned.
    Started,
    /// About to take the admission lock.
    GoingToQueue,
    /// Entered the assembly rendezvous for molecule `n`.
    CreatingMolecule(u64),
    /// Passed the assembly rendezvous for molecule `n`.
    MoleculeCreated(u64),
}

impl Event {
    /// Molecule ordinal carried by the event, if any.
    #[must_use]
    pub const fn molecule(self) -> Option<u64> {
        match self {
            Self::CreatingMolecule(n) | Self::MoleculeCreated(n) => Some(n),
            Self::Started | Self::GoingToQueue => None,
        }
    }

    /// Position of the event in an atom's lifecycle (0-based).
    #[must_use]
    pub const fn stage(self) -> u8 {
        match self {
            Self::Started => 0,
            Self::GoingToQueue => 1,
            Self::CreatingMolecule(_) => 2,
            Self::MoleculeCreated(_) => 3,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("started"),
            Self::GoingToQueue => f.write_str("going to queue"),
            Self::CreatingMolecule(n) => write!(f, "creating molecule {n}"),
            Self::MoleculeCreated(n) => write!(f, "molecule {n} created"),
        }
    }
}

/// Error returned when a log message is not one of the known events.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("unknown event message: {0:?}")]
pub struct UnknownEvent(pub String);

impl FromStr for Event {
    type Err = UnknownEvent;

    fn from_str(message: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownEvent(message.to_string());

        match message {
            "started" => return Ok(Self::Started),
            "going to queue" => return Ok(Self::GoingToQueue),
            _ => {}
        }

        if let Some(n) = message.strip_prefix("creating molecule ") {
            return n.parse().map(Self::CreatingMolecule).map_err(|_| unknown());
        }

        message
            .strip_prefix("molecule ")
            .and_then(|rest| rest.strip_suffix(" created"))
            .and_then(|n| n.parse().ok())
            .map(Self::MoleculeCreated)
            .ok_or_else(unknown)
    }
}

/// The writer plus the sequence counter it guards.
struct LogSink {
    /// Last sequence number written (0 = nothing yet).
    seq: u64,
    writer: Box<dyn Write + Send>,
}

/// Strictly ordered activity log shared by all workers.
pub struct EventLog {
    sink: Mutex<LogSink>,
}

impl EventLog {
    /// Creates a log over any writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(LogSink {
                seq: 0,
                writer: Box::new(writer),
            }),
        }
    }

    /// Creates (truncating) the file at `path` and logs into it.
    pub fn create(path: impl AsRef<Path>) -> AssemblyResult<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            AssemblyError::ResourceInit(format!("failed to open {}: {e}", path.display()))
        })?;
        Ok(Self::new(BufWriter::new(file)))
    }

    /// Creates a log that captures into `buffer`.
    #[must_use]
    pub fn in_memory(buffer: &SharedBuffer) -> Self {
        Self::new(buffer.clone())
    }

    /// Appends one line for `atom` and returns its sequence number.
    ///
    /// The sequence number is only consumed once the line has been written
    /// and flushed, so the numbers on the sink stay contiguous.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::LogWrite`] if the sink rejects the line.
    pub fn append(&self, atom: Atom, event: Event) -> AssemblyResult<u64> {
        let mut sink = self.sink.lock();
        let seq = sink.seq + 1;

        writeln!(sink.writer, "{seq}: {atom}: {event}")?;
        sink.writer.flush()?;

        sink.seq = seq;
        Ok(seq)
    }

    /// Number of lines written so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.sink.lock().seq
    }

    /// Returns true if nothing has been logged yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes the underlying writer.
    pub fn flush(&self) -> AssemblyResult<()> {
        self.sink.lock().writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog").field("lines", &self.len()).finish()
    }
}

/// Cloneable in-memory sink. All clones share the same bytes.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the captured output out as text.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    /// Captured output split into lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_line_format() {
        let buffer = SharedBuffer::new();
        let log = EventLog::in_memory(&buffer);

        log.append(Atom::oxygen(1), Event::Started).unwrap();
        log.append(Atom::hydrogen(2), Event::GoingToQueue).unwrap();
        log.append(Atom::hydrogen(2), Event::CreatingMolecule(1)).unwrap();
        log.append(Atom::oxygen(1), Event::MoleculeCreated(1)).unwrap();

        assert_eq!(
            buffer.lines(),
            vec![
                "1: O 1: started",
                "2: H 2: going to queue",
                "3: H 2: creating molecule 1",
                "4: O 1: molecule 1 created",
            ]
        );
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_event_parse() {
        for event in [
            Event::Started,
            Event::GoingToQueue,
            Event::CreatingMolecule(17),
            Event::MoleculeCreated(3),
        ] {
            assert_eq!(event.to_string().parse::<Event>(), Ok(event));
        }
        assert!("molecule x created".parse::<Event>().is_err());
        assert!("creating molecule".parse::<Event>().is_err());
        assert!("finished".parse::<Event>().is_err());
    }

    #[test]
    fn test_sequence_contiguous_across_threads() {
        let buffer = SharedBuffer::new();
        let log = Arc::new(EventLog::in_memory(&buffer));

        let handles: Vec<_> = (1..=8)
            .map(|i| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for _ in 0..250 {
                        log.append(Atom::hydrogen(i), Event::Started).unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let seqs: Vec<u64> = buffer
            .lines()
            .iter()
            .map(|line| line.split(':').next().unwrap().parse().unwrap())
            .collect();

        // Lines hit the sink in lock order, so they are already sorted
        assert_eq!(seqs, (1..=2000).collect::<Vec<_>>());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let log = EventLog::new(BrokenPipe);
        let err = log.append(Atom::oxygen(1), Event::Started).unwrap_err();
        assert!(matches!(err, AssemblyError::LogWrite(_)));
        // A failed line does not consume a sequence number
        assert!(log.is_empty());
    }
}
