//! Catalog container and FDSN-text file I/O.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::catalog::Event;
use crate::error::Result;

/// An ordered sequence of events.
///
/// The catalog is persisted as an FDSN text file: one event per line,
/// `#`-prefixed comments and blank lines skipped. At write time the catalog
/// is deduplicated on `(evid, trace_id)` and sorted by origin time, so that
/// a read-back always observes the canonical form.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    events: Vec<Event>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove duplicate events, keeping the first occurrence.
    ///
    /// Duplicates are defined by event equality, i.e. `(evid, trace_id)`.
    pub fn deduplicate(&mut self) {
        let mut seen = HashSet::new();
        self.events.retain(|ev| {
            let key = (ev.evid.clone(), ev.trace_id.clone());
            seen.insert(key)
        });
    }

    /// Sort events by origin time (stable).
    pub fn sort(&mut self) {
        self.events.sort_by_key(|ev| ev.orig_time);
    }

    /// Read a catalog from an FDSN text file, appending to `self`.
    pub fn read(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let fp = BufReader::new(File::open(path)?);
        for line in fp.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            self.events.push(Event::from_fdsn_text(trimmed)?);
        }
        self.deduplicate();
        Ok(())
    }

    /// Write the catalog in FDSN text format.
    ///
    /// The output is deduplicated and time-sorted; `self` is not modified.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut canonical = self.clone();
        canonical.deduplicate();
        canonical.sort();
        let mut fp = BufWriter::new(File::create(path)?);
        for ev in canonical.iter() {
            writeln!(fp, "{}", ev.fdsn_text())?;
        }
        fp.flush()?;
        Ok(())
    }
}

impl Deref for Catalog {
    type Target = Vec<Event>;

    fn deref(&self) -> &Self::Target {
        &self.events
    }
}

impl DerefMut for Catalog {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.events
    }
}

impl FromIterator<Event> for Catalog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}
