//! Station coordinates from a metadata CSV file.
//!
//! The CSV columns are mapped onto the canonical names by the same
//! longest-substring matching used for catalog ingestion. Coordinates are
//! keyed by the padded trace id (`@@` network form) so that empty network
//! codes survive the round trip.

use std::collections::HashMap;
use std::path::Path;

use log::warn;

use crate::catalog::event::float_or_none;
use crate::catalog::TraceId;
use crate::error::{Error, Result};
use crate::formulas::guess_field_names;
use crate::waveforms::provider::StationCoords;

/// Canonical column vocabulary for station metadata CSV files.
const FIELD_GUESSES: [(&str, &[&str]); 8] = [
    ("network", &["network", "net", "netw"]),
    ("station", &["station", "sta", "stat", "name"]),
    ("location", &["location", "loc", "locat"]),
    ("channel", &["channel", "chan", "ch"]),
    ("longitude", &["longitude", "lon", "long"]),
    ("latitude", &["latitude", "lat"]),
    ("elevation", &["elevation", "elev", "elevat"]),
    ("depth", &["depth", "dep"]),
];

/// Station coordinate table read from a metadata CSV file.
#[derive(Debug, Clone, Default)]
pub struct StationCsv {
    /// Coordinates keyed by padded trace id.
    coords: HashMap<String, StationCoords>,
}

impl StationCsv {
    /// Read a metadata CSV file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| Error::NoMetadata {
                reason: format!(
                    "unable to read station metadata from {}: {e}",
                    path.display()
                ),
            })?;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let fields = guess_field_names(&headers, &FIELD_GUESSES);
        let header_index: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), i))
            .collect();
        let get = |record: &csv::StringRecord, name: &str| -> Option<String> {
            fields
                .get(name)
                .and_then(|header| header_index.get(header))
                .and_then(|i| record.get(*i))
                .map(|v| v.to_string())
        };

        let mut coords = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let Some(station) = get(&record, "station").filter(|s| !s.is_empty()) else {
                warn!("station code is missing in metadata row, skipping");
                continue;
            };
            let network = get(&record, "network").unwrap_or_default();
            let location = get(&record, "location").unwrap_or_default();
            let channel = get(&record, "channel").unwrap_or_default();
            let id = TraceId::new(&network, &station, &location, &channel);
            let value = StationCoords {
                latitude: get(&record, "latitude")
                    .and_then(|v| float_or_none(&v))
                    .unwrap_or(0.0),
                longitude: get(&record, "longitude")
                    .and_then(|v| float_or_none(&v))
                    .unwrap_or(0.0),
                elevation: get(&record, "elevation")
                    .and_then(|v| float_or_none(&v))
                    .unwrap_or(0.0),
                depth: get(&record, "depth")
                    .and_then(|v| float_or_none(&v))
                    .unwrap_or(0.0),
            };
            coords.insert(id.padded(), value);
        }
        if coords.is_empty() {
            return Err(Error::NoMetadata {
                reason: format!("no usable station rows in {}", path.display()),
            });
        }
        Ok(Self { coords })
    }

    /// Resolve coordinates for a trace id.
    ///
    /// Tries the full id first, then the id with an empty channel code,
    /// then any channel of the same station.
    pub fn resolve(&self, id: &TraceId) -> Option<StationCoords> {
        if let Some(c) = self.coords.get(&id.padded()) {
            return Some(*c);
        }
        let no_chan = TraceId::new(&id.network, &id.station, &id.location, "");
        if let Some(c) = self.coords.get(&no_chan.padded()) {
            return Some(*c);
        }
        let prefix = format!(
            "{}.{}.{}.",
            if id.network.is_empty() { "@@" } else { &id.network },
            id.station,
            id.location
        );
        let mut keys: Vec<&String> = self
            .coords
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .collect();
        keys.sort();
        keys.first().map(|k| self.coords[*k])
    }
}
