//! Event-pair records and the pair stream CSV.
//!
//! One row per processed pair, written as the catalog scan advances and
//! read back by the family builder, which rebuilds the event dictionary
//! and the symmetric correlation maps from the rows.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use chrono::SecondsFormat;
use serde::Deserialize;

use crate::catalog::{parse_utc_datetime, Event, TraceId};
use crate::error::{Error, Result};
use crate::signal::CcResult;
use crate::waveforms::EventStats;

/// Column order of the pair stream CSV.
const PAIR_FIELDS: [&str; 18] = [
    "evid1",
    "evid2",
    "trace_id",
    "orig_time1",
    "lon1",
    "lat1",
    "depth_km1",
    "mag_type1",
    "mag1",
    "orig_time2",
    "lon2",
    "lat2",
    "depth_km2",
    "mag_type2",
    "mag2",
    "lag_samples",
    "lag_sec",
    "cc_max",
];

/// A pair of events with their lag-optimized correlation.
#[derive(Debug, Clone)]
pub struct PairRecord {
    pub event1: Event,
    pub event2: Event,
    pub trace_id: TraceId,
    pub lag_samples: i64,
    pub lag_sec: f64,
    pub cc_max: f64,
}

/// Streaming writer for the pair CSV.
///
/// Rows are flushed as they are written so that an aborted run leaves a
/// parseable file.
pub struct PairWriter {
    writer: csv::Writer<File>,
}

impl PairWriter {
    /// Create the output file and write the header row.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(PAIR_FIELDS)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    /// Append one pair row and flush it.
    pub fn write_pair(
        &mut self,
        stats1: &EventStats,
        stats2: &EventStats,
        trace_id: &TraceId,
        cc: &CcResult,
    ) -> Result<()> {
        let opt_num = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        let time = |t: chrono::DateTime<chrono::Utc>| t.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.writer.write_record([
            stats1.evid.clone(),
            stats2.evid.clone(),
            trace_id.to_string(),
            time(stats1.orig_time),
            opt_num(stats1.ev_lon),
            opt_num(stats1.ev_lat),
            stats1.ev_depth.to_string(),
            stats1.mag_type.clone().unwrap_or_default(),
            opt_num(stats1.mag),
            time(stats2.orig_time),
            opt_num(stats2.ev_lon),
            opt_num(stats2.ev_lat),
            stats2.ev_depth.to_string(),
            stats2.mag_type.clone().unwrap_or_default(),
            opt_num(stats2.mag),
            cc.lag.to_string(),
            cc.lag_sec.to_string(),
            cc.cc_max.to_string(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }

    /// Flush any buffered output (rows are already flushed one by one).
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Raw CSV row of the pair stream.
#[derive(Debug, Deserialize)]
struct PairRow {
    evid1: String,
    evid2: String,
    trace_id: String,
    orig_time1: String,
    lon1: Option<f64>,
    lat1: Option<f64>,
    depth_km1: Option<f64>,
    mag_type1: Option<String>,
    mag1: Option<f64>,
    orig_time2: String,
    lon2: Option<f64>,
    lat2: Option<f64>,
    depth_km2: Option<f64>,
    mag_type2: Option<String>,
    mag2: Option<f64>,
    lag_samples: f64,
    lag_sec: f64,
    cc_max: f64,
}

impl PairRow {
    fn into_record(self) -> Result<PairRecord> {
        let trace_id: TraceId = self.trace_id.parse()?;
        let mut event1 = Event::new(self.evid1, parse_utc_datetime(&self.orig_time1)?);
        event1.lon = self.lon1;
        event1.lat = self.lat1;
        event1.depth = self.depth_km1;
        event1.mag_type = self.mag_type1;
        event1.mag = self.mag1;
        event1.trace_id = Some(trace_id.clone());
        let mut event2 = Event::new(self.evid2, parse_utc_datetime(&self.orig_time2)?);
        event2.lon = self.lon2;
        event2.lat = self.lat2;
        event2.depth = self.depth_km2;
        event2.mag_type = self.mag_type2;
        event2.mag = self.mag2;
        event2.trace_id = Some(trace_id.clone());
        Ok(PairRecord {
            event1,
            event2,
            trace_id,
            lag_samples: self.lag_samples.round() as i64,
            lag_sec: self.lag_sec,
            cc_max: self.cc_max,
        })
    }
}

/// Read the pair stream back into records.
pub fn read_pairs(path: impl AsRef<Path>) -> Result<Vec<PairRecord>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        Error::parse(format!(
            "unable to read event pairs file {}: {e}",
            path.display()
        ))
    })?;
    let mut pairs = Vec::new();
    for row in reader.deserialize() {
        let row: PairRow = row?;
        pairs.push(row.into_record()?);
    }
    Ok(pairs)
}

/// An event together with its correlation map, keyed by the other evid.
#[derive(Debug, Clone)]
pub struct PairEvent {
    pub event: Event,
    pub correlations: BTreeMap<String, f64>,
}

/// Rebuild the event dictionary from the pair stream.
///
/// Events are deduplicated on evid and the correlation maps are populated
/// symmetrically; the returned map iterates in sorted-evid order, which
/// fixes the clustering order for reproducible runs.
pub fn read_events_from_pairs(path: impl AsRef<Path>) -> Result<BTreeMap<String, PairEvent>> {
    let mut events: BTreeMap<String, PairEvent> = BTreeMap::new();
    for pair in read_pairs(path)? {
        let cc = pair.cc_max;
        let evid1 = pair.event1.evid.clone();
        let evid2 = pair.event2.evid.clone();
        events
            .entry(evid1.clone())
            .or_insert_with(|| PairEvent {
                event: pair.event1,
                correlations: BTreeMap::new(),
            })
            .correlations
            .insert(evid2.clone(), cc);
        events
            .entry(evid2)
            .or_insert_with(|| PairEvent {
                event: pair.event2,
                correlations: BTreeMap::new(),
            })
            .correlations
            .insert(evid1, cc);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveforms::provider::StationCoords;

    fn stats(evid: &str, time: &str, mag: Option<f64>) -> EventStats {
        EventStats {
            evid: evid.to_string(),
            orig_time: parse_utc_datetime(time).unwrap(),
            ev_lat: Some(42.9),
            ev_lon: Some(12.8),
            ev_depth: 8.0,
            mag,
            mag_type: mag.map(|_| "ML".to_string()),
            station: StationCoords {
                latitude: 43.0,
                longitude: 12.9,
                elevation: 0.0,
                depth: 0.0,
            },
            distance_km: 15.0,
            distance_deg: 0.135,
            p_arrival_time: parse_utc_datetime(time).unwrap(),
            s_arrival_time: parse_utc_datetime(time).unwrap(),
        }
    }

    #[test]
    fn test_pair_stream_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        let id: TraceId = "IV.MMN..EHZ".parse().unwrap();
        let mut writer = PairWriter::create(&path).unwrap();
        writer
            .write_pair(
                &stats("e1", "2021-01-01T00:00:00", Some(2.1)),
                &stats("e2", "2021-02-01T00:00:00", None),
                &id,
                &CcResult {
                    lag: 17,
                    lag_sec: 0.17,
                    cc_max: 0.987654321,
                },
            )
            .unwrap();
        writer.flush().unwrap();

        let pairs = read_pairs(&path).unwrap();
        assert_eq!(pairs.len(), 1);
        let p = &pairs[0];
        assert_eq!(p.event1.evid, "e1");
        assert_eq!(p.event2.evid, "e2");
        assert_eq!(p.lag_samples, 17);
        assert_eq!(p.event1.mag, Some(2.1));
        assert_eq!(p.event2.mag, None);
        // cc_max round-trips within 1e-6 relative error.
        assert!((p.cc_max - 0.987654321).abs() < 1e-9);
    }

    #[test]
    fn test_correlation_maps_are_symmetric() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        let id: TraceId = "IV.MMN..EHZ".parse().unwrap();
        let mut writer = PairWriter::create(&path).unwrap();
        let cc = |v: f64| CcResult {
            lag: 0,
            lag_sec: 0.0,
            cc_max: v,
        };
        let s1 = stats("e1", "2021-01-01T00:00:00", None);
        let s2 = stats("e2", "2021-02-01T00:00:00", None);
        let s3 = stats("e3", "2021-03-01T00:00:00", None);
        writer.write_pair(&s1, &s2, &id, &cc(0.95)).unwrap();
        writer.write_pair(&s1, &s3, &id, &cc(0.40)).unwrap();
        writer.write_pair(&s2, &s3, &id, &cc(0.91)).unwrap();

        let events = read_events_from_pairs(&path).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events["e1"].correlations["e2"], 0.95);
        assert_eq!(events["e2"].correlations["e1"], 0.95);
        assert_eq!(events["e3"].correlations["e2"], 0.91);
        // Iteration order is sorted by evid.
        let keys: Vec<&String> = events.keys().collect();
        assert_eq!(keys, ["e1", "e2", "e3"]);
    }
}
