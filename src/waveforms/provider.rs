//! Waveform providers.
//!
//! A provider resolves station coordinates and returns evenly sampled
//! traces for `(trace_id, t0, t1)` requests. The pipelines accept any
//! `WaveformProvider` implementation; this module ships the two local
//! providers (per-event directories and a continuous per-station archive)
//! plus a chaining combinator that tries providers in order.

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Utc};
use log::debug;

use crate::catalog::TraceId;
use crate::error::{Error, Result};
use crate::waveforms::sac::SacFile;
use crate::waveforms::station::StationCsv;
use crate::waveforms::trace::Trace;

/// Station coordinates as resolved by a provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationCoords {
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation in meters.
    pub elevation: f64,
    /// Sensor depth below surface in meters.
    pub depth: f64,
}

/// The polymorphic waveform capability of the pipelines.
pub trait WaveformProvider {
    /// Station coordinates for a trace id at a given time.
    fn coords(&self, id: &TraceId, time: DateTime<Utc>) -> Result<StationCoords>;

    /// An evenly sampled trace covering `[t0, t1]`.
    fn waveform(&self, id: &TraceId, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Result<Trace>;

    /// An event window, with the event id available as a lookup hint.
    ///
    /// The default implementation ignores the hint; the per-event
    /// directory provider selects its subdirectory with it.
    fn event_waveform(
        &self,
        _evid: &str,
        id: &TraceId,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> Result<Trace> {
        self.waveform(id, t0, t1)
    }
}

/// Resolve coordinates through an optional station table.
fn csv_coords(
    station_csv: &Option<StationCsv>,
    id: &TraceId,
    time: DateTime<Utc>,
) -> Result<StationCoords> {
    let Some(table) = station_csv else {
        return Err(Error::NoMetadata {
            reason: "no station metadata source configured".to_string(),
        });
    };
    table.resolve(id).ok_or_else(|| Error::MetadataMismatch {
        trace_id: id.to_string(),
        time: time.format("%Y-%m-%dT%H:%M:%S").to_string(),
    })
}

/// Provider reading pre-cut event traces from per-event subdirectories.
///
/// The subdirectory is selected by substring match on the event id; SAC
/// files inside are matched against the trace id with the station code
/// wildcards of the archive convention (`_` and `.` match any character,
/// an empty channel matches all channels).
pub struct EventDirectoryProvider {
    root: PathBuf,
    station_csv: Option<StationCsv>,
}

impl EventDirectoryProvider {
    pub fn new(root: PathBuf, station_csv: Option<StationCsv>) -> Self {
        Self { root, station_csv }
    }

    fn event_dir(&self, evid: &str) -> Result<PathBuf> {
        if !self.root.exists() {
            return Err(Error::no_waveform(format!(
                "event data path \"{}\" does not exist",
                self.root.display()
            )));
        }
        let mut subdirs: Vec<PathBuf> = std::fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        subdirs.sort();
        subdirs
            .into_iter()
            .find(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().contains(evid))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                Error::no_waveform(format!(
                    "no waveform data for event {evid} in \"{}\"",
                    self.root.display()
                ))
            })
    }
}

impl WaveformProvider for EventDirectoryProvider {
    fn coords(&self, id: &TraceId, time: DateTime<Utc>) -> Result<StationCoords> {
        csv_coords(&self.station_csv, id, time)
    }

    fn waveform(&self, id: &TraceId, _t0: DateTime<Utc>, _t1: DateTime<Utc>) -> Result<Trace> {
        Err(Error::no_waveform(format!(
            "event directory provider needs an event id to look up trace {id}"
        )))
    }

    fn event_waveform(
        &self,
        evid: &str,
        id: &TraceId,
        _t0: DateTime<Utc>,
        _t1: DateTime<Utc>,
    ) -> Result<Trace> {
        let event_dir = self.event_dir(evid)?;
        let mut files: Vec<PathBuf> = std::fs::read_dir(&event_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        for path in files {
            let Ok(sac) = SacFile::read(&path) else {
                debug!("skipping unreadable file {}", path.display());
                continue;
            };
            let tr = sac.to_trace();
            if trace_id_matches(id, &tr.id) {
                return Ok(tr);
            }
        }
        Err(Error::no_waveform(format!(
            "no waveform data for trace id {id} in \"{}\"",
            event_dir.display()
        )))
    }
}

/// Match a stored trace id against a requested one.
///
/// `_` and `.` in the requested station code act as single-character
/// wildcards; an empty requested channel matches any channel.
fn trace_id_matches(requested: &TraceId, stored: &TraceId) -> bool {
    if requested.network != stored.network || requested.location != stored.location {
        return false;
    }
    if !requested.channel.is_empty() && requested.channel != stored.channel {
        return false;
    }
    wildcard_eq(&requested.station, &stored.station)
}

fn wildcard_eq(pattern: &str, value: &str) -> bool {
    if pattern.len() != value.len() {
        return false;
    }
    pattern
        .chars()
        .zip(value.chars())
        .all(|(p, v)| p == '_' || p == '.' || p == '?' || p == v)
}

/// Provider reading a continuous per-station archive laid out as
/// `root/YEAR/NET/STA/CHAN.D/NET.STA.LOC.CHAN.D.YEAR.JDAY` with SAC day
/// files.
pub struct ContinuousArchiveProvider {
    root: PathBuf,
    station_csv: Option<StationCsv>,
}

impl ContinuousArchiveProvider {
    pub fn new(root: PathBuf, station_csv: Option<StationCsv>) -> Self {
        Self { root, station_csv }
    }

    fn day_file(&self, id: &TraceId, date: chrono::NaiveDate) -> PathBuf {
        self.root
            .join(date.year().to_string())
            .join(&id.network)
            .join(&id.station)
            .join(format!("{}.D", id.channel))
            .join(format!(
                "{}.{}.{}.{}.D.{}.{:03}",
                id.network,
                id.station,
                id.location,
                id.channel,
                date.year(),
                date.ordinal()
            ))
    }
}

impl WaveformProvider for ContinuousArchiveProvider {
    fn coords(&self, id: &TraceId, time: DateTime<Utc>) -> Result<StationCoords> {
        csv_coords(&self.station_csv, id, time)
    }

    fn waveform(&self, id: &TraceId, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Result<Trace> {
        let mut pieces = Vec::new();
        let mut date = t0.date_naive();
        while date <= t1.date_naive() {
            let path = self.day_file(id, date);
            if path.is_file() {
                pieces.push(SacFile::read(&path)?.to_trace());
            }
            date = date.succ_opt().ok_or_else(|| {
                Error::parse("archive request beyond representable dates".to_string())
            })?;
        }
        if pieces.is_empty() {
            return Err(Error::no_waveform(format!(
                "no waveform data for trace id {id} between {t0} and {t1}"
            )));
        }
        pieces.sort_by_key(|tr| tr.starttime);
        let merged = merge_traces(pieces)?;
        let cut = merged.trim(t0, t1);
        if cut.is_empty() {
            return Err(Error::no_waveform(format!(
                "no waveform data for trace id {id} between {t0} and {t1}"
            )));
        }
        Ok(cut)
    }
}

/// Join consecutive archive pieces into one trace.
///
/// Single-sample gaps are filled by linear interpolation; anything wider
/// is rejected. Overlapping samples of a later piece are dropped.
fn merge_traces(pieces: Vec<Trace>) -> Result<Trace> {
    let mut iter = pieces.into_iter();
    let mut merged = iter.next().expect("merge_traces called with pieces");
    for piece in iter {
        if (piece.dt - merged.dt).abs() > f64::EPSILON {
            return Err(Error::no_waveform(format!(
                "sampling interval changes across archive files for {}",
                merged.id
            )));
        }
        let offset = (piece.starttime - merged.endtime())
            .num_microseconds()
            .unwrap_or(i64::MAX) as f64
            / 1e6;
        let gap_samples = (offset / merged.dt).round() as i64 - 1;
        match gap_samples {
            i64::MIN..=-1 => {
                // Overlap: drop the duplicated head of the later piece.
                let skip = (-gap_samples) as usize;
                if skip < piece.data.len() {
                    merged.data.extend_from_slice(&piece.data[skip..]);
                }
            }
            0 => merged.data.extend_from_slice(&piece.data),
            1 => {
                let last = *merged.data.last().expect("merged trace is non-empty");
                let next = piece.data.first().copied().unwrap_or(last);
                merged.data.push(0.5 * (last + next));
                merged.data.extend_from_slice(&piece.data);
            }
            _ => {
                return Err(Error::no_waveform(format!(
                    "gap of {gap_samples} samples in archive data for {}",
                    merged.id
                )));
            }
        }
    }
    Ok(merged)
}

/// Try several providers in order.
///
/// Waveform requests fall through on recoverable failures and accumulate
/// the reasons; fatal errors propagate immediately. Coordinates come from
/// the first provider able to resolve them.
pub struct ChainProvider {
    providers: Vec<Box<dyn WaveformProvider>>,
}

impl ChainProvider {
    pub fn new(providers: Vec<Box<dyn WaveformProvider>>) -> Self {
        Self { providers }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl WaveformProvider for ChainProvider {
    fn coords(&self, id: &TraceId, time: DateTime<Utc>) -> Result<StationCoords> {
        let mut last = Err(Error::NoMetadata {
            reason: "no waveform provider configured".to_string(),
        });
        for provider in &self.providers {
            match provider.coords(id, time) {
                Ok(coords) => return Ok(coords),
                Err(err) => last = Err(err),
            }
        }
        last
    }

    fn waveform(&self, id: &TraceId, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Result<Trace> {
        let mut reasons = Vec::new();
        for provider in &self.providers {
            match provider.waveform(id, t0, t1) {
                Ok(tr) => return Ok(tr),
                Err(err) if err.is_recoverable() => reasons.push(err.to_string()),
                Err(err) => return Err(err),
            }
        }
        Err(Error::no_waveform(join_reasons(&reasons)))
    }

    fn event_waveform(
        &self,
        evid: &str,
        id: &TraceId,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> Result<Trace> {
        let mut reasons = Vec::new();
        for provider in &self.providers {
            match provider.event_waveform(evid, id, t0, t1) {
                Ok(tr) => return Ok(tr),
                Err(err) if err.is_recoverable() => reasons.push(err.to_string()),
                Err(err) => return Err(err),
            }
        }
        Err(Error::no_waveform(join_reasons(&reasons)))
    }
}

fn join_reasons(reasons: &[String]) -> String {
    if reasons.is_empty() {
        "no waveform provider configured".to_string()
    } else {
        reasons.join("; ")
    }
}
