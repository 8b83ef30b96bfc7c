//! Evenly sampled waveform windows and their event metadata.

use chrono::{DateTime, Duration, Utc};

use crate::catalog::TraceId;
use crate::waveforms::provider::StationCoords;

/// An evenly sampled waveform window of a single channel.
#[derive(Debug, Clone)]
pub struct Trace {
    pub id: TraceId,
    pub starttime: DateTime<Utc>,
    /// Sampling interval in seconds.
    pub dt: f64,
    pub data: Vec<f64>,
}

impl Trace {
    pub fn new(id: TraceId, starttime: DateTime<Utc>, dt: f64, data: Vec<f64>) -> Self {
        Self {
            id,
            starttime,
            dt,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Time of the last sample.
    pub fn endtime(&self) -> DateTime<Utc> {
        self.starttime + duration_from_secs(self.dt * self.len().saturating_sub(1) as f64)
    }

    /// Cut the trace to `[t0, t1]`, keeping samples inside the interval.
    ///
    /// The result may be shorter than requested when the trace does not
    /// cover the full interval.
    pub fn trim(&self, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Trace {
        let first = if t0 > self.starttime {
            let offset = (t0 - self.starttime).num_microseconds().unwrap_or(0) as f64 / 1e6;
            (offset / self.dt).ceil() as usize
        } else {
            0
        };
        let last = if t1 < self.endtime() {
            let offset = (t1 - self.starttime).num_microseconds().unwrap_or(0) as f64 / 1e6;
            ((offset / self.dt).floor() as usize + 1).min(self.len())
        } else {
            self.len()
        };
        let first = first.min(self.len());
        let last = last.max(first);
        Trace {
            id: self.id.clone(),
            starttime: self.starttime + duration_from_secs(first as f64 * self.dt),
            dt: self.dt,
            data: self.data[first..last].to_vec(),
        }
    }
}

/// Event metadata attached to a fetched event window.
#[derive(Debug, Clone)]
pub struct EventStats {
    pub evid: String,
    pub orig_time: DateTime<Utc>,
    pub ev_lat: Option<f64>,
    pub ev_lon: Option<f64>,
    /// Event depth in km, non-negative.
    pub ev_depth: f64,
    pub mag: Option<f64>,
    pub mag_type: Option<String>,
    pub station: StationCoords,
    /// Epicentral distance in km.
    pub distance_km: f64,
    /// Epicentral distance in degrees.
    pub distance_deg: f64,
    /// Absolute predicted P arrival time.
    pub p_arrival_time: DateTime<Utc>,
    /// Absolute predicted S arrival time.
    pub s_arrival_time: DateTime<Utc>,
}

/// A trace together with the metadata of the event it windows.
#[derive(Debug, Clone)]
pub struct EventTrace {
    pub trace: Trace,
    pub stats: EventStats,
}

/// Convert fractional seconds into a chrono duration with microsecond
/// resolution.
pub fn duration_from_secs(seconds: f64) -> Duration {
    Duration::microseconds((seconds * 1e6).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_utc_datetime;

    fn trace() -> Trace {
        Trace::new(
            "IV.MMN..EHZ".parse().unwrap(),
            parse_utc_datetime("2021-01-01T00:00:00").unwrap(),
            0.01,
            (0..1000).map(|i| i as f64).collect(),
        )
    }

    #[test]
    fn test_endtime() {
        let tr = trace();
        assert_eq!(
            tr.endtime(),
            parse_utc_datetime("2021-01-01T00:00:09.99").unwrap()
        );
    }

    #[test]
    fn test_trim_inside() {
        let tr = trace();
        let cut = tr.trim(
            parse_utc_datetime("2021-01-01T00:00:01").unwrap(),
            parse_utc_datetime("2021-01-01T00:00:02").unwrap(),
        );
        assert_eq!(cut.data[0], 100.0);
        assert_eq!(cut.len(), 101);
        assert_eq!(
            cut.starttime,
            parse_utc_datetime("2021-01-01T00:00:01").unwrap()
        );
    }

    #[test]
    fn test_trim_beyond_bounds_is_clamped() {
        let tr = trace();
        let cut = tr.trim(
            parse_utc_datetime("2020-12-31T23:59:00").unwrap(),
            parse_utc_datetime("2021-01-01T01:00:00").unwrap(),
        );
        assert_eq!(cut.len(), tr.len());
        assert_eq!(cut.starttime, tr.starttime);
    }
}
