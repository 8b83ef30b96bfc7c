//! In-memory waveform provider for tests.

use std::cell::Cell;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::catalog::{Event, TraceId};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::waveforms::arrivals::first_arrivals;
use crate::waveforms::provider::{StationCoords, WaveformProvider};
use crate::waveforms::trace::{duration_from_secs, Trace};

/// Sampling interval of generated test traces.
pub const TEST_DT: f64 = 0.01;

/// A provider backed by in-memory traces, with call counting for the
/// short-circuit assertions.
pub struct MemoryProvider {
    default_station: StationCoords,
    station_by_id: HashMap<String, StationCoords>,
    event_traces: HashMap<String, Vec<Trace>>,
    continuous: Vec<Trace>,
    pub waveform_calls: Cell<usize>,
}

impl MemoryProvider {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            default_station: StationCoords {
                latitude: lat,
                longitude: lon,
                elevation: 0.0,
                depth: 0.0,
            },
            station_by_id: HashMap::new(),
            event_traces: HashMap::new(),
            continuous: Vec::new(),
            waveform_calls: Cell::new(0),
        }
    }

    /// Override the station coordinates of one trace id.
    pub fn set_coords(&mut self, id: &TraceId, lat: f64, lon: f64) {
        self.station_by_id.insert(
            id.padded(),
            StationCoords {
                latitude: lat,
                longitude: lon,
                elevation: 0.0,
                depth: 0.0,
            },
        );
    }

    fn station_for(&self, id: &TraceId) -> StationCoords {
        self.station_by_id
            .get(&id.padded())
            .copied()
            .unwrap_or(self.default_station)
    }

    /// Store an event window for `ev`, generated sample-by-sample from
    /// `f`, covering exactly the window the fetcher will request.
    pub fn add_event_window(
        &mut self,
        config: &Config,
        ev: &Event,
        id: &TraceId,
        f: impl Fn(usize) -> f64,
    ) {
        let station = self.station_for(id);
        let arrivals = first_arrivals(
            &station,
            ev.lat.expect("test event has coordinates"),
            ev.lon.expect("test event has coordinates"),
            ev.depth_or_zero(),
        )
        .expect("test geometry is finite");
        let t0 = ev.orig_time + duration_from_secs(arrivals.p_travel_time - config.cc_pre_p);
        let n = (config.cc_trace_length / TEST_DT).round() as usize;
        let data: Vec<f64> = (0..n).map(f).collect();
        self.event_traces
            .entry(ev.evid.clone())
            .or_default()
            .push(Trace::new(id.clone(), t0, TEST_DT, data));
    }

    /// Store a continuous trace served by `waveform`.
    pub fn add_continuous(&mut self, trace: Trace) {
        self.continuous.push(trace);
    }

    /// Store a pre-built event trace verbatim (e.g. with a non-default
    /// sampling interval).
    pub fn add_event_trace(&mut self, evid: &str, trace: Trace) {
        self.event_traces
            .entry(evid.to_string())
            .or_default()
            .push(trace);
    }
}

impl WaveformProvider for MemoryProvider {
    fn coords(&self, id: &TraceId, _time: DateTime<Utc>) -> Result<StationCoords> {
        Ok(self.station_for(id))
    }

    fn waveform(&self, id: &TraceId, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Result<Trace> {
        self.waveform_calls.set(self.waveform_calls.get() + 1);
        self.continuous
            .iter()
            .find(|tr| tr.id == *id && tr.starttime <= t1 && tr.endtime() >= t0)
            .map(|tr| tr.trim(t0, t1))
            .filter(|tr| !tr.is_empty())
            .ok_or_else(|| {
                Error::no_waveform(format!("no data for {id} between {t0} and {t1}"))
            })
    }

    fn event_waveform(
        &self,
        evid: &str,
        id: &TraceId,
        _t0: DateTime<Utc>,
        _t1: DateTime<Utc>,
    ) -> Result<Trace> {
        self.waveform_calls.set(self.waveform_calls.get() + 1);
        self.event_traces
            .get(evid)
            .and_then(|traces| traces.iter().find(|tr| tr.id == *id))
            .cloned()
            .ok_or_else(|| Error::no_waveform(format!("no data for event {evid} on {id}")))
    }
}
