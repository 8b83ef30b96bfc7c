//! Waveform retrieval for event pairs.
//!
//! `PairFetcher` holds the per-scan state: the cached trace of the current
//! "event 1" (purged whenever event 1 changes), the set of
//! `(evid, trace_id)` combinations known to have no data (short-circuiting
//! every later pair that refers to them), and the trace ids already
//! attempted for the pair under work. When several candidate channels are
//! configured, the one whose station is closest to the midpoint between
//! the two events is tried first.

use std::collections::{HashMap, HashSet};

use log::warn;

use crate::catalog::{Event, TraceId};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geodesy::{gps2dist_km, midpoint};
use crate::waveforms::fetcher::get_event_waveform;
use crate::waveforms::provider::WaveformProvider;
use crate::waveforms::trace::EventTrace;

/// Stateful fetcher for the catalog scan.
pub struct PairFetcher<'a> {
    provider: &'a dyn WaveformProvider,
    config: &'a Config,
    evid1: Option<String>,
    cache: HashMap<String, EventTrace>,
    skipped: HashSet<String>,
    attempted: Vec<TraceId>,
}

impl<'a> PairFetcher<'a> {
    pub fn new(provider: &'a dyn WaveformProvider, config: &'a Config) -> Self {
        Self {
            provider,
            config,
            evid1: None,
            cache: HashMap::new(),
            skipped: HashSet::new(),
            attempted: Vec::new(),
        }
    }

    /// Fetch the two event windows of a pair on a common channel.
    ///
    /// Candidate channels are attempted in midpoint-proximity order until
    /// both waveforms resolve; a recoverable error is returned once every
    /// candidate is exhausted. Metadata resolution failures are fatal and
    /// propagate.
    pub fn get_waveform_pair(
        &mut self,
        ev1: &Event,
        ev2: &Event,
    ) -> Result<(EventTrace, EventTrace)> {
        self.attempted.clear();
        if self.evid1.as_deref() != Some(ev1.evid.as_str()) {
            self.cache.clear();
            self.evid1 = Some(ev1.evid.clone());
        }
        loop {
            let trace_id = self.next_trace_id(ev1, ev2)?;
            match self.fetch_pair_on(ev1, ev2, &trace_id) {
                Ok(pair) => return Ok(pair),
                Err(err) if err.is_recoverable() => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Pick the next candidate channel for the pair.
    ///
    /// A singleton configured list is used directly; otherwise candidates
    /// are sorted by station distance from the midpoint between the two
    /// epicenters.
    fn next_trace_id(&mut self, ev1: &Event, ev2: &Event) -> Result<TraceId> {
        let trace_ids = self.config.require_trace_ids()?;
        if trace_ids.len() == 1 {
            let id = trace_ids[0].clone();
            if self.attempted.contains(&id) {
                return Err(no_valid_trace_id(ev1));
            }
            self.attempted.push(id.clone());
            return Ok(id);
        }
        let (lat1, lon1) = event_coords(ev1)?;
        let (lat2, lon2) = event_coords(ev2)?;
        let (mid_lat, mid_lon) = midpoint(lat1, lon1, lat2, lon2);
        let mut by_distance: Vec<(f64, TraceId)> = Vec::with_capacity(trace_ids.len());
        for id in trace_ids {
            // Unresolvable station coordinates abort the run.
            let coords = self.provider.coords(id, ev1.orig_time)?;
            let d = gps2dist_km(coords.latitude, coords.longitude, mid_lat, mid_lon);
            by_distance.push((d, id.clone()));
        }
        by_distance.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("distances are finite"));
        for (_, id) in by_distance {
            if !self.attempted.contains(&id) {
                self.attempted.push(id.clone());
                return Ok(id);
            }
        }
        Err(no_valid_trace_id(ev1))
    }

    /// Fetch both windows on one channel, consulting the event-1 cache and
    /// the skip list.
    fn fetch_pair_on(
        &mut self,
        ev1: &Event,
        ev2: &Event,
        trace_id: &TraceId,
    ) -> Result<(EventTrace, EventTrace)> {
        let tr1 = self.fetch_one(ev1, trace_id, true)?;
        let tr2 = self.fetch_one(ev2, trace_id, false)?;
        Ok((tr1, tr2))
    }

    fn fetch_one(&mut self, ev: &Event, trace_id: &TraceId, cacheable: bool) -> Result<EventTrace> {
        let key = format!("{}_{}", ev.evid, trace_id);
        if self.skipped.contains(&key) {
            // Known-bad combination: short-circuit without a provider call.
            return Err(Error::no_waveform(String::new()));
        }
        if let Some(tr) = self.cache.get(&key) {
            return Ok(tr.clone());
        }
        match get_event_waveform(self.provider, self.config, ev, trace_id) {
            Ok(tr) => {
                if cacheable {
                    // Only event 1 is worth caching: event 2 changes at
                    // every iteration.
                    self.cache.insert(key, tr.clone());
                }
                Ok(tr)
            }
            Err(err) if err.is_recoverable() => {
                self.skipped.insert(key);
                warn!(
                    "no waveform data for event {} and trace_id {trace_id}: skipping all pairs \
                     containing this event and trace_id",
                    ev.evid
                );
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

fn event_coords(ev: &Event) -> Result<(f64, f64)> {
    match (ev.lat, ev.lon) {
        (Some(lat), Some(lon)) => Ok((lat, lon)),
        _ => Err(Error::no_waveform(format!(
            "event {} has no coordinates",
            ev.evid
        ))),
    }
}

fn no_valid_trace_id(ev: &Event) -> Error {
    Error::no_waveform(format!("no valid trace_id available for event {}", ev.evid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_utc_datetime;
    use crate::waveforms::testing::MemoryProvider;

    fn event(evid: &str, time: &str, lat: f64, lon: f64) -> Event {
        let mut ev = Event::new(evid, parse_utc_datetime(time).unwrap());
        ev.lat = Some(lat);
        ev.lon = Some(lon);
        ev.depth = Some(8.0);
        ev
    }

    fn config_with(ids: &[&str]) -> Config {
        let mut config = Config::default();
        config.catalog_trace_id = ids.iter().map(|s| s.parse().unwrap()).collect();
        config
    }

    #[test]
    fn test_event1_cache_avoids_refetching() {
        let config = config_with(&["IV.MMN..EHZ"]);
        let id: TraceId = "IV.MMN..EHZ".parse().unwrap();
        let mut provider = MemoryProvider::new(42.9, 12.8);
        let e1 = event("e1", "2021-01-01T00:00:00", 42.95, 12.85);
        let e2 = event("e2", "2021-02-01T00:00:00", 42.95, 12.85);
        let e3 = event("e3", "2021-03-01T00:00:00", 42.95, 12.85);
        for ev in [&e1, &e2, &e3] {
            provider.add_event_window(&config, ev, &id, |i| (i as f64 * 0.2).sin());
        }

        let mut fetcher = PairFetcher::new(&provider, &config);
        fetcher.get_waveform_pair(&e1, &e2).unwrap();
        assert_eq!(provider.waveform_calls.get(), 2);
        // Same event 1: its trace comes from the cache.
        fetcher.get_waveform_pair(&e1, &e3).unwrap();
        assert_eq!(provider.waveform_calls.get(), 3);
        // New event 1: the cache is purged and refilled.
        fetcher.get_waveform_pair(&e2, &e3).unwrap();
        assert_eq!(provider.waveform_calls.get(), 5);
    }

    #[test]
    fn test_missing_event_short_circuits_later_pairs() {
        let config = config_with(&["IV.MMN..EHZ"]);
        let id: TraceId = "IV.MMN..EHZ".parse().unwrap();
        let mut provider = MemoryProvider::new(42.9, 12.8);
        let e1 = event("e1", "2021-01-01T00:00:00", 42.95, 12.85);
        let bad = event("bad", "2021-02-01T00:00:00", 42.95, 12.85);
        let e3 = event("e3", "2021-03-01T00:00:00", 42.95, 12.85);
        for ev in [&e1, &e3] {
            provider.add_event_window(&config, ev, &id, |i| (i as f64 * 0.2).sin());
        }

        let mut fetcher = PairFetcher::new(&provider, &config);
        assert!(fetcher.get_waveform_pair(&e1, &bad).is_err());
        let calls_after_first_failure = provider.waveform_calls.get();
        // The failed event is now on the skip list: no further provider
        // calls are spent on it.
        assert!(fetcher.get_waveform_pair(&bad, &e3).is_err());
        assert_eq!(provider.waveform_calls.get(), calls_after_first_failure);
    }

    #[test]
    fn test_closest_station_to_midpoint_is_tried_first() {
        let config = config_with(&["IV.NEAR..EHZ", "IV.FAR..EHZ"]);
        let near: TraceId = "IV.NEAR..EHZ".parse().unwrap();
        let far: TraceId = "IV.FAR..EHZ".parse().unwrap();
        let mut provider = MemoryProvider::new(0.0, 0.0);
        provider.set_coords(&near, 42.96, 12.86);
        provider.set_coords(&far, 44.5, 14.0);
        let e1 = event("e1", "2021-01-01T00:00:00", 42.95, 12.85);
        let e2 = event("e2", "2021-02-01T00:00:00", 42.97, 12.87);
        for ev in [&e1, &e2] {
            provider.add_event_window(&config, ev, &near, |i| (i as f64 * 0.2).sin());
            provider.add_event_window(&config, ev, &far, |i| (i as f64 * 0.2).cos());
        }

        let mut fetcher = PairFetcher::new(&provider, &config);
        let (tr1, _) = fetcher.get_waveform_pair(&e1, &e2).unwrap();
        assert_eq!(tr1.trace.id, near);
    }

    #[test]
    fn test_fallback_to_next_closest_station() {
        let config = config_with(&["IV.NEAR..EHZ", "IV.FAR..EHZ"]);
        let near: TraceId = "IV.NEAR..EHZ".parse().unwrap();
        let far: TraceId = "IV.FAR..EHZ".parse().unwrap();
        let mut provider = MemoryProvider::new(0.0, 0.0);
        provider.set_coords(&near, 42.96, 12.86);
        provider.set_coords(&far, 44.5, 14.0);
        let e1 = event("e1", "2021-01-01T00:00:00", 42.95, 12.85);
        let e2 = event("e2", "2021-02-01T00:00:00", 42.97, 12.87);
        // Data exists only on the far station.
        for ev in [&e1, &e2] {
            provider.add_event_window(&config, ev, &far, |i| (i as f64 * 0.2).cos());
        }

        let mut fetcher = PairFetcher::new(&provider, &config);
        let (tr1, tr2) = fetcher.get_waveform_pair(&e1, &e2).unwrap();
        assert_eq!(tr1.trace.id, far);
        assert_eq!(tr2.trace.id, far);
    }

    #[test]
    fn test_exhausted_candidates_is_recoverable() {
        let config = config_with(&["IV.MMN..EHZ"]);
        let provider = MemoryProvider::new(42.9, 12.8);
        let e1 = event("e1", "2021-01-01T00:00:00", 42.95, 12.85);
        let e2 = event("e2", "2021-02-01T00:00:00", 42.95, 12.85);
        let mut fetcher = PairFetcher::new(&provider, &config);
        let err = fetcher.get_waveform_pair(&e1, &e2).unwrap_err();
        assert!(err.is_recoverable());
    }
}
