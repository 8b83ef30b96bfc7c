//! Event-window fetching.
//!
//! Composes a waveform provider with the travel-time model to produce a
//! P-aligned, pre-P-padded event window carrying its metadata. Every
//! failure mode surfaces as the recoverable `NoWaveform` error with a
//! descriptive reason; there are no silent retries.

use crate::catalog::{Event, TraceId};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::signal::demean;
use crate::waveforms::arrivals::first_arrivals;
use crate::waveforms::provider::WaveformProvider;
use crate::waveforms::trace::{duration_from_secs, EventStats, EventTrace};

/// Fetch the event window of `ev` on `trace_id`.
///
/// The window spans `[t_P - cc_pre_p, t_P - cc_pre_p + cc_trace_length]`
/// around the predicted P arrival; the returned trace is demeaned and
/// carries the event, station and arrival metadata.
pub fn get_event_waveform(
    provider: &dyn WaveformProvider,
    config: &Config,
    ev: &Event,
    trace_id: &TraceId,
) -> Result<EventTrace> {
    let skip_reason = |what: &str, detail: String| {
        Error::no_waveform(format!(
            "unable to {what} for event {} and trace_id {trace_id}, skipping event: {detail}",
            ev.evid
        ))
    };

    let station = provider
        .coords(trace_id, ev.orig_time)
        .map_err(|e| skip_reason("get station coordinates", e.to_string()))?;

    let (ev_lat, ev_lon) = match (ev.lat, ev.lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => {
            return Err(skip_reason(
                "compute arrival times",
                "event has no coordinates".to_string(),
            ))
        }
    };
    let ev_depth = ev.depth_or_zero();
    let arrivals = first_arrivals(&station, ev_lat, ev_lon, ev_depth)
        .map_err(|e| skip_reason("compute arrival times", e.to_string()))?;
    let p_arrival_time = ev.orig_time + duration_from_secs(arrivals.p_travel_time);
    let s_arrival_time = ev.orig_time + duration_from_secs(arrivals.s_travel_time);

    let t0 = p_arrival_time - duration_from_secs(config.cc_pre_p);
    let t1 = t0 + duration_from_secs(config.cc_trace_length);
    let mut trace = provider
        .event_waveform(&ev.evid, trace_id, t0, t1)
        .map_err(|e| skip_reason("get waveform data", e.to_string()))?;
    demean(&mut trace.data);

    Ok(EventTrace {
        trace,
        stats: EventStats {
            evid: ev.evid.clone(),
            orig_time: ev.orig_time,
            ev_lat: Some(ev_lat),
            ev_lon: Some(ev_lon),
            ev_depth,
            mag: ev.mag,
            mag_type: ev.mag_type.clone(),
            station,
            distance_km: arrivals.distance_km,
            distance_deg: arrivals.distance_deg,
            p_arrival_time,
            s_arrival_time,
        },
    })
}
