//! Template construction: member alignment, stacking, SAC output.
//!
//! The template of a family is the mean of its aligned member waveforms.
//! Members are first aligned to the first trace, then twice re-aligned to
//! the running stack. The stack's start time is pinned to the
//! 1900-01-01T00:00:00Z reference so that template timing is independent
//! of any real origin.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use rayon::prelude::*;

use crate::catalog::TraceId;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::families::family::Family;
use crate::geodesy::{gps2dist_km, locations2degrees};
use crate::signal::{demean, preprocess, xcorr_pair, CcResult};
use crate::waveforms::sac::SacFile;
use crate::waveforms::trace::{duration_from_secs, EventTrace, Trace};

/// Reference start time of every emitted template.
pub fn template_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .expect("the template epoch is a valid instant")
}

/// A template read back from disk, ready for continuous scanning.
#[derive(Debug, Clone)]
pub struct Template {
    pub trace: Trace,
    pub number: i64,
    /// P arrival relative to the trace start, in seconds.
    pub p_relative: Option<f64>,
    /// S arrival relative to the trace start, in seconds.
    pub s_relative: Option<f64>,
    /// Station latitude and longitude.
    pub station: Option<(f64, f64)>,
    /// Source latitude, longitude and depth (km).
    pub source: Option<(f64, f64, f64)>,
}

/// Align `target` to `reference` by cross-correlation.
///
/// The correlation runs on preprocessed copies; the integer sample shift
/// is applied to the raw target data and to its attached P and S arrival
/// times. The shift is bounded by `cc_max_shift`.
pub fn align_pair(
    reference: &EventTrace,
    target: &mut EventTrace,
    config: &Config,
) -> Result<CcResult> {
    let dt1 = reference.trace.dt;
    let dt2 = target.trace.dt;
    if (dt1 - dt2).abs() > f64::EPSILON {
        return Err(Error::SampleRateMismatch { dt1, dt2 });
    }
    let mut a = reference.trace.data.clone();
    let mut b = target.trace.data.clone();
    preprocess(&mut a, dt1, config.cc_freq_min, config.cc_freq_max);
    preprocess(&mut b, dt1, config.cc_freq_min, config.cc_freq_max);
    let cc = xcorr_pair(&a, &b, dt1, config.cc_max_shift, config.cc_allow_negative);

    target.trace.data = shift_samples(&target.trace.data, cc.lag);
    target.stats.p_arrival_time -= duration_from_secs(cc.lag_sec);
    target.stats.s_arrival_time -= duration_from_secs(cc.lag_sec);
    Ok(cc)
}

/// Advance the samples by `lag` (positive lag = data was delayed),
/// zero-filling the exposed end.
fn shift_samples(data: &[f64], lag: i64) -> Vec<f64> {
    let n = data.len();
    let mut out = vec![0.0; n];
    if lag >= 0 {
        let lag = (lag as usize).min(n);
        out[..n - lag].copy_from_slice(&data[lag..]);
    } else {
        let lag = ((-lag) as usize).min(n);
        out[lag..].copy_from_slice(&data[..n - lag]);
    }
    out
}

/// Stack the members into their mean trace.
///
/// Each member is demeaned (and optionally unit-peak normalized), then
/// padded or truncated at the tail to the stack length. The stack start
/// time is the template epoch; its P and S times are the epoch plus the
/// mean relative arrivals of the members.
fn stack_traces(members: &[EventTrace], config: &Config) -> EventTrace {
    let stack_len = members[0].trace.len();
    let normalize = config.normalize_traces_before_averaging;
    let prepared: Vec<Vec<f64>> = members
        .par_iter()
        .map(|member| {
            let mut data = member.trace.data.clone();
            demean(&mut data);
            if normalize {
                let peak = data.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
                if peak > 0.0 {
                    for v in data.iter_mut() {
                        *v /= peak;
                    }
                }
            }
            data.resize(stack_len, 0.0);
            data
        })
        .collect();

    let count = members.len() as f64;
    let mut stacked = vec![0.0; stack_len];
    for data in &prepared {
        for (acc, v) in stacked.iter_mut().zip(data.iter()) {
            *acc += v;
        }
    }
    for v in stacked.iter_mut() {
        *v /= count;
    }

    let relative = |t: DateTime<Utc>, start: DateTime<Utc>| {
        (t - start).num_microseconds().unwrap_or(0) as f64 / 1e6
    };
    let p_mean = members
        .iter()
        .map(|m| relative(m.stats.p_arrival_time, m.trace.starttime))
        .sum::<f64>()
        / count;
    let s_mean = members
        .iter()
        .map(|m| relative(m.stats.s_arrival_time, m.trace.starttime))
        .sum::<f64>()
        / count;

    let epoch = template_epoch();
    let mut stats = members[0].stats.clone();
    stats.evid = "stack".to_string();
    stats.orig_time = epoch;
    stats.p_arrival_time = epoch + duration_from_secs(p_mean);
    stats.s_arrival_time = epoch + duration_from_secs(s_mean);
    EventTrace {
        trace: Trace::new(
            members[0].trace.id.clone(),
            epoch,
            members[0].trace.dt,
            stacked,
        ),
        stats,
    }
}

/// Align the members of a family: pass A against the first trace, then two
/// passes against the running stack.
pub fn align_traces(members: &mut [EventTrace], config: &Config) -> Result<()> {
    let (first, rest) = members
        .split_first_mut()
        .ok_or_else(|| Error::no_waveform("no traces to align"))?;
    for member in rest.iter_mut() {
        align_pair(first, member, config)?;
    }
    for _ in 0..2 {
        let stack = stack_traces(members, config);
        for member in members.iter_mut() {
            align_pair(&stack, member, config)?;
        }
    }
    Ok(())
}

/// Build the template of a family from its aligned members.
pub fn build_family_template(
    members: &mut [EventTrace],
    family: &Family,
    config: &Config,
) -> Result<EventTrace> {
    align_traces(members, config)?;
    let mut template = stack_traces(members, config);
    template.stats.evid = format!("average{:02}", family.number);
    template.stats.ev_lat = family.lat;
    template.stats.ev_lon = family.lon;
    template.stats.ev_depth = family.depth.unwrap_or(0.0);
    template.stats.mag = None;
    template.stats.mag_type = None;
    if let (Some(lat), Some(lon)) = (family.lat, family.lon) {
        let st = &template.stats.station;
        template.stats.distance_deg = locations2degrees(st.latitude, st.longitude, lat, lon);
        template.stats.distance_km = gps2dist_km(st.latitude, st.longitude, lat, lon);
    }
    Ok(template)
}

/// File name of the template of family `number` on `trace_id`.
pub fn template_filename(number: i64, trace_id: &TraceId) -> String {
    format!("template{number:02}.{trace_id}.sac")
}

/// Write a template trace as a SAC file with its arrival and geometry
/// header fields populated.
pub fn write_template(template: &EventTrace, dir: impl AsRef<Path>) -> Result<PathBuf> {
    std::fs::create_dir_all(dir.as_ref())?;
    let relative = |t: DateTime<Utc>| {
        (t - template.trace.starttime)
            .num_microseconds()
            .unwrap_or(0) as f64
            / 1e6
    };
    let mut sac = SacFile::from_trace(&template.trace);
    sac.kevnm = template.stats.evid.clone();
    sac.a = Some(relative(template.stats.p_arrival_time));
    sac.ka = Some("Ptheo".to_string());
    sac.t0 = Some(relative(template.stats.s_arrival_time));
    sac.kt0 = Some("Stheo".to_string());
    sac.stla = Some(template.stats.station.latitude);
    sac.stlo = Some(template.stats.station.longitude);
    sac.stel = Some(template.stats.station.elevation);
    sac.evla = template.stats.ev_lat;
    sac.evlo = template.stats.ev_lon;
    sac.evdp = Some(template.stats.ev_depth);
    sac.dist = Some(template.stats.distance_km);
    sac.gcarc = Some(template.stats.distance_deg);

    let number: i64 = template
        .stats
        .evid
        .trim_start_matches("average")
        .parse()
        .unwrap_or(0);
    let path = dir
        .as_ref()
        .join(template_filename(number, &template.trace.id));
    sac.write(&path)?;
    Ok(path)
}

/// Build and write the templates of the selected families.
///
/// Members whose waveform cannot be fetched are skipped with a logged
/// reason; a family with no fetchable member produces no template.
pub fn build_templates(
    provider: &dyn crate::waveforms::provider::WaveformProvider,
    config: &Config,
    selection: &crate::families::family::FamilySelection,
) -> Result<()> {
    let families = crate::families::family::read_selected_families(
        config.families_file(),
        config,
        selection,
    )?;
    for family in &families {
        let mut members = Vec::with_capacity(family.len());
        for ev in family.events() {
            let Some(trace_id) = &ev.trace_id else {
                warn!("event {} has no trace id, skipping", ev.evid);
                continue;
            };
            match crate::waveforms::fetcher::get_event_waveform(provider, config, ev, trace_id) {
                Ok(tr) => members.push(tr),
                Err(Error::NoWaveform { reason }) => {
                    log::error!("{reason}");
                }
                Err(err) => return Err(err),
            }
        }
        if members.is_empty() {
            log::error!("no traces found for family {}", family.number);
            continue;
        }
        let template = build_family_template(&mut members, family, config)?;
        let path = write_template(&template, config.template_dir())?;
        log::info!(
            "template for family {} saved as {}",
            family.number,
            path.display()
        );
    }
    Ok(())
}

/// Read a template SAC file back for scanning.
pub fn read_template(path: impl AsRef<Path>, number: i64) -> Result<Template> {
    let sac = SacFile::read(path.as_ref())?;
    let trace = sac.to_trace();
    if sac.a.is_none() {
        warn!(
            "template {} has no P arrival header",
            path.as_ref().display()
        );
    }
    Ok(Template {
        number,
        p_relative: sac.a.map(|a| a - sac.b),
        s_relative: sac.t0.map(|t| t - sac.b),
        station: match (sac.stla, sac.stlo) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        },
        source: match (sac.evla, sac.evlo, sac.evdp) {
            (Some(lat), Some(lon), Some(depth)) => Some((lat, lon, depth)),
            _ => None,
        },
        trace,
    })
}
