//! Continuous template scan.
//!
//! Sweeps the configured time window in overlapping chunks; for each chunk
//! and template, computes the scan-mode cross-correlation and emits a
//! detection whenever the peak rises well above the local noise floor
//! (`cc_max / MAD > min_cc_mad_ratio`). Each detection is refined by a
//! full-window re-correlation before being appended to the per-template
//! detection catalog.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::catalog::{generate_evid, parse_utc_datetime, Event};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::families::family::{read_selected_families, FamilySelection};
use crate::families::template::{read_template, template_filename, Template};
use crate::signal::{preprocess, xcorr_pair, xcorr_scan};
use crate::waveforms::arrivals::first_arrivals;
use crate::waveforms::provider::{StationCoords, WaveformProvider};
use crate::waveforms::trace::{duration_from_secs, Trace};

/// A matched event with its refined correlation value.
#[derive(Debug, Clone)]
pub struct Detection {
    pub event: Event,
    pub cc_max: f64,
}

/// Per-chunk trace cache, keyed by `(chunk start, trace id)` and shared
/// across templates within one chunk iteration.
pub type ChunkCache = HashMap<(DateTime<Utc>, String), Trace>;

/// Scan one chunk with one template.
///
/// Returns a detection when the trigger rule fires, `None` otherwise.
pub fn scan_chunk(
    provider: &dyn WaveformProvider,
    config: &Config,
    template: &Template,
    t0: DateTime<Utc>,
    t1: DateTime<Utc>,
    cache: &mut ChunkCache,
) -> Result<Option<Detection>> {
    let trace_id = template.trace.id.clone();
    let key = (t0, trace_id.to_string());
    let tr = match cache.get(&key) {
        Some(tr) => tr.clone(),
        None => {
            let tr = provider.waveform(&trace_id, t0, t1).map_err(|e| match e {
                Error::NoWaveform { .. } => {
                    Error::no_waveform(format!("no data for {trace_id}: {t0} - {t1}"))
                }
                other => other,
            })?;
            cache.insert(key, tr.clone());
            tr
        }
    };
    let dt = tr.dt;
    if (dt - template.trace.dt).abs() > f64::EPSILON {
        // Correlating across sampling rates is meaningless: abort the run.
        return Err(Error::SampleRateMismatch {
            dt1: dt,
            dt2: template.trace.dt,
        });
    }

    let mut stream = tr.data.clone();
    let mut tmpl = template.trace.data.clone();
    preprocess(&mut stream, dt, config.cc_freq_min, config.cc_freq_max);
    preprocess(&mut tmpl, dt, config.cc_freq_min, config.cc_freq_max);
    // The chunk length acts as the lag bound in scan mode.
    let scan = xcorr_scan(&stream, &tmpl, dt, config.time_chunk, config.cc_allow_negative);
    if !(scan.cc_max / scan.cc_mad > config.min_cc_mad_ratio) {
        return Ok(None);
    }

    // Recenter: the lag points at the template start inside the chunk.
    let d_len = 0.5 * (tr.len() as f64 - template.trace.len() as f64) * dt;
    let p_relative = scan.lag_sec + d_len + template.p_relative.unwrap_or(0.0);
    let p_arrival_time = tr.starttime + duration_from_secs(p_relative);
    let cc_max = refine_detection(&tr, template, p_arrival_time, config);

    let event = build_detection_event(&tr, template, p_arrival_time);
    Ok(Some(Detection { event, cc_max }))
}

/// Re-correlate the refinement window against the template for a clean
/// peak value.
fn refine_detection(
    tr: &Trace,
    template: &Template,
    p_arrival_time: DateTime<Utc>,
    config: &Config,
) -> f64 {
    let t0 = p_arrival_time - duration_from_secs(config.cc_pre_p);
    let t1 = t0 + duration_from_secs(config.cc_trace_length);
    let window = tr.trim(t0, t1);
    let mut a = window.data;
    let mut b = template.trace.data.clone();
    preprocess(&mut a, tr.dt, config.cc_freq_min, config.cc_freq_max);
    preprocess(&mut b, tr.dt, config.cc_freq_min, config.cc_freq_max);
    let cc = xcorr_pair(&a, &b, tr.dt, config.cc_max_shift, config.cc_allow_negative);
    cc.cc_max
}

/// Build the synthetic event record of a detection.
///
/// The origin time backs off the P time by the predicted travel time when
/// the template carries its source geometry; otherwise the P time itself
/// is used.
fn build_detection_event(tr: &Trace, template: &Template, p_arrival_time: DateTime<Utc>) -> Event {
    let mut source = None;
    let orig_time = match (template.station, template.source) {
        (Some((st_lat, st_lon)), Some((ev_lat, ev_lon, ev_depth))) => {
            let station = StationCoords {
                latitude: st_lat,
                longitude: st_lon,
                elevation: 0.0,
                depth: 0.0,
            };
            match first_arrivals(&station, ev_lat, ev_lon, ev_depth) {
                Ok(arrivals) => {
                    source = Some((ev_lat, ev_lon, ev_depth));
                    p_arrival_time - duration_from_secs(arrivals.p_travel_time)
                }
                Err(_) => p_arrival_time,
            }
        }
        _ => p_arrival_time,
    };
    let mut ev = Event::new(generate_evid(orig_time), orig_time);
    if let Some((lat, lon, depth)) = source {
        ev.lat = Some(lat);
        ev.lon = Some(lon);
        ev.depth = Some(depth);
    }
    ev.author = Some(format!("requake{}", env!("CARGO_PKG_VERSION")));
    ev.trace_id = Some(tr.id.clone());
    ev
}

/// Load the templates of the selected families.
fn read_templates(config: &Config, selection: &FamilySelection) -> Result<Vec<Template>> {
    let families = read_selected_families(config.families_file(), config, selection)?;
    let mut templates = Vec::new();
    for family in &families {
        let Some(trace_id) = &family.trace_id else {
            warn!("family \"{}\" has no trace id, skipping", family.number);
            continue;
        };
        let path = config
            .template_dir()
            .join(template_filename(family.number, trace_id));
        match read_template(&path, family.number) {
            Ok(template) => templates.push(template),
            Err(err) => warn!("unable to read template {}: {err}", path.display()),
        }
    }
    if templates.is_empty() {
        return Err(Error::FamilyNotFound {
            message: "no template could be read for the selected families".to_string(),
        });
    }
    Ok(templates)
}

/// Sweep the continuous stream with every selected template.
pub fn scan_templates(
    provider: &dyn WaveformProvider,
    config: &Config,
    selection: &FamilySelection,
) -> Result<()> {
    let templates = read_templates(config, selection)?;
    let start = scan_bound(config.template_start_time.as_deref(), "template_start_time")?;
    let end = scan_bound(config.template_end_time.as_deref(), "template_end_time")?;

    let catalog_dir = config.template_catalog_dir();
    std::fs::create_dir_all(&catalog_dir)?;
    let mut catalog_files: HashMap<i64, BufWriter<File>> = HashMap::new();
    for template in &templates {
        let name = format!(
            "catalog{:02}.{}.txt",
            template.number, template.trace.id
        );
        catalog_files.insert(template.number, BufWriter::new(File::create(catalog_dir.join(name))?));
    }

    let chunk = duration_from_secs(config.time_chunk);
    let overlap = duration_from_secs(config.time_chunk_overlap);
    let mut time = start;
    let mut cache = ChunkCache::new();
    while time <= end {
        for template in &templates {
            let t1 = time + chunk + overlap;
            match scan_chunk(provider, config, template, time, t1, &mut cache) {
                Ok(Some(detection)) => {
                    let fp = catalog_files
                        .get_mut(&template.number)
                        .expect("catalog file was opened for every template");
                    writeln!(
                        fp,
                        "{}|{:.2}",
                        detection.event.fdsn_text(),
                        detection.cc_max
                    )?;
                    fp.flush()?;
                }
                Ok(None) => {}
                Err(Error::NoWaveform { reason }) => {
                    warn!("{reason}");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        cache.clear();
        time += chunk;
    }
    info!(
        "template scan finished, catalogs written to {}",
        catalog_dir.display()
    );
    Ok(())
}

fn scan_bound(value: Option<&str>, name: &str) -> Result<DateTime<Utc>> {
    let value = value.ok_or_else(|| {
        Error::config(format!("no \"{name}\" defined in the config file"))
    })?;
    parse_utc_datetime(value)
        .map_err(|e| Error::config(format!("invalid \"{name}\": {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    use crate::catalog::TraceId;
    use crate::waveforms::testing::{MemoryProvider, TEST_DT};

    fn template_data(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let x = (i as f64 - n as f64 / 2.0) / 25.0;
                (-x * x).exp() * (0.6 * i as f64).sin()
            })
            .collect()
    }

    fn scan_config(outdir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.outdir = outdir.to_path_buf();
        config.time_chunk = 30.0;
        config.time_chunk_overlap = 5.0;
        config.min_cc_mad_ratio = 10.0;
        config.cc_pre_p = 1.0;
        config.cc_trace_length = 2.0;
        config
    }

    /// Scenario: a 300-second stream with the template injected three
    /// times plus weak Gaussian noise yields three detections at the
    /// injection times.
    #[test]
    fn test_template_self_scan_detects_injections() {
        let dir = tempfile::tempdir().unwrap();
        let config = scan_config(dir.path());
        let id: TraceId = "IV.MMN..EHZ".parse().unwrap();
        let start = parse_utc_datetime("2021-06-01T00:00:00").unwrap();

        let tmpl_len = (config.cc_trace_length / TEST_DT) as usize;
        let tmpl_data = template_data(tmpl_len);
        let tmpl_rms = (tmpl_data.iter().map(|v| v * v).sum::<f64>() / tmpl_len as f64).sqrt();

        let n = (300.0 / TEST_DT) as usize;
        let mut rng = StdRng::seed_from_u64(42);
        let noise = Normal::new(0.0, 0.01 * tmpl_rms).unwrap();
        let mut stream: Vec<f64> = (0..n).map(|_| noise.sample(&mut rng)).collect();
        // Offsets chosen away from chunk boundaries so that each
        // injection is seen by exactly one chunk.
        let injections = [1100usize, 10200, 22000];
        for &offset in &injections {
            for (i, v) in tmpl_data.iter().enumerate() {
                stream[offset + i] += v;
            }
        }
        let mut provider = MemoryProvider::new(42.9, 12.8);
        provider.add_continuous(Trace::new(id.clone(), start, TEST_DT, stream));

        let template = Template {
            trace: Trace::new(id.clone(), crate::families::template::template_epoch(), TEST_DT, tmpl_data),
            number: 0,
            p_relative: Some(config.cc_pre_p),
            s_relative: Some(config.cc_pre_p + 1.0),
            station: None,
            source: None,
        };

        let mut detections = Vec::new();
        let mut cache = ChunkCache::new();
        let chunk = duration_from_secs(config.time_chunk);
        let overlap = duration_from_secs(config.time_chunk_overlap);
        let end = start + duration_from_secs(300.0);
        let mut time = start;
        while time < end {
            if let Some(det) =
                scan_chunk(&provider, &config, &template, time, time + chunk + overlap, &mut cache)
                    .unwrap()
            {
                detections.push(det);
            }
            cache.clear();
            time = time + chunk;
        }

        assert_eq!(detections.len(), 3, "detections: {detections:?}");
        for (det, &offset) in detections.iter().zip(injections.iter()) {
            assert!(det.cc_max >= 0.95, "cc_max {}", det.cc_max);
            // Without source geometry the origin time is the detected P
            // time: injection start + p_relative.
            let expected = start
                + duration_from_secs(offset as f64 * TEST_DT + config.cc_pre_p);
            let error = (det.event.orig_time - expected)
                .num_microseconds()
                .unwrap()
                .abs() as f64
                / 1e6;
            assert!(
                error <= TEST_DT + 1e-9,
                "detection at {} expected {expected}",
                det.event.orig_time
            );
            assert!(det.event.evid.starts_with("reqk2021"));
            assert_eq!(det.event.trace_id.as_ref().unwrap(), &id);
        }
    }

    /// A template correlated with a noiseless copy of itself detects at
    /// the injection point with a near-perfect refined peak.
    #[test]
    fn test_noiseless_self_scan_has_unit_correlation() {
        let dir = tempfile::tempdir().unwrap();
        let config = scan_config(dir.path());
        let id: TraceId = "IV.MMN..EHZ".parse().unwrap();
        let start = parse_utc_datetime("2021-06-01T00:00:00").unwrap();

        let tmpl_len = (config.cc_trace_length / TEST_DT) as usize;
        let tmpl_data = template_data(tmpl_len);
        let n = (35.0 / TEST_DT) as usize;
        let mut stream = vec![0.0; n];
        let offset = 1500usize;
        for (i, v) in tmpl_data.iter().enumerate() {
            stream[offset + i] = *v;
        }
        let mut provider = MemoryProvider::new(42.9, 12.8);
        provider.add_continuous(Trace::new(id.clone(), start, TEST_DT, stream));

        let template = Template {
            trace: Trace::new(
                id,
                crate::families::template::template_epoch(),
                TEST_DT,
                tmpl_data,
            ),
            number: 0,
            p_relative: Some(config.cc_pre_p),
            s_relative: None,
            station: None,
            source: None,
        };
        let mut cache = ChunkCache::new();
        let end = start + duration_from_secs(config.time_chunk + config.time_chunk_overlap);
        let det = scan_chunk(&provider, &config, &template, start, end, &mut cache)
            .unwrap()
            .expect("the injected template must trigger");
        assert!(det.cc_max >= 1.0 - 1e-6, "cc_max {}", det.cc_max);
        let expected =
            start + duration_from_secs(offset as f64 * TEST_DT + config.cc_pre_p);
        let error = (det.event.orig_time - expected)
            .num_microseconds()
            .unwrap()
            .abs() as f64
            / 1e6;
        assert!(error <= TEST_DT + 1e-9, "origin {}", det.event.orig_time);
    }

    #[test]
    fn test_no_trigger_on_pure_noise() {
        let dir = tempfile::tempdir().unwrap();
        let config = scan_config(dir.path());
        let id: TraceId = "IV.MMN..EHZ".parse().unwrap();
        let start = parse_utc_datetime("2021-06-01T00:00:00").unwrap();

        let tmpl_len = (config.cc_trace_length / TEST_DT) as usize;
        let n = (60.0 / TEST_DT) as usize;
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let stream: Vec<f64> = (0..n).map(|_| noise.sample(&mut rng)).collect();
        let mut provider = MemoryProvider::new(42.9, 12.8);
        provider.add_continuous(Trace::new(id.clone(), start, TEST_DT, stream));

        let template = Template {
            trace: Trace::new(
                id,
                crate::families::template::template_epoch(),
                TEST_DT,
                template_data(tmpl_len),
            ),
            number: 0,
            p_relative: Some(config.cc_pre_p),
            s_relative: None,
            station: None,
            source: None,
        };
        let mut cache = ChunkCache::new();
        let end = start + duration_from_secs(config.time_chunk + config.time_chunk_overlap);
        let det = scan_chunk(&provider, &config, &template, start, end, &mut cache).unwrap();
        assert!(det.is_none());
    }

    #[test]
    fn test_sample_rate_mismatch_is_fatal_in_scan_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = scan_config(dir.path());
        let id: TraceId = "IV.MMN..EHZ".parse().unwrap();
        let start = parse_utc_datetime("2021-06-01T00:00:00").unwrap();
        let mut provider = MemoryProvider::new(42.9, 12.8);
        provider.add_continuous(Trace::new(id.clone(), start, TEST_DT, vec![0.0; 4000]));

        let template = Template {
            trace: Trace::new(
                id,
                crate::families::template::template_epoch(),
                0.02,
                template_data(100),
            ),
            number: 0,
            p_relative: None,
            s_relative: None,
            station: None,
            source: None,
        };
        let mut cache = ChunkCache::new();
        let end = start + duration_from_secs(35.0);
        let err = scan_chunk(&provider, &config, &template, start, end, &mut cache).unwrap_err();
        assert!(matches!(err, Error::SampleRateMismatch { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_chunk_cache_is_shared_across_templates() {
        let dir = tempfile::tempdir().unwrap();
        let config = scan_config(dir.path());
        let id: TraceId = "IV.MMN..EHZ".parse().unwrap();
        let start = parse_utc_datetime("2021-06-01T00:00:00").unwrap();
        let mut provider = MemoryProvider::new(42.9, 12.8);
        provider.add_continuous(Trace::new(id.clone(), start, TEST_DT, vec![0.0; 4000]));

        let make_template = |number: i64| Template {
            trace: Trace::new(
                id.clone(),
                crate::families::template::template_epoch(),
                TEST_DT,
                template_data(100),
            ),
            number,
            p_relative: None,
            s_relative: None,
            station: None,
            source: None,
        };
        let mut cache = ChunkCache::new();
        let end = start + duration_from_secs(35.0);
        for number in 0..3 {
            let _ = scan_chunk(&provider, &config, &make_template(number), start, end, &mut cache);
        }
        // One provider call despite three templates on the same channel.
        assert_eq!(provider.waveform_calls.get(), 1);
    }
}
