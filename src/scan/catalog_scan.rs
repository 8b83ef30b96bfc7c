//! Catalog-based repeater scan.
//!
//! Enumerates all `C(N, 2)` pairs of the time-sorted catalog in
//! combination order, runs pair similarity on the spatially eligible ones
//! and streams one CSV row per processed pair.

use log::{info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::families::pairs::PairWriter;
use crate::geodesy::gps2dist_km;
use crate::signal::{preprocess, xcorr_pair};
use crate::waveforms::pair::PairFetcher;
use crate::waveforms::provider::WaveformProvider;

/// Substitute depth for events without a hypocenter, in km.
const NON_LOCATABLE_DEPTH: f64 = 10.0;

/// Assign the mean station coordinates (and a fixed depth) to events that
/// carry no hypocenter.
///
/// The substitution is global, per run, and deterministic; it requires the
/// coordinates of every configured trace id, and failing to resolve them
/// is fatal.
pub fn fix_non_locatable_events(
    catalog: &mut Catalog,
    provider: &dyn WaveformProvider,
    config: &Config,
) -> Result<()> {
    if !catalog
        .iter()
        .any(|ev| ev.lat.is_none() || ev.lon.is_none())
    {
        return Ok(());
    }
    let reference_time = catalog
        .first()
        .map(|ev| ev.orig_time)
        .ok_or_else(|| Error::parse("catalog is empty"))?;
    let trace_ids = config.require_trace_ids()?;
    let mut lat_sum = 0.0;
    let mut lon_sum = 0.0;
    for id in trace_ids {
        let coords = provider.coords(id, reference_time)?;
        lat_sum += coords.latitude;
        lon_sum += coords.longitude;
    }
    let mean_lat = lat_sum / trace_ids.len() as f64;
    let mean_lon = lon_sum / trace_ids.len() as f64;
    for ev in catalog.iter_mut() {
        if ev.lat.is_none() || ev.lon.is_none() {
            ev.lat = Some(mean_lat);
            ev.lon = Some(mean_lon);
            ev.depth = Some(NON_LOCATABLE_DEPTH);
        }
    }
    Ok(())
}

/// Check whether the events of a pair are close enough to be compared.
fn pair_ok(ev1: &crate::catalog::Event, ev2: &crate::catalog::Event, config: &Config) -> bool {
    let (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) = (ev1.lat, ev1.lon, ev2.lat, ev2.lon)
    else {
        return false;
    };
    gps2dist_km(lat1, lon1, lat2, lon2) <= config.catalog_search_range
}

/// Run the pairwise catalog scan and stream the pair CSV.
pub fn scan_catalog(provider: &dyn WaveformProvider, config: &Config) -> Result<()> {
    let mut catalog = Catalog::new();
    catalog.read(config.catalog_file()).map_err(|e| {
        Error::parse(format!(
            "error reading catalog file {}: {e}",
            config.catalog_file().display()
        ))
    })?;
    catalog.sort();
    fix_non_locatable_events(&mut catalog, provider, config)?;
    let nevents = catalog.len();
    if nevents < 2 {
        return Err(Error::parse(
            "not enough events in catalog: at least 2 events are needed to run the scan",
        ));
    }
    info!("{nevents} events read from catalog file");
    let npairs = nevents * (nevents - 1) / 2;
    info!("processing {npairs} event pairs");

    let mut writer = PairWriter::create(config.pairs_file())?;
    let mut fetcher = PairFetcher::new(provider, config);
    let mut processed = 0usize;
    for i in 0..nevents {
        for j in (i + 1)..nevents {
            let ev1 = &catalog[i];
            let ev2 = &catalog[j];
            if !pair_ok(ev1, ev2, config) {
                continue;
            }
            let (tr1, tr2) = match fetcher.get_waveform_pair(ev1, ev2) {
                Ok(pair) => pair,
                Err(Error::NoWaveform { reason }) => {
                    // Empty reasons mark short-circuited skips already
                    // reported once.
                    if !reason.is_empty() {
                        warn!("{reason}");
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };
            if (tr1.trace.dt - tr2.trace.dt).abs() > f64::EPSILON {
                warn!(
                    "{} {}: the two traces have a different sampling interval, skipping pair",
                    tr1.stats.evid, tr2.stats.evid
                );
                continue;
            }
            let dt = tr1.trace.dt;
            let mut a = tr1.trace.data.clone();
            let mut b = tr2.trace.data.clone();
            preprocess(&mut a, dt, config.cc_freq_min, config.cc_freq_max);
            preprocess(&mut b, dt, config.cc_freq_min, config.cc_freq_max);
            let cc = xcorr_pair(&a, &b, dt, config.cc_max_shift, config.cc_allow_negative);
            writer.write_pair(&tr1.stats, &tr2.stats, &tr1.trace.id, &cc)?;
            processed += 1;
        }
    }
    writer.flush()?;
    info!(
        "processed {npairs} event pairs, {processed} written to {}",
        config.pairs_file().display()
    );
    Ok(())
}
