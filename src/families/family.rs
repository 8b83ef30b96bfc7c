//! Family records, aggregates, selection and the family CSV.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::catalog::{parse_utc_datetime, Event, TraceId};
use crate::config::{Config, SortFamiliesBy};
use crate::error::{Error, Result};
use crate::formulas::{mag_to_moment, mag_to_slip_cm, MomentUnit};
use crate::geodesy::gps2dist_km;

/// Seconds per (non-leap) year, used for duration and slip rate.
const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// A set of events declared to be repeaters of each other on one channel.
///
/// Aggregates are recomputed on every insert; the member list stays sorted
/// by origin time. Appending an event whose trace id differs from the
/// family's is an error.
#[derive(Debug, Clone)]
pub struct Family {
    events: Vec<Event>,
    pub number: i64,
    pub valid: bool,
    pub trace_id: Option<TraceId>,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    /// Mean depth in km.
    pub depth: Option<f64>,
    pub starttime: Option<DateTime<Utc>>,
    pub endtime: Option<DateTime<Utc>>,
    /// Bounding time span in years.
    pub duration: f64,
    pub magmin: Option<f64>,
    pub magmax: Option<f64>,
    /// Cumulative slip in cm.
    pub cumul_slip: Option<f64>,
    /// Mean slip rate in cm/year.
    pub slip_rate: Option<f64>,
    /// Cumulative seismic moment in N.m.
    pub cumul_moment: Option<f64>,
}

impl Family {
    pub fn new(number: i64) -> Self {
        Self {
            events: Vec::new(),
            number,
            valid: true,
            trace_id: None,
            lon: None,
            lat: None,
            depth: None,
            starttime: None,
            endtime: None,
            duration: 0.0,
            magmin: None,
            magmax: None,
            cumul_slip: None,
            slip_rate: None,
            cumul_moment: None,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Bounding time span in seconds.
    pub fn duration_secs(&self) -> f64 {
        match (self.starttime, self.endtime) {
            (Some(start), Some(end)) => {
                (end - start).num_microseconds().unwrap_or(0) as f64 / 1e6
            }
            _ => 0.0,
        }
    }

    /// Append an event and update the aggregates.
    ///
    /// An event already in the family (same evid and trace id) is ignored.
    pub fn append(&mut self, ev: Event, config: &Config) -> Result<()> {
        if self.events.contains(&ev) {
            return Ok(());
        }
        match (&self.trace_id, &ev.trace_id) {
            (None, id) => self.trace_id = id.clone(),
            (Some(own), Some(new)) if own != new => {
                return Err(Error::InvalidFamily {
                    message: format!(
                        "event {} trace_id {new} does not match family trace_id {own}",
                        ev.evid
                    ),
                });
            }
            _ => {}
        }
        self.events.push(ev.clone());
        self.events.sort_by_key(|e| e.orig_time);

        if ev.lon.is_some() {
            self.lon = mean(self.events.iter().filter_map(|e| e.lon));
        }
        if ev.lat.is_some() {
            self.lat = mean(self.events.iter().filter_map(|e| e.lat));
        }
        if ev.depth.is_some() {
            self.depth = mean(self.events.iter().filter_map(|e| e.depth));
        }
        self.starttime = Some(match self.starttime {
            Some(t) => t.min(ev.orig_time),
            None => ev.orig_time,
        });
        self.endtime = Some(match self.endtime {
            Some(t) => t.max(ev.orig_time),
            None => ev.orig_time,
        });
        self.duration = self.duration_secs() / SECONDS_PER_YEAR;
        if ev.mag.is_some() {
            self.update_mag_quantities(&ev, config);
        }
        Ok(())
    }

    /// Append several events.
    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>, config: &Config) -> Result<()> {
        for ev in events {
            self.append(ev, config)?;
        }
        Ok(())
    }

    fn update_mag_quantities(&mut self, ev: &Event, config: &Config) {
        let mag = ev.mag.expect("caller checked the magnitude");
        self.magmin = Some(self.magmin.map_or(mag, |m| m.min(mag)));
        self.magmax = Some(self.magmax.map_or(mag, |m| m.max(mag)));
        let slip = mag_to_slip_cm(config, ev.mag);
        let cumul_slip = self.cumul_slip.unwrap_or(0.0) + slip;
        self.cumul_slip = Some(cumul_slip);
        let first_slip = mag_to_slip_cm(config, self.events[0].mag);
        let d_slip = cumul_slip - first_slip;
        self.slip_rate = Some(if self.duration == 0.0 {
            f64::INFINITY
        } else {
            d_slip / self.duration
        });
        self.cumul_moment =
            Some(self.cumul_moment.unwrap_or(0.0) + mag_to_moment(ev.mag, MomentUnit::NewtonMeter));
    }

    /// Distance in km from the family centroid to a point.
    pub fn distance_from(&self, lon: f64, lat: f64) -> f64 {
        match (self.lat, self.lon) {
            (Some(flat), Some(flon)) => gps2dist_km(flat, flon, lat, lon),
            _ => f64::INFINITY,
        }
    }
}

/// Explicit family-number selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyNumbers {
    All,
    /// Comma list of numbers.
    List(Vec<i64>),
    /// Inclusive-exclusive range `a-b`.
    Range(i64, i64),
}

impl FamilyNumbers {
    pub fn contains(&self, number: i64) -> bool {
        match self {
            FamilyNumbers::All => true,
            FamilyNumbers::List(numbers) => numbers.contains(&number),
            FamilyNumbers::Range(a, b) => (*a..*b).contains(&number),
        }
    }
}

impl FromStr for FamilyNumbers {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "all" {
            return Ok(FamilyNumbers::All);
        }
        let invalid = || Error::FamilyNotFound {
            message: format!("invalid family numbers: {s}"),
        };
        if s.contains(',') {
            let numbers = s
                .split(',')
                .map(|v| v.trim().parse::<i64>().map_err(|_| invalid()))
                .collect::<Result<Vec<i64>>>()?;
            return Ok(FamilyNumbers::List(numbers));
        }
        if let Some((a, b)) = s.split_once('-') {
            let a = a.trim().parse::<i64>().map_err(|_| invalid())?;
            let b = b.trim().parse::<i64>().map_err(|_| invalid())?;
            return Ok(FamilyNumbers::Range(a, b));
        }
        s.parse::<i64>()
            .map(|n| FamilyNumbers::List(vec![n]))
            .map_err(|_| invalid())
    }
}

/// Selection filters applied by downstream family consumers.
#[derive(Debug, Clone)]
pub struct FamilySelection {
    pub numbers: FamilyNumbers,
    /// Minimum bounding duration in seconds.
    pub longer_than: f64,
    /// Maximum bounding duration in seconds (exclusive).
    pub shorter_than: f64,
    /// Minimum number of member events.
    pub min_events: usize,
}

impl Default for FamilySelection {
    fn default() -> Self {
        Self {
            numbers: FamilyNumbers::All,
            longer_than: 0.0,
            shorter_than: f64::INFINITY,
            min_events: 0,
        }
    }
}

/// One row of the family CSV.
#[derive(Debug, Serialize, Deserialize)]
struct FamilyRow {
    evid: String,
    trace_id: String,
    orig_time: String,
    lon: Option<f64>,
    lat: Option<f64>,
    depth_km: Option<f64>,
    mag_type: Option<String>,
    mag: Option<f64>,
    family_number: i64,
    valid: String,
}

/// Write families as the per-event CSV, sorted by the configured key and
/// renumbered sequentially from 0.
pub fn write_families(path: impl AsRef<Path>, families: &[Family], config: &Config) -> Result<()> {
    let mut families: Vec<&Family> = families.iter().collect();
    let sort_key = |family: &Family| -> f64 {
        match config.sort_families_by {
            SortFamiliesBy::Time => family
                .starttime
                .map(|t| t.timestamp_micros() as f64)
                .unwrap_or(f64::INFINITY),
            SortFamiliesBy::Longitude => family.lon.unwrap_or(f64::INFINITY),
            SortFamiliesBy::Latitude => family.lat.unwrap_or(f64::INFINITY),
            SortFamiliesBy::Depth => family.depth.unwrap_or(f64::INFINITY),
            SortFamiliesBy::DistanceFrom => family.distance_from(
                config.distance_from_lon.unwrap_or(0.0),
                config.distance_from_lat.unwrap_or(0.0),
            ),
        }
    };
    families.sort_by(|a, b| {
        sort_key(a)
            .partial_cmp(&sort_key(b))
            .expect("sort keys are not NaN")
    });

    let mut writer = csv::Writer::from_path(path)?;
    for (number, family) in families.iter().enumerate() {
        for ev in family.events() {
            writer.serialize(FamilyRow {
                evid: ev.evid.clone(),
                trace_id: ev
                    .trace_id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                orig_time: ev.orig_time.to_rfc3339_opts(SecondsFormat::Micros, true),
                lon: ev.lon,
                lat: ev.lat,
                depth_km: ev.depth,
                mag_type: ev.mag_type.clone(),
                mag: ev.mag,
                family_number: number as i64,
                valid: family.valid.to_string(),
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Read families back from the family CSV.
pub fn read_families(path: impl AsRef<Path>, config: &Config) -> Result<Vec<Family>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        Error::parse(format!(
            "unable to read families file {}: {e}",
            path.display()
        ))
    })?;
    let mut families: Vec<Family> = Vec::new();
    for row in reader.deserialize() {
        let row: FamilyRow = row?;
        let mut ev = Event::new(row.evid, parse_utc_datetime(&row.orig_time)?);
        ev.lon = row.lon;
        ev.lat = row.lat;
        ev.depth = row.depth_km;
        ev.mag_type = row.mag_type;
        ev.mag = row.mag;
        ev.trace_id = Some(row.trace_id.parse()?);
        let valid = matches!(row.valid.as_str(), "true" | "True");
        if families.last().map(|f| f.number) != Some(row.family_number) {
            families.push(Family::new(row.family_number));
        }
        let family = families.last_mut().expect("a family was just pushed");
        family.valid = valid;
        family.append(ev, config)?;
    }
    Ok(families)
}

/// Read families and apply the selection filters.
///
/// An empty selection is a user-facing error.
pub fn read_selected_families(
    path: impl AsRef<Path>,
    config: &Config,
    selection: &FamilySelection,
) -> Result<Vec<Family>> {
    let families = read_families(path, config)?;
    let mut selected = Vec::new();
    for family in families {
        if !selection.numbers.contains(family.number) {
            continue;
        }
        if !family.valid {
            warn!("family \"{}\" is flagged as not valid", family.number);
            continue;
        }
        if family.duration_secs() < selection.longer_than {
            warn!("family \"{}\" is too short", family.number);
            continue;
        }
        if family.duration_secs() >= selection.shorter_than {
            warn!("family \"{}\" is too long", family.number);
            continue;
        }
        if family.len() < selection.min_events {
            warn!(
                "family \"{}\" has less than {} events",
                family.number, selection.min_events
            );
            continue;
        }
        selected.push(family);
    }
    if selected.is_empty() {
        return Err(Error::FamilyNotFound {
            message: "no family found".to_string(),
        });
    }
    Ok(selected)
}

/// Rewrite the family CSV with the validity flag of one family changed.
pub fn flag_family(
    path: impl AsRef<Path>,
    config: &Config,
    family_number: i64,
    valid: bool,
) -> Result<()> {
    let path = path.as_ref();
    let mut families = read_families(path, config)?;
    let family = families
        .iter_mut()
        .find(|f| f.number == family_number)
        .ok_or_else(|| Error::FamilyNotFound {
            message: format!("no family found with number \"{family_number}\""),
        })?;
    family.valid = valid;

    // Rewrite preserving the stored numbering and order.
    let mut writer = csv::Writer::from_path(path)?;
    for family in &families {
        for ev in family.events() {
            writer.serialize(FamilyRow {
                evid: ev.evid.clone(),
                trace_id: ev
                    .trace_id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                orig_time: ev.orig_time.to_rfc3339_opts(SecondsFormat::Micros, true),
                lon: ev.lon,
                lat: ev.lat,
                depth_km: ev.depth,
                mag_type: ev.mag_type.clone(),
                mag: ev.mag,
                family_number: family.number,
                valid: family.valid.to_string(),
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(evid: &str, time: &str, lat: f64, lon: f64, mag: f64) -> Event {
        let mut ev = Event::new(evid, parse_utc_datetime(time).unwrap());
        ev.lat = Some(lat);
        ev.lon = Some(lon);
        ev.depth = Some(8.0);
        ev.mag = Some(mag);
        ev.trace_id = Some("IV.MMN..EHZ".parse().unwrap());
        ev
    }

    #[test]
    fn test_aggregates_update_on_append() {
        let config = Config::default();
        let mut family = Family::new(0);
        family
            .append(event("e1", "2020-01-01T00:00:00", 42.0, 12.0, 2.0), &config)
            .unwrap();
        family
            .append(event("e2", "2021-01-01T00:00:00", 43.0, 13.0, 3.0), &config)
            .unwrap();
        assert_eq!(family.len(), 2);
        assert_eq!(family.lat, Some(42.5));
        assert_eq!(family.lon, Some(12.5));
        assert_eq!(family.magmin, Some(2.0));
        assert_eq!(family.magmax, Some(3.0));
        assert!((family.duration - 366.0 / 365.0).abs() < 1e-6);
        assert!(family.cumul_slip.unwrap() > 0.0);
        assert!(family.cumul_moment.unwrap() > 0.0);
        assert!(family.slip_rate.unwrap().is_finite());
    }

    #[test]
    fn test_duplicate_event_is_ignored() {
        let config = Config::default();
        let mut family = Family::new(0);
        let ev = event("e1", "2020-01-01T00:00:00", 42.0, 12.0, 2.0);
        family.append(ev.clone(), &config).unwrap();
        family.append(ev, &config).unwrap();
        assert_eq!(family.len(), 1);
    }

    #[test]
    fn test_mismatched_trace_id_is_an_error() {
        let config = Config::default();
        let mut family = Family::new(0);
        family
            .append(event("e1", "2020-01-01T00:00:00", 42.0, 12.0, 2.0), &config)
            .unwrap();
        let mut other = event("e2", "2021-01-01T00:00:00", 42.0, 12.0, 2.0);
        other.trace_id = Some("IV.OTHER..EHZ".parse().unwrap());
        assert!(family.append(other, &config).is_err());
    }

    #[test]
    fn test_family_numbers_parsing() {
        assert_eq!("all".parse::<FamilyNumbers>().unwrap(), FamilyNumbers::All);
        assert_eq!(
            "1,3,5".parse::<FamilyNumbers>().unwrap(),
            FamilyNumbers::List(vec![1, 3, 5])
        );
        let range = "2-5".parse::<FamilyNumbers>().unwrap();
        assert_eq!(range, FamilyNumbers::Range(2, 5));
        assert!(range.contains(2));
        assert!(range.contains(4));
        assert!(!range.contains(5));
        assert_eq!(
            "7".parse::<FamilyNumbers>().unwrap(),
            FamilyNumbers::List(vec![7])
        );
        assert!("x".parse::<FamilyNumbers>().is_err());
    }

    #[test]
    fn test_family_csv_round_trip_and_selection() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("families.csv");

        let mut f0 = Family::new(-1);
        f0.append(event("e1", "2020-01-01T00:00:00", 42.0, 12.0, 2.0), &config)
            .unwrap();
        f0.append(event("e2", "2021-01-01T00:00:00", 42.1, 12.1, 2.5), &config)
            .unwrap();
        let mut f1 = Family::new(-1);
        f1.append(event("e3", "2019-01-01T00:00:00", 43.0, 13.0, 1.5), &config)
            .unwrap();
        f1.append(event("e4", "2019-06-01T00:00:00", 43.1, 13.1, 1.6), &config)
            .unwrap();

        write_families(&path, &[f0, f1], &config).unwrap();
        let back = read_families(&path, &config).unwrap();
        assert_eq!(back.len(), 2);
        // Sorted by start time: f1 (2019) comes first and is renumbered 0.
        assert_eq!(back[0].number, 0);
        assert_eq!(back[0].events()[0].evid, "e3");
        assert_eq!(back[1].events()[0].evid, "e1");

        let selection = FamilySelection {
            min_events: 2,
            ..FamilySelection::default()
        };
        let selected = read_selected_families(&path, &config, &selection).unwrap();
        assert_eq!(selected.len(), 2);

        let none = FamilySelection {
            numbers: "9".parse().unwrap(),
            ..FamilySelection::default()
        };
        assert!(matches!(
            read_selected_families(&path, &config, &none),
            Err(Error::FamilyNotFound { .. })
        ));
    }

    #[test]
    fn test_flag_family_round_trip() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("families.csv");
        let mut f0 = Family::new(-1);
        f0.append(event("e1", "2020-01-01T00:00:00", 42.0, 12.0, 2.0), &config)
            .unwrap();
        f0.append(event("e2", "2021-01-01T00:00:00", 42.1, 12.1, 2.5), &config)
            .unwrap();
        write_families(&path, &[f0], &config).unwrap();

        flag_family(&path, &config, 0, false).unwrap();
        let back = read_families(&path, &config).unwrap();
        assert!(!back[0].valid);
        assert!(matches!(
            read_selected_families(&path, &config, &FamilySelection::default()),
            Err(Error::FamilyNotFound { .. })
        ));
    }
}
