//! Catalog ingestion from loosely formatted CSV files.
//!
//! The delimiter is sniffed from the first lines of the file and column
//! names are mapped onto the canonical vocabulary by longest-substring
//! matching. Origin times may come as a single column or split into
//! date-time components; missing event ids are generated from the origin
//! time.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{Duration, TimeZone, Utc};
use log::{debug, info};

use crate::catalog::event::float_or_none;
use crate::catalog::{generate_evid, parse_utc_datetime, Catalog, Event};
use crate::error::{Error, Result};
use crate::formulas::guess_field_names;

/// Canonical column vocabulary for catalog CSV files.
const FIELD_GUESSES: [(&str, &[&str]); 13] = [
    ("evid", &["evid", "event_id", "eventid", "id"]),
    (
        "orig_time",
        &[
            "time",
            "orig_time",
            "origin_time",
            "origin_time_utc",
            "origin_time_iso",
        ],
    ),
    ("year", &["year", "yr", "yyyy"]),
    ("month", &["month", "mon", "mo", "mm"]),
    ("day", &["day", "dy", "dd"]),
    ("hour", &["hour", "hr", "h", "hh"]),
    ("minute", &["minute", "min"]),
    ("seconds", &["seconds", "second", "sec", "s", "ss"]),
    ("lat", &["lat", "latitude"]),
    ("lon", &["lon", "longitude"]),
    ("depth", &["depth", "depth_km"]),
    ("mag", &["mag", "magnitude"]),
    ("mag_type", &["mag_type", "magnitude_type"]),
];

/// Sniff the delimiter by counting separators over the first lines.
fn sniff_delimiter(path: &Path) -> Result<u8> {
    const N_FIRST_LINES: usize = 5;
    let fp = BufReader::new(File::open(path)?);
    let mut commas = 0;
    let mut semicolons = 0;
    for line in fp.lines().take(N_FIRST_LINES) {
        let line = line?;
        commas += line.matches(',').count();
        semicolons += line.matches(';').count();
    }
    if commas >= N_FIRST_LINES {
        Ok(b',')
    } else if semicolons >= N_FIRST_LINES {
        Ok(b';')
    } else {
        Ok(b' ')
    }
}

/// Assemble an origin time from split date-time component columns.
fn time_from_components(row: &HashMap<&str, &str>) -> Result<chrono::DateTime<Utc>> {
    let int_field = |name: &str| -> Result<u32> {
        row.get(name)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .ok_or_else(|| Error::parse(format!("missing or invalid '{name}' column")))
    };
    let year = row
        .get("year")
        .and_then(|v| v.trim().parse::<i32>().ok())
        .ok_or_else(|| Error::parse("missing or invalid 'year' column"))?;
    let seconds: f64 = row
        .get("seconds")
        .and_then(|v| float_or_none(v))
        .ok_or_else(|| Error::parse("missing or invalid 'seconds' column"))?;
    let base = Utc
        .with_ymd_and_hms(
            year,
            int_field("month")?,
            int_field("day")?,
            int_field("hour")?,
            int_field("minute")?,
            0,
        )
        .single()
        .ok_or_else(|| Error::parse("invalid date-time components"))?;
    Ok(base + Duration::microseconds((seconds * 1e6).round() as i64))
}

/// Read a catalog from a CSV file.
///
/// Fails when neither an origin-time column nor the full set of date-time
/// component columns can be identified.
pub fn read_catalog_from_csv(path: impl AsRef<Path>) -> Result<Catalog> {
    let path = path.as_ref();
    let delimiter = sniff_delimiter(path)?;
    debug!(
        "CSV delimiter detected: {:?}",
        char::from(delimiter)
    );
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let fields = guess_field_names(&headers, &FIELD_GUESSES);
    if fields.is_empty() {
        return Err(Error::parse("unable to identify any CSV column"));
    }
    for (name, header) in &fields {
        info!("column identified: \"{header}\" --> \"{name}\"");
    }
    let has_components = ["year", "month", "day", "hour", "minute", "seconds"]
        .iter()
        .all(|name| fields.contains_key(name));
    if !fields.contains_key("orig_time") && !has_components {
        return Err(Error::parse(
            "unable to identify all the necessary date-time columns",
        ));
    }

    let header_index: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), i))
        .collect();
    let mut catalog = Catalog::new();
    for record in reader.records() {
        let record = record?;
        let row: HashMap<&str, &str> = fields
            .iter()
            .filter_map(|(name, header)| {
                header_index
                    .get(header)
                    .and_then(|i| record.get(*i))
                    .map(|value| (*name, value))
            })
            .collect();
        let orig_time = match row.get("orig_time") {
            Some(value) => parse_utc_datetime(value)?,
            None => time_from_components(&row)?,
        };
        let evid = match row.get("evid").filter(|v| !v.trim().is_empty()) {
            Some(value) => value.to_string(),
            None => generate_evid(orig_time),
        };
        let mut ev = Event::new(evid, orig_time);
        ev.lat = row.get("lat").and_then(|v| float_or_none(v));
        ev.lon = row.get("lon").and_then(|v| float_or_none(v));
        ev.depth = row.get("depth").and_then(|v| float_or_none(v));
        ev.mag = row.get("mag").and_then(|v| float_or_none(v));
        ev.mag_type = row
            .get("mag_type")
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.to_string());
        catalog.push(ev);
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comma_delimited_with_orig_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(
            &path,
            "event_id,origin_time,latitude,longitude,depth_km,magnitude\n\
             ev1,2021-01-02T03:04:05,43.1,12.2,7.5,2.1\n\
             ev2,2021-02-03T04:05:06,43.2,12.3,8.0,2.4\n",
        )
        .unwrap();
        let cat = read_catalog_from_csv(&path).unwrap();
        assert_eq!(cat.len(), 2);
        assert_eq!(cat[0].evid, "ev1");
        assert_eq!(cat[0].lat, Some(43.1));
        assert_eq!(cat[1].mag, Some(2.4));
    }

    #[test]
    fn test_split_datetime_components_and_generated_evid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(
            &path,
            "year,month,day,hour,minute,seconds,lat,lon,depth,mag\n\
             2021,3,4,5,6,7.5,43.1,12.2,9.0,1.8\n",
        )
        .unwrap();
        let cat = read_catalog_from_csv(&path).unwrap();
        assert_eq!(cat.len(), 1);
        assert!(cat[0].evid.starts_with("reqk2021"));
        assert_eq!(
            cat[0].orig_time,
            parse_utc_datetime("2021-03-04T05:06:07.5").unwrap()
        );
    }

    #[test]
    fn test_semicolon_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(
            &path,
            "evid;time;lat;lon\nev1;2021-01-01T00:00:00;1.0;2.0\n\
             ev2;2021-01-02T00:00:00;1.5;2.5\n",
        )
        .unwrap();
        let cat = read_catalog_from_csv(&path).unwrap();
        assert_eq!(cat.len(), 2);
        assert_eq!(cat[1].lon, Some(2.5));
    }

    #[test]
    fn test_missing_time_columns_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(&path, "evid,lat,lon\nev1,1.0,2.0\n").unwrap();
        assert!(read_catalog_from_csv(&path).is_err());
    }
}
