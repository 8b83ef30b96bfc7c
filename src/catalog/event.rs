//! Event and trace-id records.
//!
//! An `Event` mirrors the fields of the FDSN text file format, plus an
//! optional bound trace id. Events compare equal on `(evid, trace_id)`,
//! hash on `evid` alone and sort by origin time.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Four-field channel identifier `network.station.location.channel`.
///
/// An empty network code round-trips through the dotted form as the literal
/// `@@`. Dots inside any field are replaced with underscores before the id
/// is used as a key or emitted to output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraceId {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl TraceId {
    /// Build a trace id, sanitizing inner dots to underscores.
    pub fn new(network: &str, station: &str, location: &str, channel: &str) -> Self {
        let fix = |s: &str| s.replace('.', "_");
        Self {
            network: fix(if network == "@@" { "" } else { network }),
            station: fix(station),
            location: fix(location),
            channel: fix(channel),
        }
    }

    /// Dotted form with `@@` standing in for an empty network code, used
    /// wherever the id must survive a round trip through a dotted string.
    pub fn padded(&self) -> String {
        let net = if self.network.is_empty() {
            "@@"
        } else {
            &self.network
        };
        format!(
            "{}.{}.{}.{}",
            net, self.station, self.location, self.channel
        )
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

impl FromStr for TraceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split('.').collect();
        if fields.len() != 4 {
            return Err(Error::parse(format!(
                "invalid trace id '{s}': expected network.station.location.channel"
            )));
        }
        Ok(TraceId::new(fields[0], fields[1], fields[2], fields[3]))
    }
}

impl TryFrom<String> for TraceId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.to_string()
    }
}

/// A single cataloged earthquake.
///
/// Contains the same fields as the FDSN text file format, plus the trace id
/// bound to the event during pair scanning. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub evid: String,
    pub orig_time: DateTime<Utc>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Depth in km, non-negative after sanitation.
    pub depth: Option<f64>,
    pub mag_type: Option<String>,
    pub mag: Option<f64>,
    pub author: Option<String>,
    pub catalog: Option<String>,
    pub contributor: Option<String>,
    pub contributor_id: Option<String>,
    pub mag_author: Option<String>,
    pub location_name: Option<String>,
    pub trace_id: Option<TraceId>,
}

impl Event {
    /// Minimal event with the mandatory identification fields.
    pub fn new(evid: impl Into<String>, orig_time: DateTime<Utc>) -> Self {
        Self {
            evid: evid.into(),
            orig_time,
            lat: None,
            lon: None,
            depth: None,
            mag_type: None,
            mag: None,
            author: None,
            catalog: None,
            contributor: None,
            contributor_id: None,
            mag_author: None,
            location_name: None,
            trace_id: None,
        }
    }

    /// Depth clipped to non-negative values, in km.
    pub fn depth_or_zero(&self) -> f64 {
        self.depth.unwrap_or(0.0).max(0.0)
    }

    /// Parse one line in FDSN text file format.
    pub fn from_fdsn_text(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim().split('|').collect();
        if fields.len() < 13 {
            return Err(Error::parse(format!("invalid FDSN text line: {line}")));
        }
        let opt = |s: &str| {
            let s = s.trim();
            if s.is_empty() || s == "None" {
                None
            } else {
                Some(s.to_string())
            }
        };
        Ok(Self {
            evid: fields[0].trim().to_string(),
            orig_time: parse_utc_datetime(fields[1].trim())?,
            lat: float_or_none(fields[2]),
            lon: float_or_none(fields[3]),
            depth: float_or_none(fields[4]),
            author: opt(fields[5]),
            catalog: opt(fields[6]),
            contributor: opt(fields[7]),
            contributor_id: opt(fields[8]),
            mag_type: opt(fields[9]),
            mag: float_or_none(fields[10]),
            mag_author: opt(fields[11]),
            location_name: opt(fields[12]),
            trace_id: None,
        })
    }

    /// Format as one line in FDSN text file format.
    ///
    /// Missing fields are written as empty-between-pipes.
    pub fn fdsn_text(&self) -> String {
        let num = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        let txt = |v: &Option<String>| v.clone().unwrap_or_default();
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.evid,
            self.orig_time.format("%Y-%m-%dT%H:%M:%S"),
            num(self.lat),
            num(self.lon),
            num(self.depth),
            txt(&self.author),
            txt(&self.catalog),
            txt(&self.contributor),
            txt(&self.contributor_id),
            txt(&self.mag_type),
            num(self.mag),
            txt(&self.mag_author),
            txt(&self.location_name),
        )
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.evid == other.evid && self.trace_id == other.trace_id
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.evid.hash(state);
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let num = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.evid,
            self.orig_time.format("%Y-%m-%dT%H:%M:%S"),
            num(self.lon),
            num(self.lat),
            num(self.depth),
            self.mag_type.as_deref().unwrap_or("-"),
            num(self.mag),
        )
    }
}

/// Parse a float field, returning `None` when the field is empty or not a
/// number.
pub fn float_or_none(s: &str) -> Option<f64> {
    s.trim().parse().ok()
}

/// Parse a UTC instant from the formats found in catalog files.
///
/// Accepts RFC 3339 as well as naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` and the
/// space-separated and slash-separated variants; naive times are taken as
/// UTC.
pub fn parse_utc_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    const FORMATS: [&str; 6] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y/%m/%dT%H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S%.f",
        "%Y%m%dT%H%M%S%.f",
        "%Y-%m-%d",
    ];
    for fmt in FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(t.and_utc());
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc());
        }
    }
    Err(Error::parse(format!("unable to parse time '{s}'")))
}

/// Number of seconds in a leap year.
const SECONDS_PER_LEAP_YEAR: i64 = 366 * 24 * 3600;

/// Generate an event id from an origin time.
///
/// The id is `reqk` + year + a six-letter base-26 code of the elapsed
/// seconds since January 1st, normalized over a leap year. A pure function
/// of the origin time.
pub fn generate_evid(orig_time: DateTime<Utc>) -> String {
    let year = orig_time.year();
    let year_start = Utc
        .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .expect("January 1st is valid");
    let elapsed = (orig_time - year_start).num_seconds();
    let maxval = 26_i64.pow(6) - 1;
    let normval = elapsed * maxval / SECONDS_PER_LEAP_YEAR;
    format!("reqk{year}{}", base26(normval))
}

/// Represent a value with 6 characters of the latin alphabet, left-padded
/// with `a`.
fn base26(mut val: i64) -> String {
    let chars = b"abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(chars[(val % 26) as usize] as char);
        val /= 26;
        if val == 0 {
            break;
        }
    }
    while out.len() < 6 {
        out.push('a');
    }
    out.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(s: &str) -> DateTime<Utc> {
        parse_utc_datetime(s).unwrap()
    }

    #[test]
    fn test_trace_id_round_trip() {
        let id: TraceId = "IV.MMN..EHZ".parse().unwrap();
        assert_eq!(id.network, "IV");
        assert_eq!(id.location, "");
        assert_eq!(id.to_string(), "IV.MMN..EHZ");
    }

    #[test]
    fn test_trace_id_empty_network_padding() {
        let id: TraceId = "@@.STA01.00.HHZ".parse().unwrap();
        assert_eq!(id.network, "");
        assert_eq!(id.to_string(), ".STA01.00.HHZ");
        assert_eq!(id.padded(), "@@.STA01.00.HHZ");
    }

    #[test]
    fn test_trace_id_dots_become_underscores() {
        let id = TraceId::new("NE", "ST.A", "", "HH.Z");
        assert_eq!(id.station, "ST_A");
        assert_eq!(id.channel, "HH_Z");
    }

    #[test]
    fn test_fdsn_text_round_trip() {
        let line = "ev0001|2021-03-04T05:06:07|43.21|12.34|8.5|INGV|cat|ctr|1|ML|2.3|INGV|Central Italy";
        let ev = Event::from_fdsn_text(line).unwrap();
        assert_eq!(ev.evid, "ev0001");
        assert_eq!(ev.lat, Some(43.21));
        assert_eq!(ev.mag, Some(2.3));
        assert_eq!(ev.location_name.as_deref(), Some("Central Italy"));
        assert_eq!(ev.fdsn_text(), line);
    }

    #[test]
    fn test_fdsn_text_missing_fields() {
        let line = "ev0002|2021-03-04T05:06:07|||||||||||";
        let ev = Event::from_fdsn_text(line).unwrap();
        assert_eq!(ev.lat, None);
        assert_eq!(ev.mag, None);
        assert_eq!(ev.mag_type, None);
        assert_eq!(ev.fdsn_text(), line);
    }

    #[test]
    fn test_equality_is_evid_and_trace_id() {
        let mut a = Event::new("ev1", time("2021-01-01T00:00:00"));
        let mut b = Event::new("ev1", time("2022-01-01T00:00:00"));
        assert_eq!(a, b);
        a.trace_id = Some("IV.MMN..EHZ".parse().unwrap());
        assert_ne!(a, b);
        b.trace_id = Some("IV.MMN..EHZ".parse().unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_evid_is_pure() {
        let t = time("2021-06-15T12:00:00");
        let a = generate_evid(t);
        let b = generate_evid(t);
        assert_eq!(a, b);
        assert!(a.starts_with("reqk2021"));
        assert_eq!(a.len(), "reqk2021".len() + 6);
    }

    #[test]
    fn test_generate_evid_start_of_year() {
        let t = time("2021-01-01T00:00:00");
        assert_eq!(generate_evid(t), "reqk2021aaaaaa");
    }

    #[test]
    fn test_generate_evid_monotonic_within_year() {
        let a = generate_evid(time("2021-02-01T00:00:00"));
        let b = generate_evid(time("2021-11-01T00:00:00"));
        assert!(b > a);
    }

    #[test]
    fn test_parse_utc_datetime_variants() {
        assert_eq!(
            parse_utc_datetime("2021-03-04T05:06:07.25").unwrap(),
            parse_utc_datetime("2021-03-04 05:06:07.250000").unwrap()
        );
        assert!(parse_utc_datetime("2021-03-04T05:06:07Z").is_ok());
        assert!(parse_utc_datetime("not a date").is_err());
    }
}
