//! SAC binary format support.
//!
//! This module implements the subset of the SAC format used by the
//! template pipeline: a 632-byte header (70 floats, 40 integers, 192 bytes
//! of character fields) followed by evenly sampled float32 data. Files are
//! written in little-endian order; the byte order of a file being read is
//! detected from its `nvhdr` header word.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::catalog::TraceId;
use crate::error::{Error, Result};
use crate::waveforms::trace::{duration_from_secs, Trace};

/// Number of float header words.
const N_FLOAT_WORDS: usize = 70;
/// Number of integer header words.
const N_INT_WORDS: usize = 40;
/// Size of the character field block in bytes.
const CHAR_BLOCK_SIZE: usize = 192;
/// Undefined sentinel for float header values.
const UNDEF_F: f32 = -12345.0;
/// Undefined sentinel for integer header values.
const UNDEF_I: i32 = -12345;
/// Undefined sentinel for character header values.
const UNDEF_K: &str = "-12345";

/// Detected byte order of a SAC file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// In-memory SAC file with the header fields used by the template
/// pipeline.
#[derive(Debug, Clone)]
pub struct SacFile {
    /// Sampling interval in seconds.
    pub delta: f64,
    /// Offset of the first sample from the reference time, in seconds.
    pub b: f64,
    /// Relative first-arrival (P) time, with its label.
    pub a: Option<f64>,
    pub ka: Option<String>,
    /// Relative user time 0 (S arrival here), with its label.
    pub t0: Option<f64>,
    pub kt0: Option<String>,
    /// Station coordinates.
    pub stla: Option<f64>,
    pub stlo: Option<f64>,
    pub stel: Option<f64>,
    /// Event coordinates and depth (km).
    pub evla: Option<f64>,
    pub evlo: Option<f64>,
    pub evdp: Option<f64>,
    pub mag: Option<f64>,
    /// Epicentral distance (km) and great-circle arc (deg).
    pub dist: Option<f64>,
    pub gcarc: Option<f64>,
    /// Reference time of the file.
    pub reftime: DateTime<Utc>,
    /// Channel identification.
    pub knetwk: String,
    pub kstnm: String,
    pub khole: String,
    pub kcmpnm: String,
    /// Event name.
    pub kevnm: String,
    pub data: Vec<f32>,
}

impl SacFile {
    /// Build a SAC file from a trace, with an all-undefined header apart
    /// from timing and channel identification.
    pub fn from_trace(tr: &Trace) -> Self {
        Self {
            delta: tr.dt,
            b: 0.0,
            a: None,
            ka: None,
            t0: None,
            kt0: None,
            stla: None,
            stlo: None,
            stel: None,
            evla: None,
            evlo: None,
            evdp: None,
            mag: None,
            dist: None,
            gcarc: None,
            reftime: tr.starttime,
            knetwk: tr.id.network.clone(),
            kstnm: tr.id.station.clone(),
            khole: tr.id.location.clone(),
            kcmpnm: tr.id.channel.clone(),
            kevnm: String::new(),
            data: tr.data.iter().map(|v| *v as f32).collect(),
        }
    }

    /// Convert to a trace; the start time is the reference time plus `b`.
    pub fn to_trace(&self) -> Trace {
        Trace::new(
            TraceId::new(&self.knetwk, &self.kstnm, &self.khole, &self.kcmpnm),
            self.reftime + duration_from_secs(self.b),
            self.delta,
            self.data.iter().map(|v| *v as f64).collect(),
        )
    }

    /// Read a SAC file, detecting its byte order from `nvhdr`.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut fp = BufReader::new(File::open(path)?);
        let mut raw = Vec::new();
        fp.read_to_end(&mut raw)?;
        let header_size = 4 * (N_FLOAT_WORDS + N_INT_WORDS) + CHAR_BLOCK_SIZE;
        if raw.len() < header_size {
            return Err(Error::parse(format!(
                "{}: too small for a SAC header ({} bytes)",
                path.display(),
                raw.len()
            )));
        }
        let byte_order = detect_byte_order(&raw).ok_or_else(|| {
            Error::parse(format!("{}: unrecognized SAC header version", path.display()))
        })?;
        Self::from_bytes(&raw, byte_order)
            .map_err(|e| Error::parse(format!("{}: {e}", path.display())))
    }

    fn from_bytes(raw: &[u8], byte_order: ByteOrder) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(raw);
        macro_rules! read_f32 {
            () => {
                match byte_order {
                    ByteOrder::LittleEndian => cursor.read_f32::<LittleEndian>()?,
                    ByteOrder::BigEndian => cursor.read_f32::<BigEndian>()?,
                }
            };
        }
        macro_rules! read_i32 {
            () => {
                match byte_order {
                    ByteOrder::LittleEndian => cursor.read_i32::<LittleEndian>()?,
                    ByteOrder::BigEndian => cursor.read_i32::<BigEndian>()?,
                }
            };
        }

        let mut floats = [UNDEF_F; N_FLOAT_WORDS];
        for v in floats.iter_mut() {
            *v = read_f32!();
        }
        let mut ints = [UNDEF_I; N_INT_WORDS];
        for v in ints.iter_mut() {
            *v = read_i32!();
        }
        let mut chars = [0u8; CHAR_BLOCK_SIZE];
        cursor.read_exact(&mut chars)?;

        let npts = ints[9].max(0) as usize;
        let mut data = Vec::with_capacity(npts);
        for _ in 0..npts {
            data.push(read_f32!());
        }

        let opt_f = |v: f32| {
            if v == UNDEF_F {
                None
            } else {
                Some(v as f64)
            }
        };
        let opt_k = |s: String| if s == UNDEF_K { None } else { Some(s) };
        let field =
            |start: usize, len: usize| read_char_field(&chars[start..start + len]);

        let reftime = reference_time(&ints)?;
        Ok(Self {
            delta: floats[0] as f64,
            b: opt_f(floats[5]).unwrap_or(0.0),
            a: opt_f(floats[8]),
            ka: opt_k(field(40, 8)),
            t0: opt_f(floats[10]),
            kt0: opt_k(field(48, 8)),
            stla: opt_f(floats[31]),
            stlo: opt_f(floats[32]),
            stel: opt_f(floats[33]),
            evla: opt_f(floats[35]),
            evlo: opt_f(floats[36]),
            evdp: opt_f(floats[38]),
            mag: opt_f(floats[39]),
            dist: opt_f(floats[50]),
            gcarc: opt_f(floats[53]),
            reftime,
            kstnm: clear_undef(field(0, 8)),
            kevnm: clear_undef(field(8, 16)),
            khole: clear_undef(field(24, 8)),
            kcmpnm: clear_undef(field(160, 8)),
            knetwk: clear_undef(field(168, 8)),
            data,
        })
    }

    /// Write the file in little-endian byte order.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut fp = BufWriter::new(File::create(path)?);

        let mut floats = [UNDEF_F; N_FLOAT_WORDS];
        let set_f = |slot: &mut f32, v: Option<f64>| {
            if let Some(v) = v {
                *slot = v as f32;
            }
        };
        floats[0] = self.delta as f32;
        floats[5] = self.b as f32;
        floats[6] = (self.b + self.delta * self.data.len().saturating_sub(1) as f64) as f32;
        set_f(&mut floats[8], self.a);
        set_f(&mut floats[10], self.t0);
        set_f(&mut floats[31], self.stla);
        set_f(&mut floats[32], self.stlo);
        set_f(&mut floats[33], self.stel);
        set_f(&mut floats[35], self.evla);
        set_f(&mut floats[36], self.evlo);
        set_f(&mut floats[38], self.evdp);
        set_f(&mut floats[39], self.mag);
        set_f(&mut floats[50], self.dist);
        set_f(&mut floats[53], self.gcarc);
        if !self.data.is_empty() {
            let min = self.data.iter().copied().fold(f32::INFINITY, f32::min);
            let max = self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mean = self.data.iter().sum::<f32>() / self.data.len() as f32;
            floats[1] = min;
            floats[2] = max;
            floats[56] = mean;
        }

        let mut ints = [UNDEF_I; N_INT_WORDS];
        ints[0] = self.reftime.year();
        ints[1] = self.reftime.ordinal() as i32;
        ints[2] = self.reftime.hour() as i32;
        ints[3] = self.reftime.minute() as i32;
        ints[4] = self.reftime.second() as i32;
        ints[5] = (self.reftime.nanosecond() / 1_000_000) as i32;
        ints[6] = 6; // nvhdr
        ints[9] = self.data.len() as i32;
        ints[15] = 1; // iftype: time series
        ints[35] = 1; // leven: evenly spaced

        let mut chars = [b' '; CHAR_BLOCK_SIZE];
        for (i, slot) in chars.iter_mut().enumerate() {
            // Initialize every 8-byte field (16 for kevnm) as undefined.
            let field_start = if (8..24).contains(&i) { 8 } else { i - i % 8 };
            let undef = UNDEF_K.as_bytes();
            let pos = i - field_start;
            if pos < undef.len() {
                *slot = undef[pos];
            }
        }
        let mut put = |start: usize, len: usize, value: &str| {
            let bytes = value.as_bytes();
            for i in 0..len {
                chars[start + i] = if i < bytes.len() { bytes[i] } else { b' ' };
            }
        };
        put(0, 8, &self.kstnm);
        put(8, 16, &self.kevnm);
        put(24, 8, &self.khole);
        if let Some(ka) = &self.ka {
            put(40, 8, ka);
        }
        if let Some(kt0) = &self.kt0 {
            put(48, 8, kt0);
        }
        put(160, 8, &self.kcmpnm);
        put(168, 8, &self.knetwk);

        for v in floats {
            fp.write_f32::<LittleEndian>(v)?;
        }
        for v in ints {
            fp.write_i32::<LittleEndian>(v)?;
        }
        fp.write_all(&chars)?;
        for v in &self.data {
            fp.write_f32::<LittleEndian>(*v)?;
        }
        fp.flush()?;
        Ok(())
    }
}

/// Decide the byte order from the header version word (`nvhdr`, word 76).
fn detect_byte_order(raw: &[u8]) -> Option<ByteOrder> {
    let offset = 4 * (N_FLOAT_WORDS + 6);
    let word: [u8; 4] = raw[offset..offset + 4].try_into().ok()?;
    let le = i32::from_le_bytes(word);
    let be = i32::from_be_bytes(word);
    if (1..=7).contains(&le) {
        Some(ByteOrder::LittleEndian)
    } else if (1..=7).contains(&be) {
        Some(ByteOrder::BigEndian)
    } else {
        None
    }
}

/// Build the reference time from the `nz*` header words.
fn reference_time(ints: &[i32; N_INT_WORDS]) -> Result<DateTime<Utc>> {
    if ints[0] == UNDEF_I {
        return Err(Error::parse("SAC reference time is undefined"));
    }
    let date = NaiveDate::from_yo_opt(ints[0], ints[1].max(1) as u32)
        .ok_or_else(|| Error::parse("invalid SAC reference date"))?;
    let time = date
        .and_hms_milli_opt(
            ints[2].max(0) as u32,
            ints[3].max(0) as u32,
            ints[4].max(0) as u32,
            ints[5].max(0) as u32,
        )
        .ok_or_else(|| Error::parse("invalid SAC reference time"))?;
    Ok(Utc.from_utc_datetime(&time))
}

/// Decode a fixed-width character field, trimming the space padding.
fn read_char_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Map the undefined sentinel to an empty string.
fn clear_undef(s: String) -> String {
    if s == UNDEF_K {
        String::new()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_utc_datetime;

    fn sample_trace() -> Trace {
        Trace::new(
            "IV.MMN..EHZ".parse().unwrap(),
            parse_utc_datetime("2021-05-06T07:08:09.250").unwrap(),
            0.01,
            (0..500).map(|i| (i as f64 * 0.1).sin()).collect(),
        )
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.sac");

        let tr = sample_trace();
        let mut sac = SacFile::from_trace(&tr);
        sac.a = Some(1.5);
        sac.ka = Some("Ptheo".to_string());
        sac.t0 = Some(2.75);
        sac.kt0 = Some("Stheo".to_string());
        sac.stla = Some(43.0);
        sac.stlo = Some(12.5);
        sac.stel = Some(800.0);
        sac.evla = Some(42.9);
        sac.evlo = Some(12.6);
        sac.evdp = Some(9.5);
        sac.kevnm = "average03".to_string();
        sac.write(&path).unwrap();

        let back = SacFile::read(&path).unwrap();
        assert_eq!(back.data.len(), 500);
        assert!((back.delta - 0.01).abs() < 1e-9);
        assert_eq!(back.reftime, tr.starttime);
        assert_eq!(back.a, Some(1.5));
        assert_eq!(back.ka.as_deref(), Some("Ptheo"));
        assert_eq!(back.t0, Some(2.75));
        assert_eq!(back.kt0.as_deref(), Some("Stheo"));
        assert_eq!(back.evdp, Some(9.5));
        assert_eq!(back.kevnm, "average03");
        assert_eq!(back.kstnm, "MMN");
        assert_eq!(back.knetwk, "IV");
        assert_eq!(back.kcmpnm, "EHZ");

        let round = back.to_trace();
        assert_eq!(round.id, tr.id);
        assert_eq!(round.starttime, tr.starttime);
        for (a, b) in round.data.iter().zip(tr.data.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_undefined_fields_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.sac");
        SacFile::from_trace(&sample_trace()).write(&path).unwrap();
        let back = SacFile::read(&path).unwrap();
        assert_eq!(back.a, None);
        assert_eq!(back.ka, None);
        assert_eq!(back.stla, None);
        assert_eq!(back.kevnm, "");
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.sac");
        std::fs::write(&path, [0u8; 100]).unwrap();
        assert!(SacFile::read(&path).is_err());
    }
}
