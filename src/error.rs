//! Error types shared across the Requake pipelines.
//!
//! Variants carry enough context (event ids, trace ids, time ranges) to
//! reproduce the decision that raised them. Recoverable conditions are
//! limited to `NoWaveform` and, in pair mode, `SampleRateMismatch`; every
//! other variant is fatal for the pipeline that meets it.

use thiserror::Error;

/// Crate-wide error type.
///
/// The fatal/recoverable split follows the pipeline policies: the catalog
/// scanner logs and skips on `NoWaveform`, the template scanner logs and
/// skips the chunk-template combination, and everything else aborts the run.
#[derive(Error, Debug)]
pub enum Error {
    /// Waveform data could not be obtained for an event or a time window.
    /// Recoverable: callers log the reason and skip.
    #[error("no waveform data: {reason}")]
    NoWaveform { reason: String },

    /// Station metadata is entirely missing for a requested trace id.
    #[error("no metadata: {reason}")]
    NoMetadata { reason: String },

    /// Station coordinates exist but cannot be resolved at the required time.
    #[error("unable to find coordinates for trace {trace_id} at time {time}")]
    MetadataMismatch { trace_id: String, time: String },

    /// Invalid or inconsistent configuration, detected at startup.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The two traces of a correlation have different sampling intervals.
    /// Downgraded to a warning in pair mode, fatal in template-scan mode.
    #[error("sampling interval mismatch: {dt1} s vs {dt2} s")]
    SampleRateMismatch { dt1: f64, dt2: f64 },

    /// An explicit family selection matched nothing.
    #[error("{message}")]
    FamilyNotFound { message: String },

    /// The requested family exists but is flagged invalid or fails the
    /// selection filters.
    #[error("{message}")]
    InvalidFamily { message: String },

    /// Input data could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV layer failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Build a `NoWaveform` error from anything stringy.
    pub fn no_waveform(reason: impl Into<String>) -> Self {
        Error::NoWaveform {
            reason: reason.into(),
        }
    }

    /// Build a `Config` error from anything stringy.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Build a `Parse` error from anything stringy.
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }

    /// True for conditions that pipelines log and skip instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoWaveform { .. })
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_waveform_is_recoverable() {
        let err = Error::no_waveform("no data for evid abc");
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_fatal_variants_are_not_recoverable() {
        let err = Error::MetadataMismatch {
            trace_id: "NET.STA..HHZ".to_string(),
            time: "2020-01-01T00:00:00Z".to_string(),
        };
        assert!(!err.is_recoverable());

        let err = Error::SampleRateMismatch { dt1: 0.01, dt2: 0.02 };
        assert!(!err.is_recoverable());
    }
}
