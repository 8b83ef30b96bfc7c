//! Run configuration.
//!
//! The configuration is read once from a TOML file, validated, and passed
//! by reference to the pipelines; nothing in the crate mutates it after
//! startup. Derived output paths are rooted in `outdir`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::TraceId;
use crate::error::{Error, Result};

/// Clustering strategy of the family builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusteringAlgorithm {
    #[serde(rename = "shared")]
    Shared,
    #[serde(rename = "UPGMA")]
    Upgma,
}

/// Sort key for the family CSV output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortFamiliesBy {
    Time,
    Longitude,
    Latitude,
    Depth,
    DistanceFrom,
}

/// Magnitude-to-slip conversion model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MagToSlipModel {
    #[serde(rename = "NJ1998")]
    NadeauJohnson1998,
    #[serde(rename = "B2001")]
    Beeler2001,
    #[serde(rename = "E1957")]
    Eshelby1957,
}

/// Complete run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Output directory for every pipeline product.
    pub outdir: PathBuf,

    /// Ordered list of candidate station channels for pair similarity.
    pub catalog_trace_id: Vec<TraceId>,
    /// Maximum inter-event distance (km) that admits a pair.
    pub catalog_search_range: f64,

    /// Directory of per-event pre-cut traces, selected by evid substring.
    pub event_data_path: Option<PathBuf>,
    /// Root of a continuous per-station archive.
    pub sds_data_path: Option<PathBuf>,
    /// Station metadata CSV path.
    pub station_metadata_path: Option<PathBuf>,

    /// Seconds before the predicted P arrival included in event windows.
    #[serde(rename = "cc_pre_P")]
    pub cc_pre_p: f64,
    /// Total seconds per event window.
    pub cc_trace_length: f64,
    /// Bandpass corners (Hz) applied before correlation.
    pub cc_freq_min: f64,
    pub cc_freq_max: f64,
    /// Maximum absolute lag (s) explored in pair correlation.
    pub cc_max_shift: f64,
    /// Pick the correlation peak by absolute value.
    pub cc_allow_negative: bool,
    /// Correlation threshold used by the family builder.
    pub cc_min: f64,

    pub clustering_algorithm: ClusteringAlgorithm,
    pub sort_families_by: SortFamiliesBy,
    /// Reference point, required only for `sort_families_by =
    /// "distance_from"`.
    pub distance_from_lon: Option<f64>,
    pub distance_from_lat: Option<f64>,

    /// Unit-peak normalization of each member before stacking.
    pub normalize_traces_before_averaging: bool,

    /// Continuous scan window.
    pub template_start_time: Option<String>,
    pub template_end_time: Option<String>,
    /// Scan chunking (s).
    pub time_chunk: f64,
    pub time_chunk_overlap: f64,
    /// Trigger threshold of the template scanner.
    pub min_cc_mad_ratio: f64,

    /// Magnitude-to-slip model and its parameters.
    pub mag_to_slip_model: MagToSlipModel,
    /// Static stress drop (MPa).
    pub static_stress_drop: f64,
    /// Rigidity (GPa).
    pub rigidity: f64,
    /// Strain hardening coefficient (MPa/cm).
    pub strain_hardening: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("requake_out"),
            catalog_trace_id: Vec::new(),
            catalog_search_range: 10.0,
            event_data_path: None,
            sds_data_path: None,
            station_metadata_path: None,
            cc_pre_p: 1.0,
            cc_trace_length: 30.0,
            cc_freq_min: 1.0,
            cc_freq_max: 10.0,
            cc_max_shift: 2.0,
            cc_allow_negative: false,
            cc_min: 0.9,
            clustering_algorithm: ClusteringAlgorithm::Shared,
            sort_families_by: SortFamiliesBy::Time,
            distance_from_lon: None,
            distance_from_lat: None,
            normalize_traces_before_averaging: false,
            template_start_time: None,
            template_end_time: None,
            time_chunk: 86400.0,
            time_chunk_overlap: 3600.0,
            min_cc_mad_ratio: 10.0,
            mag_to_slip_model: MagToSlipModel::NadeauJohnson1998,
            static_stress_drop: 10.0,
            rigidity: 30.0,
            strain_hardening: 0.005,
        }
    }
}

impl Config {
    /// Read and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "unable to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let config: Config =
            toml::from_str(&text).map_err(|e| Error::config(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check option consistency. Violations are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.cc_freq_min >= self.cc_freq_max {
            return Err(Error::config(format!(
                "cc_freq_min ({}) must be below cc_freq_max ({})",
                self.cc_freq_min, self.cc_freq_max
            )));
        }
        if self.sort_families_by == SortFamiliesBy::DistanceFrom
            && (self.distance_from_lon.is_none() || self.distance_from_lat.is_none())
        {
            return Err(Error::config(
                "\"sort_families_by\" set to \"distance_from\", but \"distance_from_lon\" \
                 and/or \"distance_from_lat\" are not specified",
            ));
        }
        if self.cc_trace_length <= 0.0 {
            return Err(Error::config("cc_trace_length must be positive"));
        }
        if self.time_chunk <= 0.0 {
            return Err(Error::config("time_chunk must be positive"));
        }
        Ok(())
    }

    /// Require a non-empty candidate trace id list (pair scanning).
    pub fn require_trace_ids(&self) -> Result<&[TraceId]> {
        if self.catalog_trace_id.is_empty() {
            return Err(Error::config(
                "no \"catalog_trace_id\" defined in the config file",
            ));
        }
        Ok(&self.catalog_trace_id)
    }

    /// Stored catalog file (FDSN text).
    pub fn catalog_file(&self) -> PathBuf {
        self.outdir.join("requake.catalog.txt")
    }

    /// Pair stream CSV produced by `scan-catalog`.
    pub fn pairs_file(&self) -> PathBuf {
        self.outdir.join("requake.event_pairs.csv")
    }

    /// Family CSV produced by `build-families`.
    pub fn families_file(&self) -> PathBuf {
        self.outdir.join("requake.event_families.csv")
    }

    /// Directory of per-family SAC templates.
    pub fn template_dir(&self) -> PathBuf {
        self.outdir.join("templates")
    }

    /// Directory of per-template detection catalogs.
    pub fn template_catalog_dir(&self) -> PathBuf {
        self.outdir.join("template_catalogs")
    }
}
