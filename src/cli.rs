//! Command-line surface.
//!
//! Thin dispatch layer: parses the arguments, loads and validates the
//! configuration, builds the waveform provider chain and runs the
//! requested pipeline. Fatal errors are logged and turned into a non-zero
//! exit code; partial output files stay parseable because every pipeline
//! flushes row by row.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::{error, info};
use serde::Serialize;

use crate::catalog::{read_catalog_from_csv, Catalog};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::families::family::{
    read_selected_families, FamilyNumbers, FamilySelection,
};
use crate::families::{build_families, build_templates, flag_family};
use crate::scan::{scan_catalog, scan_templates};
use crate::waveforms::provider::{
    ChainProvider, ContinuousArchiveProvider, EventDirectoryProvider, WaveformProvider,
};
use crate::waveforms::station::StationCsv;

#[derive(Debug, Parser)]
#[command(name = "requake", version, about = "Repeating earthquakes search and analysis")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "requake.conf")]
    config: PathBuf,

    /// Output directory, overriding the configured one.
    #[arg(short, long)]
    outdir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read an event catalog from a file into the output directory.
    ReadCatalog {
        /// Catalog file, in FDSN text or CSV format.
        catalog_file: PathBuf,
        /// Append to the stored catalog instead of replacing it.
        #[arg(long)]
        append: bool,
    },
    /// Cross-correlate every eligible event pair of the stored catalog.
    ScanCatalog,
    /// Build families of repeating earthquakes from the pair stream.
    BuildFamilies,
    /// Build a waveform template for each selected family.
    BuildTemplates {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Scan continuous data with the selected family templates.
    ScanTemplates {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Flag a family as valid or not valid.
    FlagFamily {
        family_number: i64,
        /// `valid` or `invalid`.
        flag: String,
    },
    /// Print families to standard output.
    PrintFamilies {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Output format: simple, csv or json.
        #[arg(long, default_value = "simple")]
        format: String,
    },
    /// Write a sample configuration file to standard output.
    SampleConfig,
}

/// Family selection filters shared by the template commands.
#[derive(Debug, Args)]
struct SelectionArgs {
    /// Family numbers: `all`, a comma list, an `a-b` range or a single
    /// number.
    #[arg(short = 'f', long, default_value = "all")]
    family_numbers: String,

    /// Only use families lasting longer than this value (seconds).
    #[arg(long, default_value_t = 0.0)]
    longerthan: f64,

    /// Only use families lasting shorter than this value (seconds).
    #[arg(long)]
    shorterthan: Option<f64>,

    /// Minimum number of events in a family.
    #[arg(long, default_value_t = 0)]
    minevents: usize,
}

impl SelectionArgs {
    fn to_selection(&self) -> Result<FamilySelection> {
        Ok(FamilySelection {
            numbers: self.family_numbers.parse::<FamilyNumbers>()?,
            longer_than: self.longerthan,
            shorter_than: self.shorterthan.unwrap_or(f64::INFINITY),
            min_events: self.minevents,
        })
    }
}

/// Parse the arguments, run the selected pipeline and return the process
/// exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(()) => 0,
        Err(err) => {
            error!("{err}");
            1
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    if matches!(cli.command, Command::SampleConfig) {
        let sample =
            toml::to_string_pretty(&Config::default()).map_err(|e| Error::config(e.to_string()))?;
        print!("{sample}");
        return Ok(());
    }

    let mut config = Config::from_file(&cli.config)?;
    if let Some(outdir) = cli.outdir {
        config.outdir = outdir;
    }
    std::fs::create_dir_all(&config.outdir)?;

    match cli.command {
        Command::ReadCatalog {
            catalog_file,
            append,
        } => read_catalog(&config, &catalog_file, append),
        Command::ScanCatalog => {
            let provider = build_provider(&config)?;
            scan_catalog(&provider, &config)
        }
        Command::BuildFamilies => build_families(&config),
        Command::BuildTemplates { selection } => {
            let provider = build_provider(&config)?;
            build_templates(&provider, &config, &selection.to_selection()?)
        }
        Command::ScanTemplates { selection } => {
            let provider = build_provider(&config)?;
            scan_templates(&provider, &config, &selection.to_selection()?)
        }
        Command::FlagFamily {
            family_number,
            flag,
        } => {
            let valid = match flag.as_str() {
                "valid" => true,
                "invalid" => false,
                other => {
                    return Err(Error::config(format!(
                        "invalid flag \"{other}\": use \"valid\" or \"invalid\""
                    )))
                }
            };
            flag_family(config.families_file(), &config, family_number, valid)
        }
        Command::PrintFamilies { selection, format } => {
            print_families(&config, &selection.to_selection()?, &format)
        }
        Command::SampleConfig => unreachable!("handled before configuration loading"),
    }
}

/// Assemble the provider chain from the configured local data sources.
fn build_provider(config: &Config) -> Result<ChainProvider> {
    let station_csv = match &config.station_metadata_path {
        Some(path) => Some(StationCsv::read(path)?),
        None => None,
    };
    let mut providers: Vec<Box<dyn WaveformProvider>> = Vec::new();
    if let Some(path) = &config.event_data_path {
        providers.push(Box::new(EventDirectoryProvider::new(
            path.clone(),
            station_csv.clone(),
        )));
    }
    if let Some(path) = &config.sds_data_path {
        providers.push(Box::new(ContinuousArchiveProvider::new(
            path.clone(),
            station_csv.clone(),
        )));
    }
    if providers.is_empty() {
        return Err(Error::config(
            "no waveform source configured: set \"event_data_path\" and/or \"sds_data_path\"",
        ));
    }
    Ok(ChainProvider::new(providers))
}

/// Read a catalog file (FDSN text, falling back to CSV) into the stored
/// catalog.
fn read_catalog(config: &Config, catalog_file: &PathBuf, append: bool) -> Result<()> {
    let mut catalog = Catalog::new();
    let mut nevs_read = 0;
    if append {
        if catalog.read(config.catalog_file()).is_ok() {
            nevs_read = catalog.len();
            info!(
                "{nevs_read} events read from {}",
                config.catalog_file().display()
            );
        }
    }
    info!("reading catalog...");
    let mut incoming = Catalog::new();
    if incoming.read(catalog_file).is_err() {
        incoming = read_catalog_from_csv(catalog_file).map_err(|e| {
            Error::parse(format!(
                "error reading catalog file {}: {e}",
                catalog_file.display()
            ))
        })?;
    }
    catalog.extend(incoming.iter().cloned());
    if catalog.is_empty() {
        return Err(Error::parse("no event read"));
    }
    catalog.deduplicate();
    catalog.sort();
    catalog.write(config.catalog_file())?;
    info!(
        "{} events written to {}",
        catalog.len() - nevs_read,
        config.catalog_file().display()
    );
    Ok(())
}

/// Aggregate view of one family for the print command.
#[derive(Debug, Serialize)]
struct FamilySummary {
    number: i64,
    nevents: usize,
    lon: Option<f64>,
    lat: Option<f64>,
    depth_km: Option<f64>,
    start_time: Option<String>,
    end_time: Option<String>,
    duration_years: f64,
    mag_min: Option<f64>,
    mag_max: Option<f64>,
    cumul_slip_cm: Option<f64>,
    slip_rate_cm_per_year: Option<f64>,
    valid: bool,
}

fn print_families(config: &Config, selection: &FamilySelection, format: &str) -> Result<()> {
    let families = read_selected_families(config.families_file(), config, selection)?;
    let summaries: Vec<FamilySummary> = families
        .iter()
        .map(|family| FamilySummary {
            number: family.number,
            nevents: family.len(),
            lon: family.lon,
            lat: family.lat,
            depth_km: family.depth,
            start_time: family.starttime.map(|t| t.to_rfc3339()),
            end_time: family.endtime.map(|t| t.to_rfc3339()),
            duration_years: family.duration,
            mag_min: family.magmin,
            mag_max: family.magmax,
            cumul_slip_cm: family.cumul_slip,
            slip_rate_cm_per_year: family.slip_rate,
            valid: family.valid,
        })
        .collect();
    match format {
        "simple" => {
            for s in &summaries {
                println!(
                    "{:3} {:3} {:9.4} {:8.4} {:7.3} {} {} {:5.1} {:3.1} {:3.1} {}",
                    s.number,
                    s.nevents,
                    s.lon.unwrap_or(f64::NAN),
                    s.lat.unwrap_or(f64::NAN),
                    s.depth_km.unwrap_or(f64::NAN),
                    s.start_time.as_deref().unwrap_or("-"),
                    s.end_time.as_deref().unwrap_or("-"),
                    s.duration_years,
                    s.mag_min.unwrap_or(f64::NAN),
                    s.mag_max.unwrap_or(f64::NAN),
                    s.valid,
                );
            }
        }
        "csv" => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            for s in &summaries {
                writer.serialize(s)?;
            }
            writer.flush()?;
        }
        "json" => {
            let text = serde_json::to_string_pretty(&summaries)
                .map_err(|e| Error::parse(e.to_string()))?;
            println!("{text}");
        }
        other => {
            return Err(Error::config(format!(
                "unknown print format \"{other}\": use simple, csv or json"
            )))
        }
    }
    Ok(())
}
