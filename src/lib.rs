//! Repeating-earthquake detection and organization.
//!
//! Requake finds repeating earthquakes by cross-correlating catalog event
//! waveforms pairwise, grouping well-correlated events into families,
//! stacking each family into a template and sweeping continuous data with
//! those templates. The `cli` module is the entry point used by the
//! binary; everything else is usable as a library.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod families;
pub mod formulas;
pub mod geodesy;
pub mod scan;
pub mod signal;
pub mod waveforms;

pub use error::{Error, Result};
