//! Event catalog model and I/O.
//!
//! This module implements the hashable event record, the four-field trace
//! id, the FDSN-text catalog file format and CSV catalog ingestion with
//! column-name guessing.

pub mod csv_import;
pub mod event;
pub mod store;

pub use csv_import::read_catalog_from_csv;
pub use event::{generate_evid, parse_utc_datetime, Event, TraceId};
pub use store::Catalog;
