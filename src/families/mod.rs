//! Families of repeating earthquakes.
//!
//! A family is a set of events sharing one channel, built from the pair
//! stream by shared-event closure or UPGMA clustering, and represented on
//! disk by one stacked template trace.

pub mod build;
pub mod family;
pub mod pairs;
pub mod template;
pub mod upgma;

pub use build::build_families;
pub use family::{
    flag_family, read_families, read_selected_families, write_families, Family, FamilyNumbers,
    FamilySelection,
};
pub use pairs::{read_events_from_pairs, read_pairs, PairEvent, PairRecord, PairWriter};
pub use template::{build_family_template, build_templates, read_template, Template};
