//! Seismological formulas and loose-input helpers.

pub mod fields;
pub mod moment;
pub mod slip;

pub use fields::{field_match_score, guess_field_names};
pub use moment::{mag_to_moment, MomentUnit};
pub use slip::mag_to_slip_cm;
