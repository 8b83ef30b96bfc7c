//! Magnitude to seismic moment conversion.

/// Unit of the returned seismic moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentUnit {
    /// Newton meters.
    NewtonMeter,
    /// Dyne centimeters.
    DyneCm,
}

/// Convert a moment magnitude to seismic moment.
///
/// Uses the Hanks & Kanamori (1979) relation. A missing magnitude converts
/// to zero moment so that cumulative sums stay well defined.
pub fn mag_to_moment(magnitude: Option<f64>, unit: MomentUnit) -> f64 {
    let Some(mag) = magnitude else {
        return 0.0;
    };
    match unit {
        MomentUnit::NewtonMeter => 10f64.powf(1.5 * (mag + 6.07)),
        MomentUnit::DyneCm => 10f64.powf(1.5 * (mag + 10.7)),
    }
}
