//! Magnitude to fault slip conversion for repeater sequences.

use crate::config::{Config, MagToSlipModel};
use crate::formulas::moment::{mag_to_moment, MomentUnit};

/// Convert a magnitude to slip in centimeters, using the model selected in
/// the configuration.
///
/// A missing magnitude yields zero slip.
pub fn mag_to_slip_cm(config: &Config, magnitude: Option<f64>) -> f64 {
    if magnitude.is_none() {
        return 0.0;
    }
    match config.mag_to_slip_model {
        MagToSlipModel::NadeauJohnson1998 => {
            nadeau_and_johnson_1998(mag_to_moment(magnitude, MomentUnit::DyneCm))
        }
        MagToSlipModel::Beeler2001 => beeler_et_al_2001(
            mag_to_moment(magnitude, MomentUnit::NewtonMeter),
            config.static_stress_drop,
            config.rigidity,
            config.strain_hardening,
        ),
        MagToSlipModel::Eshelby1957 => eshelby_1957(
            mag_to_moment(magnitude, MomentUnit::NewtonMeter),
            config.static_stress_drop,
            config.rigidity,
        ),
    }
}

/// Nadeau & Johnson (1998) empirical slip model.
///
/// `moment` in dyne.cm, slip in cm.
fn nadeau_and_johnson_1998(moment: f64) -> f64 {
    10f64.powf(-2.36) * moment.powf(0.17)
}

/// Beeler et al. (2001) strain-hardening slip model.
///
/// `moment` in N.m, `stress_drop` in MPa, `rigidity` in GPa,
/// `strain_hardening` in MPa/cm; slip in cm.
fn beeler_et_al_2001(moment: f64, stress_drop: f64, rigidity: f64, strain_hardening: f64) -> f64 {
    let rigidity_mpa = rigidity * 1e3;
    stress_drop
        * (1.0 / (1.81 * rigidity_mpa) * (moment / stress_drop).powf(1.0 / 3.0)
            + 1.0 / strain_hardening)
}

/// Eshelby (1957) circular crack slip model.
///
/// `moment` in N.m, `stress_drop` in MPa, `rigidity` in GPa; slip in cm.
fn eshelby_1957(moment: f64, stress_drop: f64, rigidity: f64) -> f64 {
    let rigidity_mpa = rigidity * 1e3;
    let radius = (7.0 / 16.0 * moment / stress_drop).powf(1.0 / 3.0);
    moment / (std::f64::consts::PI * rigidity_mpa * radius * radius)
}
