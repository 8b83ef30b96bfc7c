//! Predicted P and S first arrivals from a fixed 1-D earth model.
//!
//! Travel times come from an embedded ak135 layer table. The first arrival
//! is the minimum over the direct ray and the head waves refracted along
//! each deeper interface, computed with flat-layer formulas; the source
//! depth splits the layer column into a source leg and a receiver leg.
//! The computation is a pure function of its inputs.

use crate::error::{Error, Result};
use crate::geodesy::{gps2dist_km, locations2degrees, KM_PER_DEG};
use crate::waveforms::provider::StationCoords;

/// ak135 layer table: (top depth km, vp km/s, vs km/s), piecewise constant.
const AK135_LAYERS: [(f64, f64, f64); 17] = [
    (0.0, 5.8, 3.46),
    (20.0, 6.5, 3.85),
    (35.0, 8.04, 4.48),
    (77.5, 8.045, 4.49),
    (120.0, 8.05, 4.5),
    (165.0, 8.175, 4.509),
    (210.0, 8.3, 4.518),
    (260.0, 8.4825, 4.609),
    (310.0, 8.665, 4.696),
    (360.0, 8.8475, 4.783),
    (410.0, 9.36, 5.08),
    (460.0, 9.528, 5.186),
    (510.0, 9.696, 5.292),
    (560.0, 9.864, 5.398),
    (610.0, 10.032, 5.504),
    (660.0, 10.79, 5.96),
    (710.0, 10.9229, 6.0897),
];

/// Predicted first arrivals and epicentral distances for one
/// station-event geometry.
#[derive(Debug, Clone, Copy)]
pub struct Arrivals {
    /// First P-family travel time in seconds.
    pub p_travel_time: f64,
    /// First S-family travel time in seconds.
    pub s_travel_time: f64,
    /// Epicentral distance in km (WGS-84 geodesic).
    pub distance_km: f64,
    /// Epicentral distance in degrees (spherical).
    pub distance_deg: f64,
}

/// Compute first P and S arrivals for a station-event geometry.
///
/// Negative event depths are clipped to zero. Fails with a reason string
/// when the geometry is not finite; the caller treats that as "no waveform
/// available".
pub fn first_arrivals(
    station: &StationCoords,
    ev_lat: f64,
    ev_lon: f64,
    ev_depth: f64,
) -> Result<Arrivals> {
    if !(station.latitude.is_finite()
        && station.longitude.is_finite()
        && ev_lat.is_finite()
        && ev_lon.is_finite()
        && ev_depth.is_finite())
    {
        return Err(Error::no_waveform(
            "non-finite station or event coordinates for arrival computation",
        ));
    }
    let depth = ev_depth.max(0.0);
    let distance_deg = locations2degrees(station.latitude, station.longitude, ev_lat, ev_lon);
    let distance_km = gps2dist_km(station.latitude, station.longitude, ev_lat, ev_lon);
    let x = distance_deg * KM_PER_DEG;
    Ok(Arrivals {
        p_travel_time: first_arrival_time(x, depth, Phase::P),
        s_travel_time: first_arrival_time(x, depth, Phase::S),
        distance_km,
        distance_deg,
    })
}

#[derive(Clone, Copy)]
enum Phase {
    P,
    S,
}

fn layer_velocity(layer: (f64, f64, f64), phase: Phase) -> f64 {
    match phase {
        Phase::P => layer.1,
        Phase::S => layer.2,
    }
}

/// Thickness of layer `i`, with the half-space below the table treated as
/// unbounded.
fn layer_bottom(i: usize) -> f64 {
    if i + 1 < AK135_LAYERS.len() {
        AK135_LAYERS[i + 1].0
    } else {
        f64::INFINITY
    }
}

/// First-arrival travel time for epicentral distance `x` km and source
/// depth `h` km.
fn first_arrival_time(x: f64, h: f64, phase: Phase) -> f64 {
    let mut best = direct_time(x, h, phase);
    for j in 1..AK135_LAYERS.len() {
        if let Some(t) = head_wave_time(x, h, j, phase) {
            best = best.min(t);
        }
    }
    best
}

/// Direct ray approximated as a straight path with the slowness-averaged
/// velocity of the layers above the source.
fn direct_time(x: f64, h: f64, phase: Phase) -> f64 {
    let hypo = (x * x + h * h).sqrt();
    if hypo == 0.0 {
        return 0.0;
    }
    let v = if h == 0.0 {
        layer_velocity(AK135_LAYERS[0], phase)
    } else {
        // Harmonic mean over the column between surface and source.
        let mut slowness_sum = 0.0;
        for (i, layer) in AK135_LAYERS.iter().enumerate() {
            let top = layer.0;
            if top >= h {
                break;
            }
            let thickness = layer_bottom(i).min(h) - top;
            slowness_sum += thickness / layer_velocity(*layer, phase);
        }
        h / slowness_sum
    };
    hypo / v
}

/// Head wave refracted along the top of layer `j`.
///
/// Returns `None` when a shallower layer is faster (no critical angle) or
/// the critical-distance legs do not fit inside `x`.
fn head_wave_time(x: f64, h: f64, j: usize, phase: Phase) -> Option<f64> {
    let z_j = AK135_LAYERS[j].0;
    if z_j <= h {
        // The source sits at or below the interface: no head wave from
        // above.
        return None;
    }
    let v_j = layer_velocity(AK135_LAYERS[j], phase);
    let mut vertical_time = 0.0;
    let mut critical_offset = 0.0;
    for (i, layer) in AK135_LAYERS.iter().enumerate().take(j) {
        let v_i = layer_velocity(*layer, phase);
        if v_i >= v_j {
            return None;
        }
        let top = layer.0;
        let bottom = layer_bottom(i).min(z_j);
        // Receiver leg crosses the full layer; the source leg only the
        // part below the source depth.
        let receiver_leg = bottom - top;
        let source_leg = (bottom - top.max(h)).max(0.0).min(bottom - top);
        let traversed = receiver_leg + source_leg;
        let eta = (1.0 / (v_i * v_i) - 1.0 / (v_j * v_j)).sqrt();
        vertical_time += traversed * eta;
        let sin_theta = v_i / v_j;
        let tan_theta = sin_theta / (1.0 - sin_theta * sin_theta).sqrt();
        critical_offset += traversed * tan_theta;
    }
    if x < critical_offset {
        return None;
    }
    Some(x / v_j + vertical_time)
}
