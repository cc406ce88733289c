use serde::Serialize;

use crate::geo::{haversine_km, GeoPoint};
use crate::models::driver::Driver;

const DISTANCE_WEIGHT: f64 = 0.65;
const LOAD_WEIGHT: f64 = 0.35;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ScoreBreakdown {
    pub distance_km: Option<f64>,
    pub distance_score: f64,
    pub load_score: f64,
}

/// Ranks a candidate for a pickup. Drivers with no known position, or
/// pickups without coordinates, score zero on distance.
pub fn compute_score(
    driver: &Driver,
    pickup: Option<GeoPoint>,
    max_concurrent: usize,
) -> (f64, ScoreBreakdown) {
    let distance_km = driver
        .last_location
        .zip(pickup)
        .map(|(location, pickup)| haversine_km(&location.point(), &pickup));

    let breakdown = ScoreBreakdown {
        distance_km,
        distance_score: distance_km.map_or(0.0, distance_score),
        load_score: load_score(driver.current_assignments.len(), max_concurrent),
    };

    (weighted_score(&breakdown), breakdown)
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    (breakdown.distance_score * DISTANCE_WEIGHT) + (breakdown.load_score * LOAD_WEIGHT)
}

fn distance_score(distance_km: f64) -> f64 {
    1.0 / (1.0 + distance_km.max(0.0))
}

fn load_score(current: usize, capacity: usize) -> f64 {
    if capacity == 0 {
        return 0.0;
    }

    let utilization = current as f64 / capacity as f64;
    (1.0 - utilization).clamp(0.0, 1.0)
}
