use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{AppError, Result};
use crate::geo::haversine_km;
use crate::models::earnings::{DeliveryDistance, EarningsBreakdown};
use crate::models::shipment::Shipment;

/// Hour range `[start_hour, end_hour)` in the configured local offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl PeakWindow {
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeakWindows(pub Vec<PeakWindow>);

impl FromStr for PeakWindows {
    type Err = String;

    /// Parses `"12-14,19-22"`. An empty string disables peak pricing.
    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let mut windows = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let (start, end) = part
                .split_once('-')
                .ok_or_else(|| format!("window {part:?} must look like START-END"))?;
            let start_hour = start
                .trim()
                .parse::<u32>()
                .map_err(|err| format!("window {part:?}: {err}"))?;
            let end_hour = end
                .trim()
                .parse::<u32>()
                .map_err(|err| format!("window {part:?}: {err}"))?;
            if start_hour >= end_hour || end_hour > 24 {
                return Err(format!("window {part:?} is not a valid hour range"));
            }
            windows.push(PeakWindow {
                start_hour,
                end_hour,
            });
        }
        Ok(Self(windows))
    }
}

impl fmt::Display for PeakWindows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|w| format!("{}-{}", w.start_hour, w.end_hour))
            .collect();
        f.write_str(&parts.join(","))
    }
}

#[derive(Debug, Clone)]
pub struct EarningsPolicy {
    pub base_fee: Decimal,
    pub per_km_rate: Decimal,
    pub free_distance_km: Decimal,
    pub peak_multiplier: Decimal,
    pub commission_rate: Decimal,
    pub peak_windows: PeakWindows,
    pub peak_utc_offset_minutes: i32,
    pub fallback_distance_km: f64,
}

impl Default for EarningsPolicy {
    fn default() -> Self {
        Self {
            base_fee: dec!(30),
            per_km_rate: dec!(8),
            free_distance_km: dec!(3),
            peak_multiplier: dec!(1.5),
            commission_rate: dec!(0.15),
            peak_windows: PeakWindows(vec![
                PeakWindow {
                    start_hour: 12,
                    end_hour: 14,
                },
                PeakWindow {
                    start_hour: 19,
                    end_hour: 22,
                },
            ]),
            peak_utc_offset_minutes: 330,
            fallback_distance_km: 5.0,
        }
    }
}

impl EarningsPolicy {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.base_fee < Decimal::ZERO || self.per_km_rate < Decimal::ZERO {
            return Err("fees must be non-negative".to_string());
        }
        if self.free_distance_km < Decimal::ZERO {
            return Err("free distance must be non-negative".to_string());
        }
        if self.peak_multiplier < Decimal::ONE {
            return Err("peak multiplier must be >= 1".to_string());
        }
        if self.commission_rate < Decimal::ZERO || self.commission_rate >= Decimal::ONE {
            return Err("commission rate must be in [0, 1)".to_string());
        }
        if self.local_offset().is_none() {
            return Err("peak utc offset is out of range".to_string());
        }
        if !self.fallback_distance_km.is_finite() || self.fallback_distance_km <= 0.0 {
            return Err("fallback distance must be positive".to_string());
        }
        Ok(())
    }

    fn local_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.peak_utc_offset_minutes.checked_mul(60)?)
    }

    pub fn is_peak_hour(&self, at: DateTime<Utc>) -> bool {
        let Some(offset) = self.local_offset() else {
            return false;
        };
        let hour = at.with_timezone(&offset).hour();
        self.peak_windows.0.iter().any(|window| window.contains(hour))
    }
}

/// Splits a delivery's payout. Pure; amounts are rounded to two places and
/// the sums are taken after rounding so they add up exactly.
pub fn compute_earnings(
    policy: &EarningsPolicy,
    distance_km: Decimal,
    is_peak_hour: bool,
) -> EarningsBreakdown {
    let base = policy.base_fee;

    let billable_km = (distance_km - policy.free_distance_km).max(Decimal::ZERO);
    let distance_bonus = (billable_km * policy.per_km_rate).round_dp(2);

    let peak_hour_bonus = if is_peak_hour {
        ((base + distance_bonus) * (policy.peak_multiplier - Decimal::ONE)).round_dp(2)
    } else {
        Decimal::ZERO
    };

    let total = base + distance_bonus + peak_hour_bonus;
    let commission = (total * policy.commission_rate).round_dp(2);

    EarningsBreakdown {
        base,
        distance_bonus,
        peak_hour_bonus,
        total,
        commission,
        net: total - commission,
    }
}

/// Straight-line pickup to drop-off distance, or the configured fallback
/// (flagged as estimated) when either side has no coordinates.
pub fn delivery_distance(policy: &EarningsPolicy, shipment: &Shipment) -> DeliveryDistance {
    match (
        shipment.pickup_address.coordinates,
        shipment.delivery_address.coordinates,
    ) {
        (Some(pickup), Some(dropoff)) => DeliveryDistance {
            km: haversine_km(&pickup, &dropoff),
            estimated: false,
        },
        _ => DeliveryDistance {
            km: policy.fallback_distance_km,
            estimated: true,
        },
    }
}

pub fn distance_to_decimal(km: f64) -> Result<Decimal> {
    Decimal::from_f64(km)
        .filter(|value| *value >= Decimal::ZERO)
        .map(|value| value.round_dp(3))
        .ok_or_else(|| AppError::BadRequest(format!("invalid distance {km}")))
}
