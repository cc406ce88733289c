use std::env;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::engine::earnings::{EarningsPolicy, PeakWindows};
use crate::engine::lifecycle::MAX_ESTIMATED_DELIVERY_HOURS;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub dispatch_queue_size: usize,
    pub dispatch_max_attempts: u32,
    pub dispatch_retry_ms: u64,
    pub max_concurrent_assignments: usize,
    pub estimated_delivery_hours: i64,
    pub earnings: EarningsPolicy,
    pub payout: PayoutPolicy,
}

#[derive(Debug, Clone)]
pub struct PayoutPolicy {
    pub min_payout: Decimal,
    pub processing_fee: Decimal,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            dispatch_queue_size: 1024,
            dispatch_max_attempts: 20,
            dispatch_retry_ms: 250,
            max_concurrent_assignments: 3,
            estimated_delivery_hours: 48,
            earnings: EarningsPolicy::default(),
            payout: PayoutPolicy {
                min_payout: dec!(100),
                processing_fee: Decimal::ZERO,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            dispatch_queue_size: parse_or_default(
                "DISPATCH_QUEUE_SIZE",
                defaults.dispatch_queue_size,
            )?,
            dispatch_max_attempts: parse_or_default(
                "DISPATCH_MAX_ATTEMPTS",
                defaults.dispatch_max_attempts,
            )?,
            dispatch_retry_ms: parse_or_default("DISPATCH_RETRY_MS", defaults.dispatch_retry_ms)?,
            max_concurrent_assignments: parse_or_default(
                "MAX_CONCURRENT_ASSIGNMENTS",
                defaults.max_concurrent_assignments,
            )?,
            estimated_delivery_hours: parse_or_default(
                "ESTIMATED_DELIVERY_HOURS",
                defaults.estimated_delivery_hours,
            )?,
            earnings: EarningsPolicy {
                base_fee: parse_or_default("BASE_FEE", defaults.earnings.base_fee)?,
                per_km_rate: parse_or_default("PER_KM_RATE", defaults.earnings.per_km_rate)?,
                free_distance_km: parse_or_default(
                    "FREE_DISTANCE_KM",
                    defaults.earnings.free_distance_km,
                )?,
                peak_multiplier: parse_or_default(
                    "PEAK_MULTIPLIER",
                    defaults.earnings.peak_multiplier,
                )?,
                commission_rate: parse_or_default(
                    "COMMISSION_RATE",
                    defaults.earnings.commission_rate,
                )?,
                peak_windows: parse_or_default::<PeakWindows>(
                    "PEAK_WINDOWS",
                    defaults.earnings.peak_windows,
                )?,
                peak_utc_offset_minutes: parse_or_default(
                    "PEAK_UTC_OFFSET_MINUTES",
                    defaults.earnings.peak_utc_offset_minutes,
                )?,
                fallback_distance_km: parse_or_default(
                    "FALLBACK_DISTANCE_KM",
                    defaults.earnings.fallback_distance_km,
                )?,
            },
            payout: PayoutPolicy {
                min_payout: parse_or_default("MIN_PAYOUT", defaults.payout.min_payout)?,
                processing_fee: parse_or_default("PAYOUT_FEE", defaults.payout.processing_fee)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.dispatch_queue_size == 0 {
            return Err(AppError::Internal(
                "DISPATCH_QUEUE_SIZE must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_assignments == 0 {
            return Err(AppError::Internal(
                "MAX_CONCURRENT_ASSIGNMENTS must be > 0".to_string(),
            ));
        }
        if !(1..=MAX_ESTIMATED_DELIVERY_HOURS).contains(&self.estimated_delivery_hours) {
            return Err(AppError::Internal(format!(
                "ESTIMATED_DELIVERY_HOURS must be between 1 and {MAX_ESTIMATED_DELIVERY_HOURS}"
            )));
        }
        if self.payout.processing_fee < Decimal::ZERO {
            return Err(AppError::Internal("PAYOUT_FEE must be >= 0".to_string()));
        }
        self.earnings
            .validate()
            .map_err(|err| AppError::Internal(format!("invalid earnings policy: {err}")))
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
