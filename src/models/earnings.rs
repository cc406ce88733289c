use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EarningsStatus {
    Pending,
    Processed,
    Paid,
}

/// Output of the earnings calculator. `total = base + distance_bonus +
/// peak_hour_bonus` and `net = total - commission` hold exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EarningsBreakdown {
    pub base: Decimal,
    pub distance_bonus: Decimal,
    pub peak_hour_bonus: Decimal,
    pub total: Decimal,
    pub commission: Decimal,
    pub net: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverEarnings {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub shipment_id: Uuid,
    pub order_id: Uuid,
    pub base_amount: Decimal,
    pub distance_bonus: Decimal,
    pub peak_hour_bonus: Decimal,
    pub total_amount: Decimal,
    pub platform_commission: Decimal,
    pub net_amount: Decimal,
    pub distance_km: Decimal,
    pub distance_estimated: bool,
    pub is_peak_hour: bool,
    pub status: EarningsStatus,
    pub earned_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// How the distance behind an earnings record was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryDistance {
    pub km: f64,
    pub estimated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EarningsFilter {
    pub status: Option<EarningsStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl EarningsFilter {
    pub fn matches(&self, record: &DriverEarnings) -> bool {
        self.status.is_none_or(|status| record.status == status)
            && self.from.is_none_or(|from| record.earned_at >= from)
            && self.to.is_none_or(|to| record.earned_at <= to)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeriodStats {
    pub total_amount: Decimal,
    pub net_amount: Decimal,
    pub count: u64,
    pub avg_earning: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsSummary {
    pub total_earnings: Decimal,
    pub pending_earnings: Decimal,
    pub paid_earnings: Decimal,
    pub in_settlement: Decimal,
    pub total_deliveries: u64,
    pub completed_deliveries: u64,
    pub period: PeriodStats,
}
