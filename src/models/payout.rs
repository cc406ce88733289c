use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::BankDetails;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn is_open(self) -> bool {
        matches!(self, PayoutStatus::Pending | PayoutStatus::Processing)
    }

    pub fn can_transition_to(self, next: PayoutStatus) -> bool {
        use PayoutStatus::*;

        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    BankTransfer,
    Upi,
    Wallet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverPayout {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub amount: Decimal,
    pub processing_fee: Decimal,
    pub net_amount: Decimal,
    pub status: PayoutStatus,
    pub payment_method: PaymentMethod,
    pub bank_details: Option<BankDetails>,
    pub upi_id: Option<String>,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result reported by the settlement side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Processing,
    Completed { transaction_id: String },
    Failed { reason: String },
}

impl SettlementOutcome {
    pub fn target_status(&self) -> PayoutStatus {
        match self {
            SettlementOutcome::Processing => PayoutStatus::Processing,
            SettlementOutcome::Completed { .. } => PayoutStatus::Completed,
            SettlementOutcome::Failed { .. } => PayoutStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PayoutStatus::*;

    #[test]
    fn closed_payouts_stay_closed() {
        for next in [Pending, Processing, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn processing_is_optional() {
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
    }
}
