//! Driver ledger. The only writer of a driver's balance and delivery
//! counters. Every mutation here runs under the driver's entity lock and is
//! split into a validating plan and an infallible apply step.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::auth::{self, Capability};
use crate::engine::earnings::distance_to_decimal;
use crate::error::{AppError, Result};
use crate::models::actor::Actor;
use crate::models::earnings::{
    DeliveryDistance, DriverEarnings, EarningsBreakdown, EarningsFilter, EarningsStatus,
    EarningsSummary, PeriodStats,
};
use crate::models::payout::{DriverPayout, PaymentMethod, PayoutStatus, SettlementOutcome};
use crate::state::AppState;

const PAYOUT_HISTORY_LIMIT: usize = 50;

/// One delivery's worth of earnings, as handed over by the OTP verifier.
#[derive(Debug, Clone)]
pub struct CreditEntry {
    pub driver_id: Uuid,
    pub shipment_id: Uuid,
    pub order_id: Uuid,
    pub breakdown: EarningsBreakdown,
    pub distance: DeliveryDistance,
    pub is_peak_hour: bool,
}

/// A validated credit. Applying it cannot fail once the driver lock is held.
#[derive(Debug)]
pub(crate) struct CreditPlan {
    record: DriverEarnings,
}

pub(crate) fn plan_credit(state: &AppState, entry: CreditEntry) -> Result<CreditPlan> {
    if state.earnings_by_shipment.contains_key(&entry.shipment_id) {
        return Err(AppError::DuplicateEarnings {
            shipment_id: entry.shipment_id,
        });
    }
    state.driver(entry.driver_id)?;
    let distance_km = distance_to_decimal(entry.distance.km)?;

    let breakdown = entry.breakdown;
    Ok(CreditPlan {
        record: DriverEarnings {
            id: Uuid::new_v4(),
            driver_id: entry.driver_id,
            shipment_id: entry.shipment_id,
            order_id: entry.order_id,
            base_amount: breakdown.base,
            distance_bonus: breakdown.distance_bonus,
            peak_hour_bonus: breakdown.peak_hour_bonus,
            total_amount: breakdown.total,
            platform_commission: breakdown.commission,
            net_amount: breakdown.net,
            distance_km,
            distance_estimated: entry.distance.estimated,
            is_peak_hour: entry.is_peak_hour,
            status: EarningsStatus::Pending,
            earned_at: Utc::now(),
            processed_at: None,
        },
    })
}

/// Creates the earnings record, credits `net` to the pending balance, bumps
/// both delivery counters and releases the shipment's slot.
pub(crate) fn apply_credit(state: &AppState, plan: CreditPlan) -> Result<DriverEarnings> {
    let record = plan.record;

    match state.earnings_by_shipment.entry(record.shipment_id) {
        Entry::Occupied(_) => {
            return Err(AppError::DuplicateEarnings {
                shipment_id: record.shipment_id,
            });
        }
        Entry::Vacant(slot) => {
            state.earnings.insert(record.id, record.clone());
            slot.insert(record.id);
        }
    }

    state.update_driver(record.driver_id, |driver| {
        driver.earnings.total += record.net_amount;
        driver.earnings.pending += record.net_amount;
        driver.total_deliveries += 1;
        driver.completed_deliveries += 1;
        driver.current_assignments.remove(&record.shipment_id);
        driver.touch();
    })?;
    reconcile_earnings_status(state, record.driver_id);

    if let Some(net) = record.net_amount.to_f64() {
        state.metrics.earnings_net_credited.inc_by(net);
    }
    info!(
        driver_id = %record.driver_id,
        shipment_id = %record.shipment_id,
        net = %record.net_amount,
        estimated_distance = record.distance_estimated,
        "earnings credited"
    );
    Ok(record)
}

/// Standalone credit hook. The OTP verifier uses the plan/apply pair
/// directly so it can validate the shipment side first.
pub async fn credit(state: &AppState, entry: CreditEntry) -> Result<DriverEarnings> {
    let _driver_guard = state.driver_locks.lock(entry.driver_id).await;
    let plan = plan_credit(state, entry)?;
    apply_credit(state, plan)
}

/// Reserves `amount` from the caller's pending balance and opens a payout
/// for the settlement side to pick up.
pub async fn request_payout(
    state: &AppState,
    actor: &Actor,
    amount: Decimal,
    payment_method: Option<PaymentMethod>,
) -> Result<DriverPayout> {
    let driver_id = auth::authorize_driver(actor, Capability::RequestPayout)?;
    let policy = &state.config.payout;

    if amount <= Decimal::ZERO || amount <= policy.processing_fee {
        return Err(AppError::InvalidAmount { amount });
    }
    if amount < policy.min_payout {
        return Err(AppError::BelowMinimumPayout {
            amount,
            minimum: policy.min_payout,
        });
    }

    let _driver_guard = state.driver_locks.lock(driver_id).await;
    let driver = state.driver(driver_id)?;
    if amount > driver.earnings.pending {
        state
            .metrics
            .payouts_total
            .with_label_values(&["insufficient_balance"])
            .inc();
        warn!(
            driver_id = %driver_id,
            requested = %amount,
            available = %driver.earnings.pending,
            "payout rejected"
        );
        return Err(AppError::InsufficientBalance {
            requested: amount,
            available: driver.earnings.pending,
        });
    }

    let payout = DriverPayout {
        id: Uuid::new_v4(),
        driver_id,
        amount,
        processing_fee: policy.processing_fee,
        net_amount: amount - policy.processing_fee,
        status: PayoutStatus::Pending,
        payment_method: payment_method.unwrap_or_default(),
        bank_details: driver.bank_details.clone(),
        upi_id: driver.upi_id.clone(),
        transaction_id: None,
        failure_reason: None,
        requested_at: Utc::now(),
        processed_at: None,
        completed_at: None,
    };

    state.payouts.insert(payout.id, payout.clone());
    state.update_driver(driver_id, |driver| {
        driver.earnings.pending -= amount;
        driver.earnings.paid += amount;
        driver.touch();
    })?;
    reconcile_earnings_status(state, driver_id);

    state
        .metrics
        .payouts_total
        .with_label_values(&["requested"])
        .inc();
    info!(
        driver_id = %driver_id,
        payout_id = %payout.id,
        amount = %amount,
        "payout requested"
    );
    Ok(payout)
}

/// Completion hook for the settlement side. A failed payout hands the
/// reserved amount back to the pending balance.
pub async fn settle(
    state: &AppState,
    actor: &Actor,
    payout_id: Uuid,
    outcome: SettlementOutcome,
) -> Result<DriverPayout> {
    auth::authorize(actor, Capability::SettlePayout)?;

    let driver_id = state.payout(payout_id)?.driver_id;
    let _driver_guard = state.driver_locks.lock(driver_id).await;
    let current = state.payout(payout_id)?;

    let target = outcome.target_status();
    if !current.status.can_transition_to(target) {
        return Err(AppError::InvalidPayoutTransition {
            payout_id,
            from: current.status,
            to: target,
        });
    }
    if let SettlementOutcome::Completed { transaction_id } = &outcome {
        if transaction_id.trim().is_empty() {
            return Err(AppError::BadRequest(
                "transaction id cannot be empty".to_string(),
            ));
        }
    }
    state.driver(driver_id)?;

    let now = Utc::now();
    let settled = state.update_payout(payout_id, |payout| {
        payout.status = target;
        payout.processed_at.get_or_insert(now);
        match outcome {
            SettlementOutcome::Processing => {}
            SettlementOutcome::Completed { transaction_id } => {
                payout.transaction_id = Some(transaction_id);
                payout.completed_at = Some(now);
            }
            SettlementOutcome::Failed { reason } => {
                payout.failure_reason = Some(reason);
            }
        }
        payout.clone()
    })?;

    if target == PayoutStatus::Failed {
        state.update_driver(driver_id, |driver| {
            driver.earnings.paid -= settled.amount;
            driver.earnings.pending += settled.amount;
            driver.touch();
        })?;
    }
    reconcile_earnings_status(state, driver_id);

    let label = target.to_string();
    state
        .metrics
        .payouts_total
        .with_label_values(&[label.as_str()])
        .inc();
    info!(
        driver_id = %driver_id,
        payout_id = %payout_id,
        status = %target,
        "payout settled"
    );
    Ok(settled)
}

/// Walks the driver's records oldest first and marks each one by how far
/// payouts cover it: completed payouts make it paid, open ones processed.
/// Caller holds the driver lock.
fn reconcile_earnings_status(state: &AppState, driver_id: Uuid) {
    let (mut completed, mut open) = (Decimal::ZERO, Decimal::ZERO);
    for payout in state.payouts.iter().filter(|p| p.driver_id == driver_id) {
        match payout.status {
            PayoutStatus::Completed => completed += payout.amount,
            PayoutStatus::Pending | PayoutStatus::Processing => open += payout.amount,
            PayoutStatus::Failed => {}
        }
    }

    let mut records: Vec<(Uuid, chrono::DateTime<Utc>, Decimal)> = state
        .earnings
        .iter()
        .filter(|record| record.driver_id == driver_id)
        .map(|record| (record.id, record.earned_at, record.net_amount))
        .collect();
    records.sort_by_key(|(_, earned_at, _)| *earned_at);

    let now = Utc::now();
    let mut covered = Decimal::ZERO;
    for (id, _, net) in records {
        covered += net;
        let status = if covered <= completed {
            EarningsStatus::Paid
        } else if covered <= completed + open {
            EarningsStatus::Processed
        } else {
            EarningsStatus::Pending
        };
        if let Some(mut record) = state.earnings.get_mut(&id) {
            if record.status != status {
                record.status = status;
                record.processed_at = match status {
                    EarningsStatus::Pending => None,
                    _ => record.processed_at.or(Some(now)),
                };
            }
        }
    }
}

pub fn list_earnings(
    state: &AppState,
    actor: &Actor,
    driver_id: Uuid,
    filter: &EarningsFilter,
) -> Result<Vec<DriverEarnings>> {
    auth::authorize_driver_record(actor, Capability::ViewLedger, driver_id)?;
    state.driver(driver_id)?;

    let mut records: Vec<DriverEarnings> = state
        .earnings
        .iter()
        .filter(|record| record.driver_id == driver_id && filter.matches(record.value()))
        .map(|record| record.value().clone())
        .collect();
    records.sort_by(|a, b| b.earned_at.cmp(&a.earned_at));
    Ok(records)
}

/// Balance, counters and totals over the records matching `filter`.
pub fn earnings_summary(
    state: &AppState,
    actor: &Actor,
    driver_id: Uuid,
    filter: &EarningsFilter,
) -> Result<EarningsSummary> {
    let records = list_earnings(state, actor, driver_id, filter)?;
    let driver = state.driver(driver_id)?;

    let in_settlement: Decimal = state
        .payouts
        .iter()
        .filter(|payout| payout.driver_id == driver_id && payout.status.is_open())
        .map(|payout| payout.amount)
        .sum();

    let count = records.len() as u64;
    let total_amount: Decimal = records.iter().map(|r| r.total_amount).sum();
    let net_amount: Decimal = records.iter().map(|r| r.net_amount).sum();
    let avg_earning = if count == 0 {
        Decimal::ZERO
    } else {
        (net_amount / Decimal::from(count)).round_dp(2)
    };

    Ok(EarningsSummary {
        total_earnings: driver.earnings.total,
        pending_earnings: driver.earnings.pending,
        paid_earnings: driver.earnings.paid,
        in_settlement,
        total_deliveries: driver.total_deliveries,
        completed_deliveries: driver.completed_deliveries,
        period: PeriodStats {
            total_amount,
            net_amount,
            count,
            avg_earning,
        },
    })
}

/// Most recent payouts first.
pub fn list_payouts(state: &AppState, actor: &Actor, driver_id: Uuid) -> Result<Vec<DriverPayout>> {
    auth::authorize_driver_record(actor, Capability::ViewLedger, driver_id)?;

    let mut payouts: Vec<DriverPayout> = state
        .payouts
        .iter()
        .filter(|payout| payout.driver_id == driver_id)
        .map(|payout| payout.value().clone())
        .collect();
    payouts.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
    payouts.truncate(PAYOUT_HISTORY_LIMIT);
    Ok(payouts)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::engine::earnings::compute_earnings;
    use crate::engine::test_support::{fund_driver, new_state, onboard_driver};

    fn entry(driver_id: Uuid, shipment_id: Uuid) -> CreditEntry {
        CreditEntry {
            driver_id,
            shipment_id,
            order_id: Uuid::new_v4(),
            breakdown: compute_earnings(&Default::default(), dec!(3.1), false),
            distance: DeliveryDistance {
                km: 3.1,
                estimated: false,
            },
            is_peak_hour: false,
        }
    }

    #[tokio::test]
    async fn credit_updates_balance_and_counters_once() {
        let state = new_state();
        let driver = onboard_driver(&state, "KL-07-0001").await;
        let shipment_id = Uuid::new_v4();

        let record = credit(&state, entry(driver.id, shipment_id)).await.unwrap();
        assert_eq!(record.net_amount, dec!(26.18));
        assert_eq!(record.distance_km, dec!(3.1));

        let err = credit(&state, entry(driver.id, shipment_id)).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateEarnings { .. }));

        let stored = state.driver(driver.id).unwrap();
        assert_eq!(stored.earnings.total, dec!(26.18));
        assert_eq!(stored.earnings.pending, dec!(26.18));
        assert_eq!(stored.completed_deliveries, 1);
        assert_eq!(stored.total_deliveries, 1);
        assert!(stored.earnings.is_consistent());
        assert_eq!(state.earnings.len(), 1);
    }

    #[tokio::test]
    async fn payout_amount_checks_run_in_order() {
        let state = new_state();
        let driver = onboard_driver(&state, "KL-07-0002").await;
        fund_driver(&state, driver.id, dec!(50)).await;
        let actor = Actor::driver(driver.id);

        assert!(matches!(
            request_payout(&state, &actor, dec!(0), None).await,
            Err(AppError::InvalidAmount { .. })
        ));
        assert!(matches!(
            request_payout(&state, &actor, dec!(-5), None).await,
            Err(AppError::InvalidAmount { .. })
        ));
        assert!(matches!(
            request_payout(&state, &actor, dec!(5), None).await,
            Err(AppError::BelowMinimumPayout { .. })
        ));
        assert!(matches!(
            request_payout(&state, &actor, dec!(60), None).await,
            Err(AppError::InsufficientBalance { .. })
        ));
        assert_eq!(state.driver(driver.id).unwrap().earnings.pending, dec!(50));
    }

    #[tokio::test]
    async fn payout_reserves_pending_balance() {
        let state = new_state();
        let driver = onboard_driver(&state, "KL-07-0003").await;
        fund_driver(&state, driver.id, dec!(50)).await;

        let payout = request_payout(
            &state,
            &Actor::driver(driver.id),
            dec!(30),
            Some(PaymentMethod::Upi),
        )
        .await
        .unwrap();
        assert_eq!(payout.status, PayoutStatus::Pending);
        assert_eq!(payout.net_amount, dec!(30) - state.config.payout.processing_fee);
        assert_eq!(payout.payment_method, PaymentMethod::Upi);

        let stored = state.driver(driver.id).unwrap();
        assert_eq!(stored.earnings.pending, dec!(20));
        assert!(stored.earnings.is_consistent());
    }

    #[tokio::test]
    async fn failed_settlement_returns_the_reservation() {
        let state = new_state();
        let driver = onboard_driver(&state, "KL-07-0004").await;
        fund_driver(&state, driver.id, dec!(50)).await;
        let payout = request_payout(&state, &Actor::driver(driver.id), dec!(40), None)
            .await
            .unwrap();

        settle(&state, &Actor::admin(), payout.id, SettlementOutcome::Processing)
            .await
            .unwrap();
        let failed = settle(
            &state,
            &Actor::admin(),
            payout.id,
            SettlementOutcome::Failed {
                reason: "account closed".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(failed.status, PayoutStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("account closed"));

        let stored = state.driver(driver.id).unwrap();
        assert_eq!(stored.earnings.pending, dec!(50));
        assert_eq!(stored.earnings.paid, dec!(0));
        assert!(stored.earnings.is_consistent());

        let err = settle(
            &state,
            &Actor::admin(),
            payout.id,
            SettlementOutcome::Completed {
                transaction_id: "TXN-1".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidPayoutTransition { .. }));
    }

    #[tokio::test]
    async fn settlement_moves_records_through_processed_to_paid() {
        let state = new_state();
        let driver = onboard_driver(&state, "KL-07-0005").await;
        for _ in 0..2 {
            credit(&state, entry(driver.id, Uuid::new_v4())).await.unwrap();
        }
        let actor = Actor::driver(driver.id);
        let payout = request_payout(&state, &actor, dec!(26.18), None).await.unwrap();

        let count = |state: &AppState, status: EarningsStatus| {
            list_earnings(state, &Actor::admin(), driver.id, &Default::default())
                .unwrap()
                .iter()
                .filter(|record| record.status == status)
                .count()
        };
        assert_eq!(count(&state, EarningsStatus::Processed), 1);
        assert_eq!(count(&state, EarningsStatus::Pending), 1);

        settle(
            &state,
            &Actor::admin(),
            payout.id,
            SettlementOutcome::Completed {
                transaction_id: "TXN-42".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(count(&state, EarningsStatus::Paid), 1);
        assert_eq!(count(&state, EarningsStatus::Pending), 1);

        let summary = earnings_summary(&state, &actor, driver.id, &Default::default()).unwrap();
        assert_eq!(summary.paid_earnings, dec!(26.18));
        assert_eq!(summary.in_settlement, dec!(0));
        assert_eq!(summary.period.count, 2);
        assert_eq!(summary.period.avg_earning, dec!(26.18));
    }

    #[tokio::test]
    async fn only_admins_settle() {
        let state = new_state();
        let driver = onboard_driver(&state, "KL-07-0006").await;
        fund_driver(&state, driver.id, dec!(50)).await;
        let actor = Actor::driver(driver.id);
        let payout = request_payout(&state, &actor, dec!(20), None).await.unwrap();

        let err = settle(&state, &actor, payout.id, SettlementOutcome::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
        assert_eq!(list_payouts(&state, &actor, driver.id).unwrap().len(), 1);
    }
}
