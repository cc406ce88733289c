use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::auth::{self, Capability};
use crate::error::{AppError, Result};
use crate::models::actor::{Actor, Role};
use crate::models::shipment::{Shipment, ShipmentStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignSource {
    Admin,
    Dispatch,
    Claim,
}

impl AssignSource {
    fn label(self) -> &'static str {
        match self {
            AssignSource::Admin => "admin",
            AssignSource::Dispatch => "dispatch",
            AssignSource::Claim => "claim",
        }
    }
}

/// Binds `driver_id` to the shipment, releasing any previous driver's slot
/// in the same commit. With `expected_version` set, the call only succeeds
/// against exactly that shipment version. Taking a shipment away from
/// another driver always needs the version.
pub async fn assign(
    state: &AppState,
    actor: &Actor,
    shipment_id: Uuid,
    driver_id: Uuid,
    expected_version: Option<u64>,
) -> Result<Shipment> {
    auth::authorize(actor, Capability::AssignShipment)?;
    commit(state, shipment_id, driver_id, expected_version, AssignSource::Admin).await
}

/// Driver self-service: takes a pending, unbound shipment and accepts it.
pub async fn claim(state: &AppState, actor: &Actor, shipment_id: Uuid) -> Result<Shipment> {
    let driver_id = auth::authorize_driver(actor, Capability::ClaimShipment)?;
    commit(state, shipment_id, driver_id, None, AssignSource::Claim).await
}

/// Pending shipments nobody holds yet, oldest first.
pub fn list_available(state: &AppState, actor: &Actor) -> Result<Vec<Shipment>> {
    match actor.role {
        Role::Admin => auth::authorize(actor, Capability::ViewShipments)?,
        _ => auth::authorize(actor, Capability::ClaimShipment)?,
    }

    let mut shipments: Vec<Shipment> = state
        .shipments
        .iter()
        .filter(|entry| entry.status == ShipmentStatus::Pending && entry.driver_id.is_none())
        .map(|entry| entry.value().clone())
        .collect();
    shipments.sort_by_key(|shipment| shipment.created_at);
    Ok(shipments)
}

pub(crate) async fn commit(
    state: &AppState,
    shipment_id: Uuid,
    driver_id: Uuid,
    expected_version: Option<u64>,
    source: AssignSource,
) -> Result<Shipment> {
    let start = Instant::now();
    let result = commit_locked(state, shipment_id, driver_id, expected_version, source).await;

    let outcome = if result.is_ok() { "success" } else { "error" };
    state
        .metrics
        .assignment_latency_seconds
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .assignments_total
        .with_label_values(&[source.label(), outcome])
        .inc();

    if let Err(err) = &result {
        warn!(
            shipment_id = %shipment_id,
            driver_id = %driver_id,
            source = source.label(),
            error = %err,
            "assignment rejected"
        );
    }
    result
}

async fn commit_locked(
    state: &AppState,
    shipment_id: Uuid,
    driver_id: Uuid,
    expected_version: Option<u64>,
    source: AssignSource,
) -> Result<Shipment> {
    let _shipment_guard = state.shipment_locks.lock(shipment_id).await;
    let shipment = state.shipment(shipment_id)?;

    let not_assignable = || AppError::ShipmentNotAssignable {
        shipment_id,
        status: shipment.status,
        version: shipment.version,
    };
    if expected_version.is_some_and(|expected| expected != shipment.version) {
        return Err(not_assignable());
    }
    let held_by_other = shipment.driver_id.is_some_and(|held| held != driver_id);
    if held_by_other && expected_version.is_none() {
        return Err(not_assignable());
    }
    let assignable = match source {
        AssignSource::Claim => {
            shipment.status == ShipmentStatus::Pending && shipment.driver_id.is_none()
        }
        AssignSource::Admin | AssignSource::Dispatch => matches!(
            shipment.status,
            ShipmentStatus::Pending | ShipmentStatus::Assigned
        ),
    };
    if !assignable {
        return Err(not_assignable());
    }

    let previous = shipment.driver_id.filter(|previous| *previous != driver_id);
    let mut driver_ids = vec![driver_id];
    driver_ids.extend(previous);
    let _driver_guards = state.driver_locks.lock_many(&driver_ids).await;

    let driver = state.driver(driver_id)?;
    let limit = if driver.current_assignments.contains(&shipment_id) {
        usize::MAX
    } else {
        state.config.max_concurrent_assignments
    };
    if let Some(reason) = driver.unavailability(limit) {
        return Err(AppError::DriverUnavailable { driver_id, reason });
    }
    if let Some(previous) = previous {
        state.driver(previous)?;
    }

    // Everything is validated; the writes below cannot fail.
    if let Some(previous) = previous {
        state.update_driver(previous, |driver| {
            driver.current_assignments.remove(&shipment_id);
            driver.touch();
        })?;
    }
    state.update_driver(driver_id, |driver| {
        driver.current_assignments.insert(shipment_id);
        driver.touch();
    })?;
    let updated = state.update_shipment(shipment_id, |shipment| {
        shipment.driver_id = Some(driver_id);
        let note = match previous {
            Some(previous) => format!("Reassigned from {previous} to {driver_id}"),
            None => format!("Assigned to {driver_id}"),
        };
        shipment.push_status(ShipmentStatus::Assigned, note);
        if source == AssignSource::Claim {
            shipment.push_status(ShipmentStatus::Accepted, "Claimed by driver");
        }
        shipment.clone()
    })?;

    info!(
        shipment_id = %shipment_id,
        driver_id = %driver_id,
        previous_driver = ?previous,
        source = source.label(),
        "shipment assigned"
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry;
    use crate::engine::test_support::{new_state, onboard_driver, pending_shipment};

    #[tokio::test]
    async fn assign_binds_driver_and_records_event() {
        let state = new_state();
        let shipment = pending_shipment(&state).await;
        let driver = onboard_driver(&state, "KA-01-0001").await;

        let updated = assign(&state, &Actor::admin(), shipment.id, driver.id, None)
            .await
            .unwrap();

        assert_eq!(updated.status, ShipmentStatus::Assigned);
        assert_eq!(updated.driver_id, Some(driver.id));
        assert_eq!(updated.events.last().unwrap().status, ShipmentStatus::Assigned);
        let stored = state.driver(driver.id).unwrap();
        assert!(stored.current_assignments.contains(&shipment.id));
        assert_eq!(stored.total_deliveries, 0);
    }

    #[tokio::test]
    async fn reassignment_moves_the_slot() {
        let state = new_state();
        let shipment = pending_shipment(&state).await;
        let first = onboard_driver(&state, "KA-01-0001").await;
        let second = onboard_driver(&state, "KA-01-0002").await;

        let assigned = assign(&state, &Actor::admin(), shipment.id, first.id, None)
            .await
            .unwrap();
        let updated = assign(
            &state,
            &Actor::admin(),
            shipment.id,
            second.id,
            Some(assigned.version),
        )
        .await
        .unwrap();

        assert_eq!(updated.driver_id, Some(second.id));
        assert!(state.driver(first.id).unwrap().current_assignments.is_empty());
        assert!(state
            .driver(second.id)
            .unwrap()
            .current_assignments
            .contains(&shipment.id));
    }

    #[tokio::test]
    async fn unversioned_assign_cannot_take_a_held_shipment() {
        let state = new_state();
        let shipment = pending_shipment(&state).await;
        let a = onboard_driver(&state, "KA-01-0010").await;
        let b = onboard_driver(&state, "KA-01-0011").await;

        assign(&state, &Actor::admin(), shipment.id, a.id, None)
            .await
            .unwrap();
        let err = assign(&state, &Actor::admin(), shipment.id, b.id, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::ShipmentNotAssignable {
                status: ShipmentStatus::Assigned,
                ..
            }
        ));
        assert_eq!(state.shipment(shipment.id).unwrap().driver_id, Some(a.id));
        assert!(state.driver(b.id).unwrap().current_assignments.is_empty());

        // Re-assigning the holder stays idempotent without a version.
        assign(&state, &Actor::admin(), shipment.id, a.id, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unavailable_driver_is_rejected_without_changes() {
        let state = new_state();
        let shipment = pending_shipment(&state).await;
        let driver = onboard_driver(&state, "KA-01-0003").await;
        registry::set_availability(&state, &Actor::driver(driver.id), false, None)
            .await
            .unwrap();

        let err = assign(&state, &Actor::admin(), shipment.id, driver.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DriverUnavailable { .. }));
        let stored = state.shipment(shipment.id).unwrap();
        assert_eq!(stored.status, ShipmentStatus::Pending);
        assert_eq!(stored.driver_id, None);
    }

    #[tokio::test]
    async fn capacity_limit_is_enforced() {
        let state = new_state();
        let driver = onboard_driver(&state, "KA-01-0004").await;
        let limit = state.config.max_concurrent_assignments;

        for _ in 0..limit {
            let shipment = pending_shipment(&state).await;
            assign(&state, &Actor::admin(), shipment.id, driver.id, None)
                .await
                .unwrap();
        }
        let extra = pending_shipment(&state).await;
        let err = assign(&state, &Actor::admin(), extra.id, driver.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DriverUnavailable { .. }));
    }

    #[tokio::test]
    async fn stale_version_is_not_assignable() {
        let state = new_state();
        let shipment = pending_shipment(&state).await;
        let a = onboard_driver(&state, "KA-01-0005").await;
        let b = onboard_driver(&state, "KA-01-0006").await;

        assign(&state, &Actor::admin(), shipment.id, a.id, Some(shipment.version))
            .await
            .unwrap();
        let err = assign(&state, &Actor::admin(), shipment.id, b.id, Some(shipment.version))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ShipmentNotAssignable { .. }));
        assert!(state.driver(b.id).unwrap().current_assignments.is_empty());
    }

    #[tokio::test]
    async fn accepted_shipment_cannot_be_reassigned() {
        let state = new_state();
        let shipment = pending_shipment(&state).await;
        let a = onboard_driver(&state, "KA-01-0007").await;
        let b = onboard_driver(&state, "KA-01-0008").await;

        claim(&state, &Actor::driver(a.id), shipment.id).await.unwrap();
        let err = assign(&state, &Actor::admin(), shipment.id, b.id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::ShipmentNotAssignable {
                status: ShipmentStatus::Accepted,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn claim_records_assigned_then_accepted() {
        let state = new_state();
        let shipment = pending_shipment(&state).await;
        let driver = onboard_driver(&state, "KA-01-0009").await;

        assert_eq!(list_available(&state, &Actor::driver(driver.id)).unwrap().len(), 1);
        let claimed = claim(&state, &Actor::driver(driver.id), shipment.id)
            .await
            .unwrap();

        let statuses: Vec<ShipmentStatus> = claimed.events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ShipmentStatus::Pending,
                ShipmentStatus::Assigned,
                ShipmentStatus::Accepted
            ]
        );
        assert!(list_available(&state, &Actor::driver(driver.id)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn customers_cannot_list_available_work() {
        let state = new_state();
        assert!(matches!(
            list_available(&state, &Actor::customer()),
            Err(AppError::Forbidden { .. })
        ));
    }
}
