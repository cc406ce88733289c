//! Shipment state machine. This module is the only writer of a shipment's
//! `status` and `events`, apart from the assignment and delivery commits
//! that go through `Shipment::push_status` under the same locks.

use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::assignment;
use crate::engine::auth::{self, Capability};
use crate::engine::codes::{generate_otp, generate_tracking_number};
use crate::engine::registry;
use crate::error::{AppError, Result};
use crate::geo::GeoPoint;
use crate::models::actor::{Actor, Role};
use crate::models::shipment::{
    OrderRef, Proof, Shipment, ShipmentEvent, ShipmentStatus, TrackingView,
};
use crate::state::AppState;

const TRACKING_NUMBER_ATTEMPTS: usize = 8;

/// Upper bound on how far out a delivery estimate may be promised.
pub const MAX_ESTIMATED_DELIVERY_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionPayload {
    pub location: Option<GeoPoint>,
    pub note: Option<String>,
    /// Target driver when an admin moves a shipment to `assigned`.
    pub driver_id: Option<Uuid>,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentQuery {
    pub status: Option<ShipmentStatus>,
    pub page: usize,
    pub limit: usize,
}

impl Default for ShipmentQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentPage {
    pub shipments: Vec<Shipment>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

pub async fn create(
    state: &AppState,
    actor: &Actor,
    order: OrderRef,
    estimated_delivery_offset: Option<Duration>,
) -> Result<Shipment> {
    auth::authorize(actor, Capability::CreateShipment)?;

    for coordinates in [
        order.pickup_address.coordinates,
        order.delivery_address.coordinates,
    ]
    .into_iter()
    .flatten()
    {
        coordinates.validate()?;
    }

    let offset = match estimated_delivery_offset {
        Some(offset) => offset,
        None => delivery_offset_hours(state.config.estimated_delivery_hours)?,
    };
    if offset <= Duration::zero() || offset > Duration::hours(MAX_ESTIMATED_DELIVERY_HOURS) {
        return Err(AppError::BadRequest(format!(
            "estimated delivery offset must be between 1 and {MAX_ESTIMATED_DELIVERY_HOURS} hours"
        )));
    }
    let estimated_delivery = Utc::now()
        .checked_add_signed(offset)
        .ok_or_else(|| AppError::BadRequest("estimated delivery is out of range".to_string()))?;

    let shipment = match state.shipments_by_order.entry(order.order_id) {
        Entry::Occupied(existing) => {
            return Err(AppError::DuplicateShipment {
                order_id: order.order_id,
                shipment_id: *existing.get(),
            });
        }
        Entry::Vacant(slot) => {
            let shipment_id = Uuid::new_v4();
            let tracking_number = reserve_tracking_number(state, shipment_id)?;
            let now = Utc::now();
            let shipment = Shipment {
                id: shipment_id,
                order_id: order.order_id,
                driver_id: None,
                tracking_number,
                otp_code: Some(generate_otp()),
                status: ShipmentStatus::Pending,
                events: vec![ShipmentEvent {
                    status: ShipmentStatus::Pending,
                    timestamp: now,
                    location: None,
                    note: "Shipment created".to_string(),
                }],
                pickup_address: order.pickup_address,
                delivery_address: order.delivery_address,
                order_total: order.total_amount,
                customer_name: order.customer_name,
                customer_phone: order.customer_phone,
                current_location: None,
                estimated_delivery,
                pickup_time: None,
                delivered_time: None,
                proof: Proof::default(),
                version: 0,
                created_at: now,
                updated_at: now,
            };

            state.shipments.insert(shipment.id, shipment.clone());
            slot.insert(shipment.id);
            shipment
        }
    };

    state.metrics.shipments_created_total.inc();
    info!(
        shipment_id = %shipment.id,
        order_id = %shipment.order_id,
        tracking_number = %shipment.tracking_number,
        "shipment created"
    );
    Ok(shipment)
}

/// Converts a caller-supplied hour count without overflowing.
pub fn delivery_offset_hours(hours: i64) -> Result<Duration> {
    Duration::try_hours(hours)
        .filter(|offset| *offset > Duration::zero())
        .filter(|offset| *offset <= Duration::hours(MAX_ESTIMATED_DELIVERY_HOURS))
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "estimated delivery must be between 1 and {MAX_ESTIMATED_DELIVERY_HOURS} hours, got {hours}"
            ))
        })
}

fn reserve_tracking_number(state: &AppState, shipment_id: Uuid) -> Result<String> {
    for _ in 0..TRACKING_NUMBER_ATTEMPTS {
        let candidate = generate_tracking_number();
        if let Entry::Vacant(slot) = state.shipments_by_tracking.entry(candidate.clone()) {
            slot.insert(shipment_id);
            return Ok(candidate);
        }
    }
    Err(AppError::Internal(
        "could not generate a unique tracking number".to_string(),
    ))
}

/// Moves a shipment to `target` on behalf of `actor`.
///
/// Admins may only assign (which needs `payload.driver_id`). The bound
/// driver may advance `accepted -> picked_up -> in-transit` or fail the
/// shipment. `delivered` is only reachable through OTP verification.
pub async fn transition(
    state: &AppState,
    actor: &Actor,
    shipment_id: Uuid,
    target: ShipmentStatus,
    payload: TransitionPayload,
) -> Result<Shipment> {
    match target {
        ShipmentStatus::Assigned => {
            auth::authorize(actor, Capability::AssignShipment)?;
            let driver_id = payload.driver_id.ok_or_else(|| {
                AppError::BadRequest("driver_id is required to assign a shipment".to_string())
            })?;
            return assignment::assign(
                state,
                actor,
                shipment_id,
                driver_id,
                payload.expected_version,
            )
            .await;
        }
        ShipmentStatus::Delivered => {
            return Err(AppError::Forbidden {
                role: actor.role,
                action: "mark a shipment delivered without otp verification",
            });
        }
        ShipmentStatus::Pending => {
            if actor.role == Role::Admin {
                auth::authorize(actor, Capability::AssignShipment)?;
            } else {
                auth::authorize(actor, Capability::AdvanceShipment)?;
            }
            let current = state.shipment(shipment_id)?;
            if actor.role != Role::Admin {
                auth::authorize_bound_driver(actor, Capability::AdvanceShipment, &current)?;
            }
            return Err(AppError::InvalidTransition {
                shipment_id,
                from: current.status,
                to: target,
            });
        }
        ShipmentStatus::Accepted | ShipmentStatus::PickedUp | ShipmentStatus::InTransit => {
            auth::authorize(actor, Capability::AdvanceShipment)?;
        }
        ShipmentStatus::Failed => {
            auth::authorize(actor, Capability::FailShipment)?;
        }
    }

    if let Some(point) = &payload.location {
        point.validate()?;
    }

    let _shipment_guard = state.shipment_locks.lock(shipment_id).await;
    let current = state.shipment(shipment_id)?;
    let capability = if target == ShipmentStatus::Failed {
        Capability::FailShipment
    } else {
        Capability::AdvanceShipment
    };
    let driver_id = auth::authorize_bound_driver(actor, capability, &current)?;

    if !current.status.can_transition_to(target) {
        warn!(
            shipment_id = %shipment_id,
            from = %current.status,
            to = %target,
            "rejected shipment transition"
        );
        return Err(AppError::InvalidTransition {
            shipment_id,
            from: current.status,
            to: target,
        });
    }

    let note = payload
        .note
        .filter(|note| !note.trim().is_empty())
        .unwrap_or_else(|| default_note(target).to_string());

    let updated = if target.is_terminal() {
        let _driver_guard = state.driver_locks.lock(driver_id).await;
        // Both records must exist before the first write.
        state.driver(driver_id)?;
        let updated = state.update_shipment(shipment_id, |shipment| {
            if let Some(point) = payload.location {
                shipment.current_location = Some(point);
            }
            shipment.push_status(target, note);
            shipment.clone()
        })?;
        state.update_driver(driver_id, |driver| {
            driver.current_assignments.remove(&shipment_id);
            driver.touch();
        })?;
        updated
    } else {
        state.update_shipment(shipment_id, |shipment| {
            if let Some(point) = payload.location {
                shipment.current_location = Some(point);
            }
            if target == ShipmentStatus::PickedUp {
                shipment.pickup_time = Some(Utc::now());
            }
            shipment.push_status(target, note);
            shipment.clone()
        })?
    };

    info!(
        shipment_id = %shipment_id,
        driver_id = %driver_id,
        from = %current.status,
        to = %target,
        "shipment transitioned"
    );
    Ok(updated)
}

fn default_note(status: ShipmentStatus) -> &'static str {
    match status {
        ShipmentStatus::Accepted => "Accepted by driver",
        ShipmentStatus::PickedUp => "Picked up from seller",
        ShipmentStatus::InTransit => "Out for delivery",
        ShipmentStatus::Failed => "Delivery failed",
        _ => "",
    }
}

/// Frequent position update from the bound driver. Last write wins and no
/// entity lock is taken; the binding and terminal checks run under the
/// map's write guard so a concurrent commit is never overwritten.
pub fn record_location(
    state: &AppState,
    actor: &Actor,
    shipment_id: Uuid,
    lat: f64,
    lng: f64,
) -> Result<()> {
    let driver_id = auth::authorize_driver(actor, Capability::RecordLocation)?;
    let point = GeoPoint::new(lat, lng)?;

    state.update_shipment(shipment_id, |shipment| {
        if !shipment.is_bound_to(driver_id) {
            return Err(AppError::NotAssignedToActor {
                shipment_id,
                driver_id,
            });
        }
        if shipment.status.is_terminal() {
            return Err(AppError::ShipmentClosed {
                shipment_id,
                status: shipment.status,
            });
        }
        shipment.current_location = Some(point);
        Ok(())
    })??;

    registry::record_driver_location(state, driver_id, point)
}

/// Admins see every shipment; a driver only the ones bound to them.
pub fn get(state: &AppState, actor: &Actor, shipment_id: Uuid) -> Result<Shipment> {
    let shipment = state.shipment(shipment_id)?;
    match actor.role {
        Role::Admin => auth::authorize(actor, Capability::ViewShipments)?,
        _ => {
            let driver_id = auth::authorize_driver(actor, Capability::ViewDriver)?;
            if !shipment.is_bound_to(driver_id) {
                return Err(AppError::NotAssignedToActor {
                    shipment_id,
                    driver_id,
                });
            }
        }
    }
    Ok(shipment)
}

pub fn list(state: &AppState, actor: &Actor, query: &ShipmentQuery) -> Result<ShipmentPage> {
    auth::authorize(actor, Capability::ViewShipments)?;

    let limit = query.limit.clamp(1, 200);
    let page = query.page.max(1);

    let mut matching: Vec<Shipment> = state
        .shipments
        .iter()
        .filter(|entry| query.status.is_none_or(|status| entry.status == status))
        .map(|entry| entry.value().clone())
        .collect();
    matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = matching.len();
    let shipments = matching
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();

    Ok(ShipmentPage {
        shipments,
        page,
        limit,
        total,
        pages: total.div_ceil(limit),
    })
}

/// Public lookup by tracking number. Never exposes the delivery code.
pub fn track(state: &AppState, tracking_number: &str) -> Result<TrackingView> {
    let shipment_id = state
        .shipments_by_tracking
        .get(tracking_number.trim())
        .map(|entry| *entry.value())
        .ok_or_else(|| AppError::not_found("tracking number", tracking_number))?;
    let shipment = state.shipment(shipment_id)?;
    Ok(TrackingView::from(&shipment))
}

/// Delivery code for relaying to the customer over the order channel.
pub fn otp(state: &AppState, actor: &Actor, shipment_id: Uuid) -> Result<String> {
    auth::authorize(actor, Capability::ReadOtp)?;
    let shipment = state.shipment(shipment_id)?;
    match (shipment.status, shipment.otp_code) {
        (ShipmentStatus::Delivered, _) => Err(AppError::AlreadyDelivered { shipment_id }),
        (ShipmentStatus::Failed, _) | (_, None) => Err(AppError::ShipmentClosed {
            shipment_id,
            status: shipment.status,
        }),
        (_, Some(code)) => Ok(code),
    }
}

/// Shipments currently held by the calling driver.
pub fn driver_shipments(state: &AppState, actor: &Actor) -> Result<Vec<Shipment>> {
    let driver_id = auth::authorize_driver(actor, Capability::ViewDriver)?;
    let driver = state.driver(driver_id)?;

    let mut shipments: Vec<Shipment> = driver
        .current_assignments
        .iter()
        .filter_map(|id| state.shipments.get(id).map(|entry| entry.value().clone()))
        .collect();
    shipments.sort_by_key(|shipment| shipment.created_at);
    Ok(shipments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{
        assigned_shipment, new_state, onboard_driver, order_ref, pending_shipment,
    };

    #[tokio::test]
    async fn create_generates_codes_and_rejects_duplicates() {
        let state = new_state();
        let order = order_ref();

        let shipment = create(&state, &Actor::admin(), order.clone(), None)
            .await
            .unwrap();
        assert_eq!(shipment.status, ShipmentStatus::Pending);
        assert!(shipment.tracking_number.starts_with("DLG"));
        assert_eq!(shipment.otp_code.as_deref().map(str::len), Some(6));
        assert_eq!(shipment.events.len(), 1);

        let err = create(&state, &Actor::admin(), order, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::DuplicateShipment { shipment_id, .. } if shipment_id == shipment.id
        ));
    }

    #[tokio::test]
    async fn oversized_delivery_estimates_are_rejected() {
        let state = new_state();

        let err = create(
            &state,
            &Actor::admin(),
            order_ref(),
            Some(Duration::hours(2_000_000_000_000)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        assert!(matches!(
            delivery_offset_hours(i64::MAX),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(delivery_offset_hours(0), Err(AppError::BadRequest(_))));
        assert_eq!(delivery_offset_hours(72).unwrap(), Duration::hours(72));
        assert!(state.shipments.is_empty());
    }

    #[tokio::test]
    async fn far_pages_are_empty_instead_of_overflowing() {
        let state = new_state();
        pending_shipment(&state).await;

        let page = list(
            &state,
            &Actor::admin(),
            &ShipmentQuery {
                status: None,
                page: usize::MAX,
                limit: 200,
            },
        )
        .unwrap();
        assert!(page.shipments.is_empty());
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn outsiders_cannot_read_status_through_pending() {
        let state = new_state();
        let (shipment, driver) = assigned_shipment(&state).await;
        let stranger = onboard_driver(&state, "KA-05-7777").await;

        for (actor, forbidden) in [(Actor::customer(), true), (Actor::driver(stranger.id), false)] {
            let err = transition(
                &state,
                &actor,
                shipment.id,
                ShipmentStatus::Pending,
                Default::default(),
            )
            .await
            .unwrap_err();
            if forbidden {
                assert!(matches!(err, AppError::Forbidden { .. }));
            } else {
                assert!(matches!(err, AppError::NotAssignedToActor { .. }));
            }
        }

        let err = transition(
            &state,
            &Actor::driver(driver.id),
            shipment.id,
            ShipmentStatus::Pending,
            Default::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn drivers_cannot_create_shipments() {
        let state = new_state();
        let driver = onboard_driver(&state, "KA-05-0001").await;
        let err = create(&state, &Actor::driver(driver.id), order_ref(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn bound_driver_walks_the_happy_path() {
        let state = new_state();
        let (shipment, driver) = assigned_shipment(&state).await;
        let actor = Actor::driver(driver.id);

        for target in [
            ShipmentStatus::Accepted,
            ShipmentStatus::PickedUp,
            ShipmentStatus::InTransit,
        ] {
            let updated = transition(&state, &actor, shipment.id, target, Default::default())
                .await
                .unwrap();
            assert_eq!(updated.status, target);
        }

        let stored = state.shipment(shipment.id).unwrap();
        assert!(stored.pickup_time.is_some());
        let walk: Vec<ShipmentStatus> = stored.events.iter().map(|e| e.status).collect();
        for pair in walk.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]));
        }
    }

    #[tokio::test]
    async fn skipping_a_step_is_an_invalid_transition() {
        let state = new_state();
        let (shipment, driver) = assigned_shipment(&state).await;

        let err = transition(
            &state,
            &Actor::driver(driver.id),
            shipment.id,
            ShipmentStatus::InTransit,
            Default::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: ShipmentStatus::Assigned,
                to: ShipmentStatus::InTransit,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn other_drivers_are_not_the_bound_actor() {
        let state = new_state();
        let (shipment, _driver) = assigned_shipment(&state).await;
        let stranger = onboard_driver(&state, "KA-05-9999").await;

        let err = transition(
            &state,
            &Actor::driver(stranger.id),
            shipment.id,
            ShipmentStatus::Accepted,
            Default::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotAssignedToActor { .. }));
    }

    #[tokio::test]
    async fn admin_may_not_advance_or_deliver() {
        let state = new_state();
        let (shipment, _driver) = assigned_shipment(&state).await;

        let err = transition(
            &state,
            &Actor::admin(),
            shipment.id,
            ShipmentStatus::Accepted,
            Default::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        let err = transition(
            &state,
            &Actor::admin(),
            shipment.id,
            ShipmentStatus::Delivered,
            Default::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn admin_assigns_through_transition() {
        let state = new_state();
        let shipment = pending_shipment(&state).await;
        let driver = onboard_driver(&state, "AP-09-0001").await;

        let updated = transition(
            &state,
            &Actor::admin(),
            shipment.id,
            ShipmentStatus::Assigned,
            TransitionPayload {
                driver_id: Some(driver.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.status, ShipmentStatus::Assigned);
        assert_eq!(updated.driver_id, Some(driver.id));
    }

    #[tokio::test]
    async fn failing_releases_the_driver_and_closes_the_shipment() {
        let state = new_state();
        let (shipment, driver) = assigned_shipment(&state).await;
        let actor = Actor::driver(driver.id);

        transition(&state, &actor, shipment.id, ShipmentStatus::Failed, Default::default())
            .await
            .unwrap();
        assert!(state.driver(driver.id).unwrap().current_assignments.is_empty());

        let err = transition(
            &state,
            &actor,
            shipment.id,
            ShipmentStatus::Accepted,
            Default::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let err = record_location(&state, &actor, shipment.id, 12.9, 77.6).unwrap_err();
        assert!(matches!(err, AppError::ShipmentClosed { .. }));
    }

    #[tokio::test]
    async fn location_updates_feed_the_next_event() {
        let state = new_state();
        let (shipment, driver) = assigned_shipment(&state).await;
        let actor = Actor::driver(driver.id);

        record_location(&state, &actor, shipment.id, 12.95, 77.61).unwrap();
        let updated = transition(&state, &actor, shipment.id, ShipmentStatus::Accepted, Default::default())
            .await
            .unwrap();

        let last = updated.events.last().unwrap();
        assert_eq!(last.location, Some(GeoPoint { lat: 12.95, lng: 77.61 }));
        let stored_driver = state.driver(driver.id).unwrap();
        assert_eq!(stored_driver.last_location.unwrap().lat, 12.95);
    }

    #[tokio::test]
    async fn tracking_view_hides_the_otp() {
        let state = new_state();
        let shipment = pending_shipment(&state).await;

        let view = track(&state, &shipment.tracking_number).unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("otp_code").is_none());
        assert_eq!(json["status"], "pending");

        let full = serde_json::to_value(state.shipment(shipment.id).unwrap()).unwrap();
        assert!(full.get("otp_code").is_none());

        assert!(matches!(
            track(&state, "DLGNOPE"),
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_paginates_newest_first() {
        let state = new_state();
        for _ in 0..5 {
            pending_shipment(&state).await;
        }

        let page = list(
            &state,
            &Actor::admin(),
            &ShipmentQuery {
                status: Some(ShipmentStatus::Pending),
                page: 2,
                limit: 2,
            },
        )
        .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.pages, 3);
        assert_eq!(page.shipments.len(), 2);
    }
}
