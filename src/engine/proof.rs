//! Proof of delivery and OTP verification.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::auth::{self, Capability};
use crate::engine::codes::constant_time_eq;
use crate::engine::earnings::{compute_earnings, delivery_distance, distance_to_decimal};
use crate::engine::ledger::{self, CreditEntry};
use crate::error::{AppError, Result};
use crate::geo::GeoPoint;
use crate::models::actor::Actor;
use crate::models::earnings::DriverEarnings;
use crate::models::shipment::{Shipment, ShipmentStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProofSubmission {
    pub signature: Option<String>,
    /// URLs returned by the media host.
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub shipment: Shipment,
    pub earnings: DriverEarnings,
}

fn is_media_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    rest.is_some_and(|rest| !rest.is_empty() && !rest.contains(char::is_whitespace))
}

impl ProofSubmission {
    fn validate(&self) -> Result<()> {
        if self.signature.is_none() && self.images.is_none() {
            return Err(AppError::BadRequest(
                "proof needs a signature or images".to_string(),
            ));
        }
        if self.signature.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(AppError::BadRequest("signature cannot be empty".to_string()));
        }
        if let Some(bad) = self
            .images
            .iter()
            .flatten()
            .find(|url| !is_media_url(url))
        {
            return Err(AppError::BadRequest(format!("{bad:?} is not a media url")));
        }
        Ok(())
    }
}

/// Stores signature and/or images on the shipment. Each field is replaced
/// only when supplied; the status never changes here.
pub async fn attach_proof(
    state: &AppState,
    actor: &Actor,
    shipment_id: Uuid,
    submission: ProofSubmission,
) -> Result<Shipment> {
    auth::authorize(actor, Capability::AttachProof)?;
    submission.validate()?;

    let _shipment_guard = state.shipment_locks.lock(shipment_id).await;
    let current = state.shipment(shipment_id)?;
    let driver_id = auth::authorize_bound_driver(actor, Capability::AttachProof, &current)?;
    match current.status {
        ShipmentStatus::Delivered => return Err(AppError::AlreadyDelivered { shipment_id }),
        ShipmentStatus::Failed => {
            return Err(AppError::ShipmentClosed {
                shipment_id,
                status: current.status,
            });
        }
        _ => {}
    }

    let updated = state.update_shipment(shipment_id, |shipment| {
        if let Some(signature) = submission.signature {
            shipment.proof.signature = Some(signature);
        }
        if let Some(images) = submission.images {
            shipment.proof.images = images;
        }
        shipment.version += 1;
        shipment.updated_at = Utc::now();
        shipment.clone()
    })?;

    info!(
        shipment_id = %shipment_id,
        driver_id = %driver_id,
        images = updated.proof.images.len(),
        "delivery proof attached"
    );
    Ok(updated)
}

/// Checks the customer's code and, on a match, delivers the shipment and
/// credits the driver in one commit. The code is single use.
pub async fn verify_delivery(
    state: &AppState,
    actor: &Actor,
    shipment_id: Uuid,
    submitted_otp: &str,
    location: Option<GeoPoint>,
) -> Result<DeliveryReceipt> {
    auth::authorize(actor, Capability::VerifyDelivery)?;
    if let Some(point) = &location {
        point.validate()?;
    }

    let result = verify_locked(state, actor, shipment_id, submitted_otp, location).await;
    let outcome = match &result {
        Ok(_) => "delivered",
        Err(AppError::InvalidOtp { .. }) => "invalid_otp",
        Err(AppError::AlreadyDelivered { .. }) => "already_delivered",
        Err(_) => "rejected",
    };
    state
        .metrics
        .deliveries_verified_total
        .with_label_values(&[outcome])
        .inc();
    result
}

async fn verify_locked(
    state: &AppState,
    actor: &Actor,
    shipment_id: Uuid,
    submitted_otp: &str,
    location: Option<GeoPoint>,
) -> Result<DeliveryReceipt> {
    let _shipment_guard = state.shipment_locks.lock(shipment_id).await;
    let current = state.shipment(shipment_id)?;
    let driver_id = auth::authorize_bound_driver(actor, Capability::VerifyDelivery, &current)?;

    if current.status == ShipmentStatus::Delivered {
        return Err(AppError::AlreadyDelivered { shipment_id });
    }
    if !current.status.can_transition_to(ShipmentStatus::Delivered) {
        return Err(AppError::InvalidTransition {
            shipment_id,
            from: current.status,
            to: ShipmentStatus::Delivered,
        });
    }
    let Some(expected) = current.otp_code.as_deref() else {
        return Err(AppError::ShipmentClosed {
            shipment_id,
            status: current.status,
        });
    };
    if !constant_time_eq(expected, submitted_otp.trim()) {
        warn!(shipment_id = %shipment_id, driver_id = %driver_id, "otp mismatch");
        return Err(AppError::InvalidOtp { shipment_id });
    }

    let _driver_guard = state.driver_locks.lock(driver_id).await;
    let policy = &state.config.earnings;
    let now = Utc::now();
    let distance = delivery_distance(policy, &current);
    let is_peak_hour = policy.is_peak_hour(now);
    let breakdown = compute_earnings(policy, distance_to_decimal(distance.km)?, is_peak_hour);
    let plan = ledger::plan_credit(
        state,
        CreditEntry {
            driver_id,
            shipment_id,
            order_id: current.order_id,
            breakdown,
            distance,
            is_peak_hour,
        },
    )?;

    let earnings = ledger::apply_credit(state, plan)?;
    let shipment = state.update_shipment(shipment_id, |shipment| {
        if let Some(point) = location {
            shipment.current_location = Some(point);
        }
        shipment.otp_code = None;
        shipment.delivered_time = Some(now);
        shipment.proof.verified_at = Some(now);
        shipment.push_status(ShipmentStatus::Delivered, "Delivery verified with OTP");
        shipment.clone()
    })?;

    info!(
        shipment_id = %shipment_id,
        driver_id = %driver_id,
        net = %earnings.net_amount,
        peak = is_peak_hour,
        "delivery verified"
    );
    Ok(DeliveryReceipt { shipment, earnings })
}
