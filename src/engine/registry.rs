use chrono::Utc;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::auth::{self, Capability};
use crate::error::{AppError, Result};
use crate::geo::GeoPoint;
use crate::models::actor::Actor;
use crate::models::driver::{Driver, DriverApplication, DriverStatus, KycStatus, LastLocation};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KycDecision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverFilter {
    pub status: Option<DriverStatus>,
    pub kyc_status: Option<KycStatus>,
    pub is_available: Option<bool>,
    pub region: Option<String>,
}

impl DriverFilter {
    fn matches(&self, driver: &Driver) -> bool {
        self.status.is_none_or(|status| driver.status == status)
            && self.kyc_status.is_none_or(|kyc| driver.kyc_status == kyc)
            && self.is_available.is_none_or(|available| driver.is_available == available)
            && self
                .region
                .as_deref()
                .is_none_or(|region| driver.region.eq_ignore_ascii_case(region))
    }
}

/// Creates the driver record for an approved application. KYC still has to
/// be reviewed before the driver can go online.
pub async fn register(
    state: &AppState,
    actor: &Actor,
    application: DriverApplication,
) -> Result<Driver> {
    auth::authorize(actor, Capability::ManageDrivers)?;

    let license = application.license_number.trim().to_ascii_uppercase();
    if license.is_empty() {
        return Err(AppError::BadRequest("license number cannot be empty".to_string()));
    }
    if application.region.trim().is_empty() {
        return Err(AppError::BadRequest("region cannot be empty".to_string()));
    }

    let mut driver = Driver::from_application(application);
    driver.license_number = license.clone();

    match state.drivers_by_license.entry(license) {
        Entry::Occupied(existing) => {
            return Err(AppError::BadRequest(format!(
                "license {} is already registered to driver {}",
                existing.key(),
                existing.get()
            )));
        }
        Entry::Vacant(slot) => {
            slot.insert(driver.id);
        }
    }
    state.drivers.insert(driver.id, driver.clone());

    info!(driver_id = %driver.id, region = %driver.region, "driver registered");
    Ok(driver)
}

pub async fn review_kyc(
    state: &AppState,
    actor: &Actor,
    driver_id: Uuid,
    decision: KycDecision,
) -> Result<Driver> {
    auth::authorize(actor, Capability::ManageDrivers)?;
    let _guard = state.driver_locks.lock(driver_id).await;

    let driver = state.update_driver(driver_id, |driver| {
        match decision {
            KycDecision::Approve => {
                driver.kyc_status = KycStatus::Approved;
                // A suspension is only lifted through `set_status`.
                if driver.status == DriverStatus::Inactive {
                    driver.status = DriverStatus::Active;
                }
            }
            KycDecision::Reject => {
                driver.kyc_status = KycStatus::Rejected;
                driver.status = DriverStatus::Inactive;
                driver.is_available = false;
                driver.is_online = false;
            }
        }
        driver.touch();
        driver.clone()
    })?;

    info!(driver_id = %driver_id, decision = ?decision, "kyc reviewed");
    Ok(driver)
}

/// Drivers are never deleted; deactivation and suspension take them off
/// the road instead.
pub async fn set_status(
    state: &AppState,
    actor: &Actor,
    driver_id: Uuid,
    status: DriverStatus,
) -> Result<Driver> {
    auth::authorize(actor, Capability::ManageDrivers)?;
    let _guard = state.driver_locks.lock(driver_id).await;

    let current = state.driver(driver_id)?;
    if status == DriverStatus::Active && current.kyc_status != KycStatus::Approved {
        return Err(AppError::DriverUnavailable {
            driver_id,
            reason: "kyc must be approved before activation".to_string(),
        });
    }

    let driver = state.update_driver(driver_id, |driver| {
        driver.status = status;
        if status != DriverStatus::Active {
            driver.is_available = false;
            driver.is_online = false;
        }
        driver.touch();
        driver.clone()
    })?;

    if status != DriverStatus::Active && !driver.current_assignments.is_empty() {
        warn!(
            driver_id = %driver_id,
            open_assignments = driver.current_assignments.len(),
            "driver taken off the road with open assignments"
        );
    }
    info!(driver_id = %driver_id, status = ?status, "driver status changed");
    Ok(driver)
}

/// Online/offline toggle. Going online also marks the driver available.
pub async fn set_availability(
    state: &AppState,
    actor: &Actor,
    online: bool,
    location: Option<GeoPoint>,
) -> Result<Driver> {
    let driver_id = auth::authorize_driver(actor, Capability::UpdateOwnProfile)?;
    if let Some(point) = &location {
        point.validate()?;
    }
    let _guard = state.driver_locks.lock(driver_id).await;

    let current = state.driver(driver_id)?;
    if online {
        if current.kyc_status != KycStatus::Approved {
            return Err(AppError::DriverUnavailable {
                driver_id,
                reason: "kyc must be approved before going online".to_string(),
            });
        }
        if current.status != DriverStatus::Active {
            return Err(AppError::DriverUnavailable {
                driver_id,
                reason: format!("driver is {:?}", current.status).to_lowercase(),
            });
        }
    }

    let driver = state.update_driver(driver_id, |driver| {
        driver.is_online = online;
        driver.is_available = online;
        if let Some(point) = location {
            driver.last_location = Some(LastLocation {
                lat: point.lat,
                lng: point.lng,
                timestamp: Utc::now(),
            });
        }
        driver.touch();
        driver.clone()
    })?;

    info!(driver_id = %driver_id, online, "driver availability changed");
    Ok(driver)
}

/// Last-write-wins position update; takes no entity lock.
pub fn record_driver_location(state: &AppState, driver_id: Uuid, point: GeoPoint) -> Result<()> {
    point.validate()?;
    state.update_driver(driver_id, |driver| {
        driver.last_location = Some(LastLocation {
            lat: point.lat,
            lng: point.lng,
            timestamp: Utc::now(),
        });
    })
}

/// Position ping from a driver between shipments.
pub fn report_location(state: &AppState, actor: &Actor, point: GeoPoint) -> Result<()> {
    let driver_id = auth::authorize_driver(actor, Capability::RecordLocation)?;
    record_driver_location(state, driver_id, point)
}

pub fn get(state: &AppState, actor: &Actor, driver_id: Uuid) -> Result<Driver> {
    auth::authorize_driver_record(actor, Capability::ViewDriver, driver_id)?;
    state.driver(driver_id)
}

pub fn list(state: &AppState, actor: &Actor, filter: &DriverFilter) -> Result<Vec<Driver>> {
    auth::authorize(actor, Capability::ManageDrivers)?;

    let mut drivers: Vec<Driver> = state
        .drivers
        .iter()
        .filter(|entry| filter.matches(entry.value()))
        .map(|entry| entry.value().clone())
        .collect();
    drivers.sort_by_key(|driver| driver.created_at);
    Ok(drivers)
}
