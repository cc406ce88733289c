use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::registry::{self, KycDecision};
use crate::engine::{assignment, lifecycle};
use crate::geo::GeoPoint;
use crate::models::actor::Actor;
use crate::models::driver::{BankDetails, Driver, DriverApplication, VehicleType};
use crate::models::shipment::{Address, OrderRef, Shipment, ShipmentStatus};
use crate::state::AppState;

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.payout.min_payout = dec!(10);
    config
}

pub fn new_state() -> AppState {
    let (state, _dispatch_rx) = AppState::new(test_config());
    state
}

pub fn application(license: &str) -> DriverApplication {
    DriverApplication {
        user_id: Uuid::new_v4(),
        vehicle_type: VehicleType::Scooter,
        license_number: license.to_string(),
        region: "Bengaluru".to_string(),
        bank_details: Some(BankDetails {
            account_number: "000123456789".to_string(),
            ifsc: "HDFC0000123".to_string(),
            account_holder_name: "Test Driver".to_string(),
        }),
        upi_id: None,
    }
}

/// Registered, KYC-approved and online.
pub async fn onboard_driver(state: &AppState, license: &str) -> Driver {
    let driver = registry::register(state, &Actor::admin(), application(license))
        .await
        .unwrap();
    registry::review_kyc(state, &Actor::admin(), driver.id, KycDecision::Approve)
        .await
        .unwrap();
    registry::set_availability(
        state,
        &Actor::driver(driver.id),
        true,
        Some(GeoPoint {
            lat: 12.9716,
            lng: 77.5946,
        }),
    )
    .await
    .unwrap()
}

fn address(street: &str, lat: f64, lng: f64) -> Address {
    Address {
        street: street.to_string(),
        city: "Bengaluru".to_string(),
        state: "KA".to_string(),
        zip_code: "560001".to_string(),
        coordinates: Some(GeoPoint { lat, lng }),
    }
}

pub fn order_ref() -> OrderRef {
    OrderRef {
        order_id: Uuid::new_v4(),
        pickup_address: address("MG Road", 12.9756, 77.6050),
        delivery_address: address("Indiranagar 100ft Rd", 12.9719, 77.6412),
        total_amount: dec!(899.00),
        customer_name: Some("Asha".to_string()),
        customer_phone: Some("+919800000000".to_string()),
    }
}

pub async fn pending_shipment(state: &AppState) -> Shipment {
    lifecycle::create(state, &Actor::admin(), order_ref(), None)
        .await
        .unwrap()
}

pub async fn assigned_shipment(state: &AppState) -> (Shipment, Driver) {
    let shipment = pending_shipment(state).await;
    let license = format!("TS-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let driver = onboard_driver(state, &license).await;
    let shipment = assignment::assign(state, &Actor::admin(), shipment.id, driver.id, None)
        .await
        .unwrap();
    (shipment, driver)
}

/// Assigned and walked by its driver up to `in-transit`.
pub async fn in_transit_shipment(state: &AppState) -> (Shipment, Driver) {
    let (shipment, driver) = assigned_shipment(state).await;
    let actor = Actor::driver(driver.id);
    let mut shipment = shipment;
    for target in [
        ShipmentStatus::Accepted,
        ShipmentStatus::PickedUp,
        ShipmentStatus::InTransit,
    ] {
        shipment = lifecycle::transition(state, &actor, shipment.id, target, Default::default())
            .await
            .unwrap();
    }
    (shipment, driver)
}

/// Seeds a pending balance without going through a delivery.
pub async fn fund_driver(state: &AppState, driver_id: Uuid, amount: Decimal) {
    let _guard = state.driver_locks.lock(driver_id).await;
    state
        .update_driver(driver_id, |driver| {
            driver.earnings.total += amount;
            driver.earnings.pending += amount;
        })
        .unwrap();
}
