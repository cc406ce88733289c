use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    Assigned,
    Accepted,
    PickedUp,
    #[serde(rename = "in-transit")]
    InTransit,
    Delivered,
    Failed,
}

impl ShipmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::Failed)
    }

    /// The full transition table. Anything not listed is rejected.
    pub fn can_transition_to(self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;

        match (self, next) {
            (Pending, Assigned) => true,
            (Assigned, Assigned) => true,
            (Assigned, Accepted) => true,
            (Accepted, PickedUp) => true,
            (PickedUp, InTransit) => true,
            (InTransit, Delivered) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShipmentStatus::Pending => "pending",
            ShipmentStatus::Assigned => "assigned",
            ShipmentStatus::Accepted => "accepted",
            ShipmentStatus::PickedUp => "picked_up",
            ShipmentStatus::InTransit => "in-transit",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub coordinates: Option<GeoPoint>,
}

/// What the order service hands over when a shipment is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: Uuid,
    pub pickup_address: Address,
    pub delivery_address: Address,
    pub total_amount: Decimal,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShipmentEvent {
    pub status: ShipmentStatus,
    pub timestamp: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub note: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Proof {
    pub signature: Option<String>,
    pub images: Vec<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub tracking_number: String,
    #[serde(skip_serializing, default)]
    pub otp_code: Option<String>,
    pub status: ShipmentStatus,
    pub events: Vec<ShipmentEvent>,
    pub pickup_address: Address,
    pub delivery_address: Address,
    pub order_total: Decimal,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub current_location: Option<GeoPoint>,
    pub estimated_delivery: DateTime<Utc>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub delivered_time: Option<DateTime<Utc>>,
    pub proof: Proof,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    pub fn is_bound_to(&self, driver_id: Uuid) -> bool {
        self.driver_id == Some(driver_id)
    }

    /// Appends the event and moves `status`. Callers check the edge first.
    pub(crate) fn push_status(&mut self, status: ShipmentStatus, note: impl Into<String>) {
        let now = Utc::now();
        self.status = status;
        self.events.push(ShipmentEvent {
            status,
            timestamp: now,
            location: self.current_location,
            note: note.into(),
        });
        self.version += 1;
        self.updated_at = now;
    }
}

/// Customer-facing view served by tracking number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingView {
    pub tracking_number: String,
    pub status: ShipmentStatus,
    pub estimated_delivery: DateTime<Utc>,
    pub delivered_time: Option<DateTime<Utc>>,
    pub current_location: Option<GeoPoint>,
    pub events: Vec<ShipmentEvent>,
}

impl From<&Shipment> for TrackingView {
    fn from(shipment: &Shipment) -> Self {
        Self {
            tracking_number: shipment.tracking_number.clone(),
            status: shipment.status,
            estimated_delivery: shipment.estimated_delivery,
            delivered_time: shipment.delivered_time,
            current_location: shipment.current_location,
            events: shipment.events.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ShipmentStatus::{self, *};

    const ALL: [ShipmentStatus; 7] = [
        Pending, Assigned, Accepted, PickedUp, InTransit, Delivered, Failed,
    ];

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for next in ALL {
            assert!(!Delivered.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn happy_path_is_a_valid_walk() {
        let walk = [Pending, Assigned, Accepted, PickedUp, InTransit, Delivered];
        for pair in walk.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn steps_cannot_be_skipped() {
        assert!(!Pending.can_transition_to(Accepted));
        assert!(!Assigned.can_transition_to(PickedUp));
        assert!(!Accepted.can_transition_to(Delivered));
        assert!(!PickedUp.can_transition_to(Assigned));
    }

    #[test]
    fn failed_is_reachable_from_every_open_state() {
        for from in [Pending, Assigned, Accepted, PickedUp, InTransit] {
            assert!(from.can_transition_to(Failed));
        }
    }

    #[test]
    fn in_transit_serializes_with_a_dash() {
        let json = serde_json::to_string(&InTransit).unwrap();
        assert_eq!(json, "\"in-transit\"");
        assert_eq!(InTransit.to_string(), "in-transit");
    }
}
