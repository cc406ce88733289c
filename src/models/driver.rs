use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Bike,
    Scooter,
    Car,
    Van,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Inactive,
    Active,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BankDetails {
    pub account_number: String,
    pub ifsc: String,
    pub account_holder_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LastLocation {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
}

impl LastLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

/// Running balance. `total == pending + paid` at every commit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EarningsBalance {
    pub total: Decimal,
    pub pending: Decimal,
    pub paid: Decimal,
}

impl EarningsBalance {
    pub fn is_consistent(&self) -> bool {
        self.total == self.pending + self.paid && self.pending >= Decimal::ZERO
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverApplication {
    pub user_id: Uuid,
    pub vehicle_type: VehicleType,
    pub license_number: String,
    pub region: String,
    pub bank_details: Option<BankDetails>,
    pub upi_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub user_id: Uuid,
    pub vehicle_type: VehicleType,
    pub license_number: String,
    pub region: String,
    pub kyc_status: KycStatus,
    pub status: DriverStatus,
    pub is_available: bool,
    pub is_online: bool,
    pub current_assignments: BTreeSet<Uuid>,
    pub earnings: EarningsBalance,
    pub total_deliveries: u64,
    pub completed_deliveries: u64,
    pub last_location: Option<LastLocation>,
    pub bank_details: Option<BankDetails>,
    pub upi_id: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn from_application(application: DriverApplication) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: application.user_id,
            vehicle_type: application.vehicle_type,
            license_number: application.license_number,
            region: application.region,
            kyc_status: KycStatus::Pending,
            status: DriverStatus::Inactive,
            is_available: false,
            is_online: false,
            current_assignments: BTreeSet::new(),
            earnings: EarningsBalance::default(),
            total_deliveries: 0,
            completed_deliveries: 0,
            last_location: None,
            bank_details: application.bank_details,
            upi_id: application.upi_id,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Why this driver cannot take another shipment, if anything.
    pub fn unavailability(&self, max_concurrent: usize) -> Option<String> {
        if self.kyc_status != KycStatus::Approved {
            return Some(format!("kyc is {:?}", self.kyc_status).to_lowercase());
        }
        if self.status != DriverStatus::Active {
            return Some(format!("status is {:?}", self.status).to_lowercase());
        }
        if !self.is_available {
            return Some("driver is not available".to_string());
        }
        if self.current_assignments.len() >= max_concurrent {
            return Some(format!(
                "driver already holds {} of {max_concurrent} assignments",
                self.current_assignments.len()
            ));
        }
        None
    }

    pub(crate) fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
