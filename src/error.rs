use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::actor::Role;
use crate::models::payout::PayoutStatus;
use crate::models::shipment::ShipmentStatus;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("role {role} may not {action}")]
    Forbidden { role: Role, action: &'static str },

    #[error("shipment {shipment_id} is not assigned to driver {driver_id}")]
    NotAssignedToActor { shipment_id: Uuid, driver_id: Uuid },

    #[error("shipment {shipment_id} cannot move from {from} to {to}")]
    InvalidTransition {
        shipment_id: Uuid,
        from: ShipmentStatus,
        to: ShipmentStatus,
    },

    #[error("shipment {shipment_id} is {status} and can no longer change")]
    ShipmentClosed {
        shipment_id: Uuid,
        status: ShipmentStatus,
    },

    #[error("invalid otp for shipment {shipment_id}")]
    InvalidOtp { shipment_id: Uuid },

    #[error("shipment {shipment_id} is already delivered")]
    AlreadyDelivered { shipment_id: Uuid },

    #[error("driver {driver_id} is unavailable: {reason}")]
    DriverUnavailable { driver_id: Uuid, reason: String },

    #[error("shipment {shipment_id} is not assignable (status {status}, version {version})")]
    ShipmentNotAssignable {
        shipment_id: Uuid,
        status: ShipmentStatus,
        version: u64,
    },

    #[error("order {order_id} already has shipment {shipment_id}")]
    DuplicateShipment { order_id: Uuid, shipment_id: Uuid },

    #[error("earnings already recorded for shipment {shipment_id}")]
    DuplicateEarnings { shipment_id: Uuid },

    #[error("invalid amount {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("payout of {amount} is below the minimum of {minimum}")]
    BelowMinimumPayout { amount: Decimal, minimum: Decimal },

    #[error("requested {requested} but only {available} is pending")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("payout {payout_id} cannot move from {from} to {to}")]
    InvalidPayoutTransition {
        payout_id: Uuid,
        from: PayoutStatus,
        to: PayoutStatus,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AppError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code, one per variant.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound { .. } => "not_found",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden { .. } => "forbidden",
            AppError::NotAssignedToActor { .. } => "not_assigned_to_actor",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::ShipmentClosed { .. } => "shipment_closed",
            AppError::InvalidOtp { .. } => "invalid_otp",
            AppError::AlreadyDelivered { .. } => "already_delivered",
            AppError::DriverUnavailable { .. } => "driver_unavailable",
            AppError::ShipmentNotAssignable { .. } => "shipment_not_assignable",
            AppError::DuplicateShipment { .. } => "duplicate_shipment",
            AppError::DuplicateEarnings { .. } => "duplicate_earnings",
            AppError::InvalidAmount { .. } => "invalid_amount",
            AppError::BelowMinimumPayout { .. } => "below_minimum_payout",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::InvalidPayoutTransition { .. } => "invalid_payout_transition",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } | AppError::NotAssignedToActor { .. } => {
                StatusCode::FORBIDDEN
            }
            AppError::InvalidTransition { .. }
            | AppError::ShipmentClosed { .. }
            | AppError::AlreadyDelivered { .. }
            | AppError::ShipmentNotAssignable { .. }
            | AppError::DuplicateShipment { .. }
            | AppError::DuplicateEarnings { .. }
            | AppError::InvalidPayoutTransition { .. } => StatusCode::CONFLICT,
            AppError::InvalidOtp { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DriverUnavailable { .. } => StatusCode::PRECONDITION_FAILED,
            AppError::InvalidAmount { .. }
            | AppError::BelowMinimumPayout { .. }
            | AppError::InsufficientBalance { .. }
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (self.status(), body).into_response()
    }
}
