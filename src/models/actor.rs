use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Delivery,
    Customer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::Delivery => "delivery",
            Role::Customer => "customer",
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "delivery" => Ok(Role::Delivery),
            "customer" => Ok(Role::Customer),
            other => Err(AppError::Unauthorized(format!("unknown role: {other}"))),
        }
    }
}

/// Authenticated caller as resolved by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub role: Role,
    pub driver_id: Option<Uuid>,
}

impl Actor {
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            driver_id: None,
        }
    }

    pub fn driver(driver_id: Uuid) -> Self {
        Self {
            role: Role::Delivery,
            driver_id: Some(driver_id),
        }
    }

    pub fn customer() -> Self {
        Self {
            role: Role::Customer,
            driver_id: None,
        }
    }
}
