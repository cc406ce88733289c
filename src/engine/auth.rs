//! Single authorization gate. Every engine entry point resolves the caller's
//! capability here before touching any state.

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::actor::{Actor, Role};
use crate::models::shipment::Shipment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ManageDrivers,
    CreateShipment,
    AssignShipment,
    ViewShipments,
    ReadOtp,
    SettlePayout,
    UpdateOwnProfile,
    ClaimShipment,
    AdvanceShipment,
    FailShipment,
    RecordLocation,
    AttachProof,
    VerifyDelivery,
    ViewDriver,
    ViewLedger,
    RequestPayout,
}

impl Capability {
    pub fn action(self) -> &'static str {
        match self {
            Capability::ManageDrivers => "manage drivers",
            Capability::CreateShipment => "create shipments",
            Capability::AssignShipment => "assign shipments",
            Capability::ViewShipments => "view shipments",
            Capability::ReadOtp => "read delivery codes",
            Capability::SettlePayout => "settle payouts",
            Capability::UpdateOwnProfile => "update a driver profile",
            Capability::ClaimShipment => "claim shipments",
            Capability::AdvanceShipment => "advance shipments",
            Capability::FailShipment => "fail shipments",
            Capability::RecordLocation => "record locations",
            Capability::AttachProof => "attach delivery proof",
            Capability::VerifyDelivery => "verify deliveries",
            Capability::ViewDriver => "view driver profiles",
            Capability::ViewLedger => "view driver earnings",
            Capability::RequestPayout => "request payouts",
        }
    }

    /// Capabilities that only make sense for the driver bound to a shipment.
    fn requires_binding(self) -> bool {
        matches!(
            self,
            Capability::AdvanceShipment
                | Capability::FailShipment
                | Capability::RecordLocation
                | Capability::AttachProof
                | Capability::VerifyDelivery
        )
    }
}

fn role_allows(role: Role, capability: Capability) -> bool {
    use Capability::*;

    match role {
        Role::Admin => matches!(
            capability,
            ManageDrivers
                | CreateShipment
                | AssignShipment
                | ViewShipments
                | ReadOtp
                | SettlePayout
                | ViewDriver
                | ViewLedger
        ),
        Role::Delivery => matches!(
            capability,
            UpdateOwnProfile
                | ClaimShipment
                | AdvanceShipment
                | FailShipment
                | RecordLocation
                | AttachProof
                | VerifyDelivery
                | ViewDriver
                | ViewLedger
                | RequestPayout
        ),
        Role::Customer => false,
    }
}

pub fn authorize(actor: &Actor, capability: Capability) -> Result<()> {
    if actor.role == Role::Delivery && actor.driver_id.is_none() {
        return Err(AppError::Unauthorized(
            "delivery actor has no driver profile".to_string(),
        ));
    }
    if !role_allows(actor.role, capability) {
        return Err(AppError::Forbidden {
            role: actor.role,
            action: capability.action(),
        });
    }
    Ok(())
}

/// Gate for driver-only operations; yields the caller's driver id.
pub fn authorize_driver(actor: &Actor, capability: Capability) -> Result<Uuid> {
    authorize(actor, capability)?;
    actor.driver_id.ok_or(AppError::Forbidden {
        role: actor.role,
        action: capability.action(),
    })
}

/// Gate for operations on a shipment that only its bound driver may perform.
pub fn authorize_bound_driver(
    actor: &Actor,
    capability: Capability,
    shipment: &Shipment,
) -> Result<Uuid> {
    debug_assert!(capability.requires_binding());
    let driver_id = authorize_driver(actor, capability)?;
    if !shipment.is_bound_to(driver_id) {
        return Err(AppError::NotAssignedToActor {
            shipment_id: shipment.id,
            driver_id,
        });
    }
    Ok(driver_id)
}

/// Admins see every driver's records; drivers only their own.
pub fn authorize_driver_record(actor: &Actor, capability: Capability, driver_id: Uuid) -> Result<()> {
    authorize(actor, capability)?;
    match actor.role {
        Role::Admin => Ok(()),
        _ if actor.driver_id == Some(driver_id) => Ok(()),
        _ => Err(AppError::Forbidden {
            role: actor.role,
            action: capability.action(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_cannot_advance_shipments() {
        let err = authorize(&Actor::admin(), Capability::AdvanceShipment).unwrap_err();
        assert!(matches!(err, AppError::Forbidden { role: Role::Admin, .. }));
    }

    #[test]
    fn drivers_cannot_create_or_assign() {
        let actor = Actor::driver(Uuid::new_v4());
        assert!(authorize(&actor, Capability::CreateShipment).is_err());
        assert!(authorize(&actor, Capability::AssignShipment).is_err());
        assert!(authorize(&actor, Capability::SettlePayout).is_err());
    }

    #[test]
    fn customers_hold_no_capabilities() {
        assert!(authorize(&Actor::customer(), Capability::ViewShipments).is_err());
        assert!(authorize(&Actor::customer(), Capability::VerifyDelivery).is_err());
    }

    #[test]
    fn delivery_role_without_profile_is_unauthorized() {
        let actor = Actor {
            role: Role::Delivery,
            driver_id: None,
        };
        let err = authorize(&actor, Capability::ClaimShipment).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn drivers_only_read_their_own_ledger() {
        let me = Uuid::new_v4();
        let actor = Actor::driver(me);
        assert!(authorize_driver_record(&actor, Capability::ViewLedger, me).is_ok());
        assert!(authorize_driver_record(&actor, Capability::ViewLedger, Uuid::new_v4()).is_err());
        assert!(authorize_driver_record(&Actor::admin(), Capability::ViewLedger, me).is_ok());
    }
}
