use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::{Actor, Role};

/// Set by the identity gateway in front of this service.
pub const ROLE_HEADER: &str = "x-actor-role";
pub const DRIVER_HEADER: &str = "x-driver-id";

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, AppError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AppError::Unauthorized(format!("{name} is not valid text")))
        })
        .transpose()
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role: Role = header(parts, ROLE_HEADER)?
            .ok_or_else(|| AppError::Unauthorized(format!("missing {ROLE_HEADER} header")))?
            .parse()?;

        let driver_id = header(parts, DRIVER_HEADER)?
            .map(|raw| {
                raw.trim()
                    .parse::<Uuid>()
                    .map_err(|_| AppError::Unauthorized(format!("{DRIVER_HEADER} is not a uuid")))
            })
            .transpose()?;

        Ok(match role {
            Role::Delivery => Actor { role, driver_id },
            _ => Actor {
                role,
                driver_id: None,
            },
        })
    }
}
