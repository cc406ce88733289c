use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::registry::{self, DriverFilter, KycDecision};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::actor::Actor;
use crate::models::driver::{Driver, DriverApplication, DriverStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/kyc", post(review_kyc))
        .route("/drivers/:id/status", patch(update_status))
        .route("/me/availability", patch(update_availability))
        .route("/me/location", patch(update_location))
}

#[derive(Deserialize)]
pub struct KycRequest {
    pub decision: KycDecision,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub online: bool,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct LocationRequest {
    pub location: GeoPoint,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(application): Json<DriverApplication>,
) -> Result<(StatusCode, Json<Driver>), AppError> {
    let driver = registry::register(&state, &actor, application).await?;
    Ok((StatusCode::CREATED, Json(driver)))
}

async fn list_drivers(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(filter): Query<DriverFilter>,
) -> Result<Json<Vec<Driver>>, AppError> {
    Ok(Json(registry::list(&state, &actor, &filter)?))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(registry::get(&state, &actor, id)?))
}

async fn review_kyc(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<KycRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = registry::review_kyc(&state, &actor, id, payload.decision).await?;
    Ok(Json(driver))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = registry::set_status(&state, &actor, id, payload.status).await?;
    Ok(Json(driver))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver =
        registry::set_availability(&state, &actor, payload.online, payload.location).await?;
    Ok(Json(driver))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<LocationRequest>,
) -> Result<StatusCode, AppError> {
    registry::report_location(&state, &actor, payload.location)?;
    Ok(StatusCode::NO_CONTENT)
}
