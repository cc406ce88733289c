use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::lifecycle::{self, ShipmentPage, ShipmentQuery, TransitionPayload};
use crate::engine::proof::{self, DeliveryReceipt, ProofSubmission};
use crate::engine::{assignment, dispatch};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::actor::Actor;
use crate::models::shipment::{OrderRef, Shipment, ShipmentStatus, TrackingView};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/shipments", post(create_shipment).get(list_shipments))
        .route("/shipments/available", get(list_available))
        .route("/shipments/:id", get(get_shipment))
        .route("/shipments/:id/assign", post(assign_shipment))
        .route("/shipments/:id/dispatch", post(dispatch_shipment))
        .route("/shipments/:id/claim", post(claim_shipment))
        .route("/shipments/:id/status", post(transition_shipment))
        .route("/shipments/:id/location", post(record_location))
        .route("/shipments/:id/proof", post(attach_proof))
        .route("/shipments/:id/verify", post(verify_delivery))
        .route("/shipments/:id/otp", get(read_otp))
        .route("/me/shipments", get(my_shipments))
        .route("/track/:tracking_number", get(track))
}

#[derive(Deserialize)]
pub struct CreateShipmentRequest {
    #[serde(flatten)]
    pub order: OrderRef,
    pub estimated_delivery_hours: Option<i64>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<ShipmentStatus>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub driver_id: Uuid,
    pub expected_version: Option<u64>,
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub status: ShipmentStatus,
    #[serde(flatten)]
    pub payload: TransitionPayload,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub otp: String,
    pub location: Option<GeoPoint>,
}

#[derive(Serialize)]
pub struct OtpResponse {
    pub shipment_id: Uuid,
    pub otp: String,
}

async fn create_shipment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateShipmentRequest>,
) -> Result<(StatusCode, Json<Shipment>), AppError> {
    let offset = payload
        .estimated_delivery_hours
        .map(lifecycle::delivery_offset_hours)
        .transpose()?;
    let shipment = lifecycle::create(&state, &actor, payload.order, offset).await?;
    Ok((StatusCode::CREATED, Json(shipment)))
}

async fn list_shipments(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> Result<Json<ShipmentPage>, AppError> {
    let defaults = ShipmentQuery::default();
    let query = ShipmentQuery {
        status: query.status,
        page: query.page.unwrap_or(defaults.page),
        limit: query.limit.unwrap_or(defaults.limit),
    };
    Ok(Json(lifecycle::list(&state, &actor, &query)?))
}

async fn list_available(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<Shipment>>, AppError> {
    Ok(Json(assignment::list_available(&state, &actor)?))
}

async fn get_shipment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Shipment>, AppError> {
    Ok(Json(lifecycle::get(&state, &actor, id)?))
}

async fn assign_shipment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Shipment>, AppError> {
    let shipment =
        assignment::assign(&state, &actor, id, payload.driver_id, payload.expected_version)
            .await?;
    Ok(Json(shipment))
}

async fn dispatch_shipment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    dispatch::enqueue_dispatch(&state, &actor, id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn claim_shipment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Shipment>, AppError> {
    Ok(Json(assignment::claim(&state, &actor, id).await?))
}

async fn transition_shipment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Shipment>, AppError> {
    let shipment = lifecycle::transition(&state, &actor, id, request.status, request.payload).await?;
    Ok(Json(shipment))
}

async fn record_location(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(point): Json<GeoPoint>,
) -> Result<StatusCode, AppError> {
    lifecycle::record_location(&state, &actor, id, point.lat, point.lng)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn attach_proof(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(submission): Json<ProofSubmission>,
) -> Result<Json<Shipment>, AppError> {
    Ok(Json(proof::attach_proof(&state, &actor, id, submission).await?))
}

async fn verify_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<DeliveryReceipt>, AppError> {
    let receipt =
        proof::verify_delivery(&state, &actor, id, &payload.otp, payload.location).await?;
    Ok(Json(receipt))
}

async fn read_otp(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<OtpResponse>, AppError> {
    let otp = lifecycle::otp(&state, &actor, id)?;
    Ok(Json(OtpResponse {
        shipment_id: id,
        otp,
    }))
}

async fn my_shipments(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<Shipment>>, AppError> {
    Ok(Json(lifecycle::driver_shipments(&state, &actor)?))
}

/// Public: no actor required.
async fn track(
    State(state): State<Arc<AppState>>,
    Path(tracking_number): Path<String>,
) -> Result<Json<TrackingView>, AppError> {
    Ok(Json(lifecycle::track(&state, &tracking_number)?))
}
