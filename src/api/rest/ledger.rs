use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::ledger;
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::earnings::{DriverEarnings, EarningsFilter, EarningsSummary};
use crate::models::payout::{DriverPayout, PaymentMethod, SettlementOutcome};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers/:id/earnings", get(list_earnings))
        .route("/drivers/:id/earnings/summary", get(earnings_summary))
        .route("/drivers/:id/payouts", get(list_payouts))
        .route("/me/payouts", post(request_payout))
        .route("/payouts/:id/settle", post(settle_payout))
}

#[derive(Deserialize)]
pub struct PayoutRequest {
    pub amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
}

async fn list_earnings(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(driver_id): Path<Uuid>,
    Query(filter): Query<EarningsFilter>,
) -> Result<Json<Vec<DriverEarnings>>, AppError> {
    Ok(Json(ledger::list_earnings(&state, &actor, driver_id, &filter)?))
}

async fn earnings_summary(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(driver_id): Path<Uuid>,
    Query(filter): Query<EarningsFilter>,
) -> Result<Json<EarningsSummary>, AppError> {
    Ok(Json(ledger::earnings_summary(&state, &actor, driver_id, &filter)?))
}

async fn list_payouts(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(driver_id): Path<Uuid>,
) -> Result<Json<Vec<DriverPayout>>, AppError> {
    Ok(Json(ledger::list_payouts(&state, &actor, driver_id)?))
}

async fn request_payout(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<PayoutRequest>,
) -> Result<(StatusCode, Json<DriverPayout>), AppError> {
    let payout =
        ledger::request_payout(&state, &actor, payload.amount, payload.payment_method).await?;
    Ok((StatusCode::CREATED, Json(payout)))
}

async fn settle_payout(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(payout_id): Path<Uuid>,
    Json(outcome): Json<SettlementOutcome>,
) -> Result<Json<DriverPayout>, AppError> {
    Ok(Json(ledger::settle(&state, &actor, payout_id, outcome).await?))
}
