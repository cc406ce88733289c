//! Automatic dispatch. Shipments queued here are matched to the best
//! eligible driver by a single background worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::assignment::{self, AssignSource};
use crate::engine::auth::{self, Capability};
use crate::engine::scoring::compute_score;
use crate::error::{AppError, Result};
use crate::models::actor::Actor;
use crate::models::driver::Driver;
use crate::models::shipment::ShipmentStatus;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRequest {
    pub shipment_id: Uuid,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchOutcome {
    Assigned(Uuid),
    Requeued,
    Skipped,
    GaveUp,
}

pub async fn enqueue_dispatch(state: &AppState, actor: &Actor, shipment_id: Uuid) -> Result<()> {
    auth::authorize(actor, Capability::AssignShipment)?;
    let shipment = state.shipment(shipment_id)?;
    if shipment.status != ShipmentStatus::Pending {
        return Err(AppError::ShipmentNotAssignable {
            shipment_id,
            status: shipment.status,
            version: shipment.version,
        });
    }

    send(
        state,
        DispatchRequest {
            shipment_id,
            attempt: 0,
        },
    )
    .await
}

/// Counts the request before it is visible to the worker, which may take it
/// off the queue as soon as `send` returns.
async fn send(state: &AppState, request: DispatchRequest) -> Result<()> {
    state.metrics.dispatch_queue_depth.inc();
    if let Err(err) = state.dispatch_tx.send(request).await {
        state.metrics.dispatch_queue_depth.dec();
        return Err(AppError::Internal(format!("dispatch queue send failed: {err}")));
    }
    Ok(())
}

pub async fn run_dispatch_worker(state: Arc<AppState>, mut dispatch_rx: mpsc::Receiver<DispatchRequest>) {
    info!("dispatch worker started");

    while let Some(request) = dispatch_rx.recv().await {
        state.metrics.dispatch_queue_depth.dec();

        match process_request(&state, request).await {
            Ok(DispatchOutcome::Assigned(driver_id)) => {
                info!(
                    shipment_id = %request.shipment_id,
                    driver_id = %driver_id,
                    attempt = request.attempt,
                    "shipment dispatched"
                );
            }
            Ok(DispatchOutcome::Requeued | DispatchOutcome::Skipped) => {}
            Ok(DispatchOutcome::GaveUp) => {
                warn!(
                    shipment_id = %request.shipment_id,
                    attempts = request.attempt + 1,
                    "no driver found; giving up on automatic dispatch"
                );
            }
            Err(err) => {
                error!(shipment_id = %request.shipment_id, error = %err, "failed to dispatch shipment");
            }
        }
    }

    warn!("dispatch worker stopped: queue channel closed");
}

async fn process_request(state: &Arc<AppState>, request: DispatchRequest) -> Result<DispatchOutcome> {
    let shipment = state.shipment(request.shipment_id)?;
    if shipment.status != ShipmentStatus::Pending || shipment.driver_id.is_some() {
        return Ok(DispatchOutcome::Skipped);
    }

    let max_concurrent = state.config.max_concurrent_assignments;
    let candidates: Vec<Driver> = state
        .drivers
        .iter()
        .filter(|entry| entry.is_online && entry.unavailability(max_concurrent).is_none())
        .map(|entry| entry.value().clone())
        .collect();

    let pickup = shipment.pickup_address.coordinates;
    let best = candidates
        .iter()
        .map(|driver| (driver, compute_score(driver, pickup, max_concurrent)))
        .max_by(|a, b| (a.1).0.total_cmp(&(b.1).0));

    let Some((driver, (score, breakdown))) = best else {
        warn!(shipment_id = %shipment.id, "no eligible drivers; re-queueing shipment");
        return retry_later(state, request);
    };

    match assignment::commit(
        state,
        shipment.id,
        driver.id,
        Some(shipment.version),
        AssignSource::Dispatch,
    )
    .await
    {
        Ok(_) => {
            info!(
                shipment_id = %shipment.id,
                driver_id = %driver.id,
                score,
                distance_km = ?breakdown.distance_km,
                "dispatch picked driver"
            );
            Ok(DispatchOutcome::Assigned(driver.id))
        }
        Err(AppError::DriverUnavailable { .. } | AppError::ShipmentNotAssignable { .. }) => {
            retry_later(state, request)
        }
        Err(err) => Err(err),
    }
}

fn retry_later(state: &Arc<AppState>, request: DispatchRequest) -> Result<DispatchOutcome> {
    let attempt = request.attempt + 1;
    if attempt >= state.config.dispatch_max_attempts {
        return Ok(DispatchOutcome::GaveUp);
    }

    let state = Arc::clone(state);
    let delay = Duration::from_millis(state.config.dispatch_retry_ms);
    tokio::spawn(async move {
        sleep(delay).await;
        let retry = DispatchRequest {
            shipment_id: request.shipment_id,
            attempt,
        };
        if let Err(err) = send(&state, retry).await {
            error!(shipment_id = %request.shipment_id, error = %err, "failed to re-queue shipment");
        }
    });
    Ok(DispatchOutcome::Requeued)
}
