use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::dispatch::DispatchRequest;
use crate::error::{AppError, Result};
use crate::models::driver::Driver;
use crate::models::earnings::DriverEarnings;
use crate::models::payout::DriverPayout;
use crate::models::shipment::Shipment;
use crate::observability::metrics::Metrics;

/// One async mutex per entity id. Multi-entity operations take the
/// shipment lock first, then driver locks in ascending id order.
#[derive(Default)]
pub struct EntityLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Held entity lock. The table entry is dropped with the last holder so
/// ids that are no longer touched do not accumulate.
pub struct EntityGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    id: Uuid,
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means nobody is queued.
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl EntityLocks {
    pub async fn lock(&self, id: Uuid) -> EntityGuard<'_> {
        let lock = Arc::clone(&self.locks.entry(id).or_default());
        EntityGuard {
            guard: Some(lock.lock_owned().await),
            id,
            locks: &self.locks,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub async fn lock_many(&self, ids: &[Uuid]) -> Vec<EntityGuard<'_>> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for id in ordered {
            guards.push(self.lock(id).await);
        }
        guards
    }
}

pub struct AppState {
    pub config: Config,
    pub drivers: DashMap<Uuid, Driver>,
    pub drivers_by_license: DashMap<String, Uuid>,
    pub shipments: DashMap<Uuid, Shipment>,
    pub shipments_by_order: DashMap<Uuid, Uuid>,
    pub shipments_by_tracking: DashMap<String, Uuid>,
    pub earnings: DashMap<Uuid, DriverEarnings>,
    pub earnings_by_shipment: DashMap<Uuid, Uuid>,
    pub payouts: DashMap<Uuid, DriverPayout>,
    pub shipment_locks: EntityLocks,
    pub driver_locks: EntityLocks,
    pub dispatch_tx: mpsc::Sender<DispatchRequest>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> (Self, mpsc::Receiver<DispatchRequest>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size);

        (
            Self {
                config,
                drivers: DashMap::new(),
                drivers_by_license: DashMap::new(),
                shipments: DashMap::new(),
                shipments_by_order: DashMap::new(),
                shipments_by_tracking: DashMap::new(),
                earnings: DashMap::new(),
                earnings_by_shipment: DashMap::new(),
                payouts: DashMap::new(),
                shipment_locks: EntityLocks::default(),
                driver_locks: EntityLocks::default(),
                dispatch_tx,
                metrics: Metrics::new(),
            },
            dispatch_rx,
        )
    }

    pub fn driver(&self, id: Uuid) -> Result<Driver> {
        self.drivers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found("driver", id))
    }

    pub fn shipment(&self, id: Uuid) -> Result<Shipment> {
        self.shipments
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found("shipment", id))
    }

    pub fn payout(&self, id: Uuid) -> Result<DriverPayout> {
        self.payouts
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found("payout", id))
    }

    /// Applies `f` to a stored driver in place.
    pub(crate) fn update_driver<T>(&self, id: Uuid, f: impl FnOnce(&mut Driver) -> T) -> Result<T> {
        let mut entry = self
            .drivers
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("driver", id))?;
        Ok(f(entry.value_mut()))
    }

    pub(crate) fn update_shipment<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Shipment) -> T,
    ) -> Result<T> {
        let mut entry = self
            .shipments
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("shipment", id))?;
        Ok(f(entry.value_mut()))
    }

    pub(crate) fn update_payout<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut DriverPayout) -> T,
    ) -> Result<T> {
        let mut entry = self
            .payouts
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("payout", id))?;
        Ok(f(entry.value_mut()))
    }
}
