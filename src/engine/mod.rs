mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod protocol;
mod queries;
pub mod validation;

pub use availability::{driver_available, driver_eligible, vehicle_available, vehicle_eligible};
pub use conflict::{find_conflict, has_conflict, now_ms, BlockingPolicy, BlockingSet, CheckStage};
pub use error::{Constraint, EngineError, Entity};
pub use lifecycle::{Approval, NewBooking, Transition};
pub use mutations::{DriverUpdate, NewDriver, NewVehicle, VehicleUpdate};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Notify, RwLock, RwLockReadGuard};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedBooking = Arc<RwLock<Booking>>;
pub type SharedVehicle = Arc<RwLock<VehicleState>>;
pub type SharedDriver = Arc<RwLock<DriverState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Appends that queue up while one batch is being written are
/// drained and committed with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, batch.iter().map(|(event, _)| event));
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!(batch = batch.len(), "wal flush failed: {e}");
        }
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// Write and fsync a run of events as one unit. On failure nothing from the
/// run stays in the log, matching the error every caller receives.
fn flush_batch<'a>(wal: &mut Wal, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
    let result = events
        .into_iter()
        .try_for_each(|event| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.discard_pending()
    {
        tracing::error!("wal: could not roll back failed batch: {e}");
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = flush_batch(wal, std::iter::once(&event));
            let _ = response.send(result);
        }
    }
}

// ── Applying events ──────────────────────────────────────

fn allocation(booking: &Booking) -> Allocation {
    Allocation {
        booking_id: booking.id,
        span: booking.window(),
        status: booking.status,
    }
}

/// Apply one lifecycle event to a booking and the resources it touches.
/// The caller holds every lock involved. For approval the resources are the
/// ones named in the event; otherwise they are the booking's allocations.
pub(super) fn apply_transition(
    booking: &mut Booking,
    mut vehicle: Option<&mut VehicleState>,
    mut driver: Option<&mut DriverState>,
    event: &Event,
) {
    match event {
        Event::BookingApproved {
            vehicle_id,
            driver_id,
            notes,
            ..
        } => {
            booking.status = BookingStatus::Approved;
            booking.allocated_vehicle_id = Some(*vehicle_id);
            booking.allocated_driver_id = *driver_id;
            if notes.is_some() {
                booking.admin_notes = notes.clone();
            }
            if let Some(v) = vehicle.as_deref_mut() {
                v.vehicle.status = VehicleStatus::Reserved;
                v.schedule.insert(allocation(booking));
            }
            if let Some(d) = driver.as_deref_mut() {
                d.driver.status = DriverStatus::Busy;
                d.schedule.insert(allocation(booking));
            }
        }
        Event::BookingRejected { notes, .. } => {
            booking.status = BookingStatus::Rejected;
            booking.admin_notes = Some(notes.clone());
            booking.allocated_vehicle_id = None;
            booking.allocated_driver_id = None;
        }
        Event::BookingCancelled { notes, .. } => {
            booking.status = BookingStatus::Cancelled;
            booking.admin_notes = Some(notes.clone());
            booking.allocated_vehicle_id = None;
            booking.allocated_driver_id = None;
            if let Some(v) = vehicle.as_deref_mut() {
                v.vehicle.status = VehicleStatus::Available;
                v.schedule.remove(booking.id);
            }
            if let Some(d) = driver.as_deref_mut() {
                d.driver.status = DriverStatus::Available;
                d.schedule.remove(booking.id);
            }
        }
        Event::TripStarted { .. } => {
            booking.status = BookingStatus::InProgress;
            if let Some(v) = vehicle.as_deref_mut() {
                v.vehicle.status = VehicleStatus::InUse;
                v.schedule.set_status(booking.id, booking.status);
            }
            if let Some(d) = driver.as_deref_mut() {
                d.driver.status = DriverStatus::Busy;
                d.schedule.set_status(booking.id, booking.status);
            }
        }
        Event::TripCompleted { notes, .. } => {
            booking.status = BookingStatus::Completed;
            if let Some(n) = notes {
                booking.admin_notes = Some(match booking.admin_notes.as_deref() {
                    Some(prev) if !prev.trim().is_empty() => {
                        format!("{prev}\n\nCompletion: {n}")
                    }
                    _ => format!("Completion: {n}"),
                });
            }
            if let Some(v) = vehicle.as_deref_mut() {
                v.vehicle.status = VehicleStatus::Available;
                v.schedule.set_status(booking.id, booking.status);
            }
            if let Some(d) = driver.as_deref_mut() {
                d.driver.status = DriverStatus::Available;
                d.schedule.set_status(booking.id, booking.status);
            }
        }
        _ => {}
    }
}

/// Keep a string index pointing at `id` under `key`, dropping `old` if the key moved.
fn reindex(index: &DashMap<String, Ulid>, old: Option<&str>, key: &str, id: Ulid) {
    if let Some(old) = old
        && old != key
    {
        index.remove_if(old, |_, owner| *owner == id);
    }
    index.insert(key.to_string(), id);
}

/// Plain-value state rebuilt from the log before the engine goes live.
#[derive(Default)]
struct Replayed {
    bookings: HashMap<Ulid, Booking>,
    vehicles: HashMap<Ulid, VehicleState>,
    drivers: HashMap<Ulid, DriverState>,
    protocols: DashMap<String, Ulid>,
    plates: DashMap<String, Ulid>,
    licenses: DashMap<String, Ulid>,
}

impl Replayed {
    fn apply(&mut self, event: &Event) {
        match event {
            Event::VehicleRegistered { vehicle } | Event::VehicleUpdated { vehicle } => {
                let old = self.vehicles.get(&vehicle.id).map(|s| s.vehicle.plate.clone());
                reindex(&self.plates, old.as_deref(), &vehicle.plate, vehicle.id);
                self.vehicles
                    .entry(vehicle.id)
                    .and_modify(|s| s.vehicle = vehicle.clone())
                    .or_insert_with(|| VehicleState::new(vehicle.clone()));
            }
            Event::DriverRegistered { driver } | Event::DriverUpdated { driver } => {
                let old = self
                    .drivers
                    .get(&driver.id)
                    .map(|s| s.driver.license_number.clone());
                reindex(&self.licenses, old.as_deref(), &driver.license_number, driver.id);
                self.drivers
                    .entry(driver.id)
                    .and_modify(|s| s.driver = driver.clone())
                    .or_insert_with(|| DriverState::new(driver.clone()));
            }
            Event::DriverStatusesRefreshed { changes } => {
                for (id, status) in changes {
                    if let Some(s) = self.drivers.get_mut(id) {
                        s.driver.status = *status;
                    }
                }
            }
            Event::BookingCreated { booking } => {
                // Snapshots carry bookings past Pending; rebuild their allocations.
                if booking.status.implies_allocation() {
                    if let Some(v) = booking
                        .allocated_vehicle_id
                        .and_then(|id| self.vehicles.get_mut(&id))
                    {
                        v.schedule.insert(allocation(booking));
                    }
                    if let Some(d) = booking
                        .allocated_driver_id
                        .and_then(|id| self.drivers.get_mut(&id))
                    {
                        d.schedule.insert(allocation(booking));
                    }
                }
                self.protocols.insert(booking.protocol.clone(), booking.id);
                self.bookings.insert(booking.id, booking.clone());
            }
            other => {
                let Some(booking) = other.booking_id().and_then(|id| self.bookings.get_mut(&id))
                else {
                    return;
                };
                let (vehicle_id, driver_id) = match other {
                    Event::BookingApproved {
                        vehicle_id,
                        driver_id,
                        ..
                    } => (Some(*vehicle_id), *driver_id),
                    _ => (booking.allocated_vehicle_id, booking.allocated_driver_id),
                };
                let vehicle = vehicle_id.and_then(|id| self.vehicles.get_mut(&id));
                let driver = driver_id.and_then(|id| self.drivers.get_mut(&id));
                apply_transition(booking, vehicle, driver, other);
            }
        }
    }
}

/// Clone every Arc out of the map in id (registration) order, so no shard
/// lock is held across an await.
pub(super) fn in_id_order<T>(map: &DashMap<Ulid, Arc<RwLock<T>>>) -> Vec<Arc<RwLock<T>>> {
    let mut entries: Vec<(Ulid, Arc<RwLock<T>>)> = map
        .iter()
        .map(|e| (*e.key(), e.value().clone()))
        .collect();
    entries.sort_by_key(|(id, _)| *id);
    entries.into_iter().map(|(_, v)| v).collect()
}

fn shared<T>(map: HashMap<Ulid, T>) -> DashMap<Ulid, Arc<RwLock<T>>> {
    map.into_iter()
        .map(|(id, v)| (id, Arc::new(RwLock::new(v))))
        .collect()
}

/// The booking allocation engine: the fleet registry, every booking and the
/// per-resource schedules, all in memory and backed by the WAL.
pub struct Engine {
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    pub(super) vehicles: DashMap<Ulid, SharedVehicle>,
    pub(super) drivers: DashMap<Ulid, SharedDriver>,
    pub(super) protocols: DashMap<String, Ulid>,
    pub(super) plates: DashMap<String, Ulid>,
    pub(super) licenses: DashMap<String, Ulid>,
    pub policy: BlockingPolicy,
    /// Mutations hold this shared for their whole duration; compaction takes
    /// it exclusively so the snapshot and the live log never diverge.
    commit_gate: RwLock<()>,
    /// Poked after every durable append; wakes the compactor.
    write_signal: Notify,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, policy: BlockingPolicy) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut replayed = Replayed::default();
        for event in &events {
            replayed.apply(event);
        }
        tracing::info!(
            events = events.len(),
            bookings = replayed.bookings.len(),
            vehicles = replayed.vehicles.len(),
            drivers = replayed.drivers.len(),
            "engine state replayed"
        );

        Ok(Self {
            bookings: shared(replayed.bookings),
            vehicles: shared(replayed.vehicles),
            drivers: shared(replayed.drivers),
            protocols: replayed.protocols,
            plates: replayed.plates,
            licenses: replayed.licenses,
            policy,
            commit_gate: RwLock::new(()),
            write_signal: Notify::new(),
            wal_tx,
        })
    }

    /// Send an event to the group-commit writer and wait for the fsync.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        self.write_signal.notify_one();
        Ok(())
    }

    /// Resolves once an append has landed since the last call. Wakeups
    /// coalesce: many appends may be behind a single return.
    pub async fn wait_for_writes(&self) {
        self.write_signal.notified().await;
    }

    pub(super) async fn commit_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    pub(super) fn booking(&self, id: &Ulid) -> Result<SharedBooking, EngineError> {
        self.bookings
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::not_found(Entity::Booking, id))
    }

    pub(super) fn vehicle(&self, id: &Ulid) -> Result<SharedVehicle, EngineError> {
        self.vehicles
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::not_found(Entity::Vehicle, id))
    }

    pub(super) fn driver(&self, id: &Ulid) -> Result<SharedDriver, EngineError> {
        self.drivers
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::not_found(Entity::Driver, id))
    }

    /// Claim `key` in a unique index for `id`. Fails if another entity owns it.
    pub(super) fn reserve_key(index: &DashMap<String, Ulid>, key: &str, id: Ulid) -> bool {
        match index.entry(key.to_string()) {
            Entry::Occupied(e) => *e.get() == id,
            Entry::Vacant(e) => {
                e.insert(id);
                true
            }
        }
    }

    pub(super) fn release_key(index: &DashMap<String, Ulid>, key: &str, id: Ulid) {
        index.remove_if(key, |_, owner| *owner == id);
    }

    /// Conflict check against one resource's current schedule.
    pub async fn has_conflict(
        &self,
        resource: Entity,
        resource_id: Ulid,
        window: Span,
        exclude: Option<Ulid>,
        stage: CheckStage,
    ) -> Result<bool, EngineError> {
        let blocking = self.policy.blocking(stage);
        match resource {
            Entity::Vehicle => {
                let v = self.vehicle(&resource_id)?;
                let guard = v.read().await;
                Ok(has_conflict(&guard.schedule, &window, blocking, exclude))
            }
            Entity::Driver => {
                let d = self.driver(&resource_id)?;
                let guard = d.read().await;
                Ok(has_conflict(&guard.schedule, &window, blocking, exclude))
            }
            Entity::Booking => Err(EngineError::invalid(
                "resource",
                "bookings have no schedule",
            )),
        }
    }
}
