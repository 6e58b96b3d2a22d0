use std::sync::Arc;

use chrono::{Local, TimeZone};
use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::validation::*;
use super::{in_id_order, reindex, Constraint, Engine, EngineError, Entity, WalCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVehicle {
    pub plate: String,
    pub model: String,
    pub category: VehicleCategory,
    pub passenger_capacity: u32,
    /// Defaults to Available.
    pub status: Option<VehicleStatus>,
    pub notes: Option<String>,
}

/// Full replacement of a vehicle's editable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleUpdate {
    pub plate: String,
    pub model: String,
    pub category: VehicleCategory,
    pub passenger_capacity: u32,
    pub status: VehicleStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDriver {
    pub full_name: String,
    pub license_number: String,
    pub license_expiry: Ms,
    pub license_category: LicenseCategory,
    pub phone: String,
    pub toxicology_exam_date: Ms,
    pub notes: Option<String>,
}

/// Full replacement of a driver's editable fields. A requested Available or
/// Irregular status is recomputed from the documents; Busy and OffDuty stick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverUpdate {
    pub full_name: String,
    pub license_number: String,
    pub license_expiry: Ms,
    pub license_category: LicenseCategory,
    pub phone: String,
    pub toxicology_exam_date: Ms,
    pub status: DriverStatus,
    pub notes: Option<String>,
}

fn check_date(field: &'static str, at: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&at) {
        return Err(EngineError::invalid(field, "date out of range"));
    }
    Ok(())
}

fn check_exam_date(exam: Ms, now: Ms) -> Result<(), EngineError> {
    check_date("toxicology_exam_date", exam)?;
    if exam > now {
        return Err(EngineError::invalid(
            "toxicology_exam_date",
            "exam date cannot be in the future",
        ));
    }
    Ok(())
}

/// `[REMOVED ON dd/mm/yyyy] previous notes`
fn removal_note(previous: Option<&str>, now: Ms) -> String {
    let date = Local
        .timestamp_millis_opt(now)
        .single()
        .map(|dt| dt.format("%d/%m/%Y").to_string())
        .unwrap_or_default();
    match previous.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => format!("[REMOVED ON {date}] {p}"),
        None => format!("[REMOVED ON {date}]"),
    }
}

/// Allocations that keep a resource from being removed.
fn active_allocations(schedule: &Schedule) -> usize {
    schedule
        .allocations
        .iter()
        .filter(|a| {
            matches!(
                a.status,
                BookingStatus::Pending | BookingStatus::Approved | BookingStatus::InProgress
            )
        })
        .count()
}

struct VehicleFields {
    plate: String,
    model: String,
    passenger_capacity: u32,
    notes: Option<String>,
}

fn vehicle_fields(
    plate: &str,
    model: &str,
    passenger_capacity: u32,
    notes: Option<&str>,
) -> Result<VehicleFields, EngineError> {
    Ok(VehicleFields {
        plate: normalize_plate(plate)?,
        model: required_text("model", model, MAX_MODEL_LEN)?,
        passenger_capacity: in_range("passenger_capacity", passenger_capacity, 1, MAX_PASSENGER_CAPACITY)?,
        notes: optional_text("notes", notes, MAX_NOTES_LEN)?,
    })
}

struct DriverFields {
    full_name: String,
    license_number: String,
    phone: String,
    notes: Option<String>,
}

fn driver_fields(
    full_name: &str,
    license_number: &str,
    phone: &str,
    notes: Option<&str>,
) -> Result<DriverFields, EngineError> {
    Ok(DriverFields {
        full_name: title_case(&required_text("full_name", full_name, MAX_NAME_LEN)?),
        license_number: normalize_license_number(license_number)?,
        phone: normalize_phone(phone)?,
        notes: optional_text("notes", notes, MAX_NOTES_LEN)?,
    })
}

impl Engine {
    // ── Vehicles ─────────────────────────────────────────────────

    pub async fn register_vehicle(&self, req: NewVehicle) -> Result<Vehicle, EngineError> {
        let f = vehicle_fields(&req.plate, &req.model, req.passenger_capacity, req.notes.as_deref())?;
        if self.vehicles.len() >= MAX_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        let _gate = self.commit_gate().await;

        let vehicle = Vehicle {
            id: Ulid::new(),
            plate: f.plate,
            model: f.model,
            category: req.category,
            passenger_capacity: f.passenger_capacity,
            status: req.status.unwrap_or(VehicleStatus::Available),
            notes: f.notes,
        };
        if !Self::reserve_key(&self.plates, &vehicle.plate, vehicle.id) {
            return Err(EngineError::ConflictViolation(Constraint::DuplicatePlate(vehicle.plate)));
        }

        let event = Event::VehicleRegistered {
            vehicle: vehicle.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            Self::release_key(&self.plates, &vehicle.plate, vehicle.id);
            return Err(e);
        }
        self.vehicles
            .insert(vehicle.id, Arc::new(RwLock::new(VehicleState::new(vehicle.clone()))));
        info!(vehicle = %vehicle.id, plate = %vehicle.plate, "vehicle registered");
        Ok(vehicle)
    }

    pub async fn update_vehicle(&self, id: Ulid, req: VehicleUpdate) -> Result<Vehicle, EngineError> {
        let f = vehicle_fields(&req.plate, &req.model, req.passenger_capacity, req.notes.as_deref())?;
        let _gate = self.commit_gate().await;
        let lock = self.vehicle(&id)?;
        let mut state = lock.write().await;

        let vehicle = Vehicle {
            id,
            plate: f.plate,
            model: f.model,
            category: req.category,
            passenger_capacity: f.passenger_capacity,
            status: req.status,
            notes: f.notes,
        };
        self.commit_vehicle(&mut state, vehicle).await
    }

    /// Soft removal: the vehicle goes to maintenance with an audit note.
    /// Refused while any active booking still holds it.
    pub async fn retire_vehicle(&self, id: Ulid) -> Result<Vehicle, EngineError> {
        let _gate = self.commit_gate().await;
        let lock = self.vehicle(&id)?;
        let mut state = lock.write().await;

        let count = active_allocations(&state.schedule);
        if count > 0 {
            return Err(EngineError::ConflictViolation(Constraint::ActiveBookings {
                resource: Entity::Vehicle,
                resource_id: id,
                count,
            }));
        }
        let mut vehicle = state.vehicle.clone();
        vehicle.status = VehicleStatus::Maintenance;
        vehicle.notes = Some(removal_note(vehicle.notes.as_deref(), now_ms()));
        self.commit_vehicle(&mut state, vehicle).await
    }

    async fn commit_vehicle(
        &self,
        state: &mut VehicleState,
        vehicle: Vehicle,
    ) -> Result<Vehicle, EngineError> {
        let old_plate = state.vehicle.plate.clone();
        let moved = old_plate != vehicle.plate;
        if moved && !Self::reserve_key(&self.plates, &vehicle.plate, vehicle.id) {
            return Err(EngineError::ConflictViolation(Constraint::DuplicatePlate(vehicle.plate)));
        }
        let event = Event::VehicleUpdated {
            vehicle: vehicle.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            if moved {
                Self::release_key(&self.plates, &vehicle.plate, vehicle.id);
            }
            return Err(e);
        }
        reindex(&self.plates, Some(&old_plate), &vehicle.plate, vehicle.id);
        state.vehicle = vehicle.clone();
        info!(vehicle = %vehicle.id, plate = %vehicle.plate, status = vehicle.status.as_str(), "vehicle updated");
        Ok(vehicle)
    }

    // ── Drivers ──────────────────────────────────────────────────

    pub async fn register_driver(&self, req: NewDriver) -> Result<Driver, EngineError> {
        let f = driver_fields(&req.full_name, &req.license_number, &req.phone, req.notes.as_deref())?;
        let now = now_ms();
        check_date("license_expiry", req.license_expiry)?;
        if req.license_expiry < now - DAY_MS {
            return Err(EngineError::invalid(
                "license_expiry",
                "license expired more than a day ago",
            ));
        }
        check_exam_date(req.toxicology_exam_date, now)?;
        if self.drivers.len() >= MAX_DRIVERS {
            return Err(EngineError::LimitExceeded("too many drivers"));
        }
        let _gate = self.commit_gate().await;

        let mut driver = Driver {
            id: Ulid::new(),
            full_name: f.full_name,
            license_number: f.license_number,
            license_expiry: req.license_expiry,
            license_category: req.license_category,
            phone: f.phone,
            toxicology_exam_date: req.toxicology_exam_date,
            status: DriverStatus::Available,
            notes: f.notes,
        };
        driver.status = driver.derived_status(now);
        if !Self::reserve_key(&self.licenses, &driver.license_number, driver.id) {
            return Err(EngineError::ConflictViolation(Constraint::DuplicateLicense(
                driver.license_number,
            )));
        }

        let event = Event::DriverRegistered {
            driver: driver.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            Self::release_key(&self.licenses, &driver.license_number, driver.id);
            return Err(e);
        }
        self.drivers
            .insert(driver.id, Arc::new(RwLock::new(DriverState::new(driver.clone()))));
        info!(driver = %driver.id, status = driver.status.as_str(), "driver registered");
        Ok(driver)
    }

    pub async fn update_driver(&self, id: Ulid, req: DriverUpdate) -> Result<Driver, EngineError> {
        let f = driver_fields(&req.full_name, &req.license_number, &req.phone, req.notes.as_deref())?;
        let now = now_ms();
        check_date("license_expiry", req.license_expiry)?;
        check_exam_date(req.toxicology_exam_date, now)?;
        let _gate = self.commit_gate().await;
        let lock = self.driver(&id)?;
        let mut state = lock.write().await;

        let mut driver = Driver {
            id,
            full_name: f.full_name,
            license_number: f.license_number,
            license_expiry: req.license_expiry,
            license_category: req.license_category,
            phone: f.phone,
            toxicology_exam_date: req.toxicology_exam_date,
            status: req.status,
            notes: f.notes,
        };
        if !driver.status.is_manual() {
            driver.status = driver.derived_status(now);
        }
        self.commit_driver(&mut state, driver).await
    }

    /// Soft removal: the driver is marked irregular with an audit note.
    pub async fn retire_driver(&self, id: Ulid) -> Result<Driver, EngineError> {
        let _gate = self.commit_gate().await;
        let lock = self.driver(&id)?;
        let mut state = lock.write().await;

        let count = active_allocations(&state.schedule);
        if count > 0 {
            return Err(EngineError::ConflictViolation(Constraint::ActiveBookings {
                resource: Entity::Driver,
                resource_id: id,
                count,
            }));
        }
        let mut driver = state.driver.clone();
        driver.status = DriverStatus::Irregular;
        driver.notes = Some(removal_note(driver.notes.as_deref(), now_ms()));
        self.commit_driver(&mut state, driver).await
    }

    async fn commit_driver(&self, state: &mut DriverState, driver: Driver) -> Result<Driver, EngineError> {
        let old_license = state.driver.license_number.clone();
        let moved = old_license != driver.license_number;
        if moved && !Self::reserve_key(&self.licenses, &driver.license_number, driver.id) {
            return Err(EngineError::ConflictViolation(Constraint::DuplicateLicense(
                driver.license_number,
            )));
        }
        let event = Event::DriverUpdated {
            driver: driver.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            if moved {
                Self::release_key(&self.licenses, &driver.license_number, driver.id);
            }
            return Err(e);
        }
        reindex(&self.licenses, Some(&old_license), &driver.license_number, driver.id);
        state.driver = driver.clone();
        info!(driver = %driver.id, status = driver.status.as_str(), "driver updated");
        Ok(driver)
    }

    /// Recompute the document-derived status of every driver not manually
    /// set to Busy or OffDuty. Returns the drivers whose status changed.
    pub async fn refresh_driver_statuses(&self) -> Result<Vec<(Ulid, DriverStatus)>, EngineError> {
        let _gate = self.commit_gate().await;
        let now = now_ms();

        // Id order, like every other multi-lock path.
        let locks = in_id_order(&self.drivers);
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.write().await);
        }

        let changes: Vec<(Ulid, DriverStatus)> = guards
            .iter()
            .filter(|g| !g.driver.status.is_manual())
            .filter_map(|g| {
                let derived = g.driver.derived_status(now);
                (derived != g.driver.status).then_some((g.driver.id, derived))
            })
            .collect();
        if changes.is_empty() {
            return Ok(changes);
        }

        let event = Event::DriverStatusesRefreshed {
            changes: changes.clone(),
        };
        self.wal_append(&event).await?;
        for guard in guards.iter_mut() {
            if let Some((_, status)) = changes.iter().find(|(id, _)| *id == guard.driver.id) {
                guard.driver.status = *status;
            }
        }
        info!(changed = changes.len(), "driver statuses refreshed");
        Ok(changes)
    }

    // ── WAL maintenance ──────────────────────────────────────────

    /// Rewrite the WAL as a snapshot of the current state: every vehicle and
    /// driver, then every booking with its status and allocations.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;

        let mut events = Vec::new();
        for lock in in_id_order(&self.vehicles) {
            events.push(Event::VehicleRegistered {
                vehicle: lock.read().await.vehicle.clone(),
            });
        }
        for lock in in_id_order(&self.drivers) {
            events.push(Event::DriverRegistered {
                driver: lock.read().await.driver.clone(),
            });
        }
        for lock in in_id_order(&self.bookings) {
            events.push(Event::BookingCreated {
                booking: lock.read().await.clone(),
            });
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "wal compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Compact once the log has grown by `threshold` appends. Failures are
    /// logged and left for the next attempt.
    pub async fn compact_if_needed(&self, threshold: u64) -> bool {
        if threshold == 0 || self.wal_appends_since_compact().await < threshold {
            return false;
        }
        match self.compact_wal().await {
            Ok(()) => true,
            Err(e) => {
                warn!("wal compaction failed: {e}");
                false
            }
        }
    }
}
