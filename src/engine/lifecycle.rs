use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKING_TRANSITIONS_TOTAL, EMPTY_AVAILABILITY_TOTAL};

use super::availability::driver_eligible;
use super::conflict::{find_conflict, now_ms, trip_window, CheckStage};
use super::validation::{in_range, optional_text, required_text};
use super::{apply_transition, protocol, Constraint, Engine, EngineError, Entity};

/// A trip request as submitted by a requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub departure_at: Ms,
    pub arrival_at: Ms,
    pub requester_name: String,
    pub headcount: u32,
    pub destination: String,
    pub description: Option<String>,
    pub required_category: VehicleCategory,
    pub needs_driver: bool,
}

/// An administrator's allocation decision.
#[derive(Debug, Clone, Default)]
pub struct Approval {
    pub vehicle_id: Option<Ulid>,
    pub driver_id: Option<Ulid>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject,
    Cancel,
    Start,
    Complete,
}

impl Transition {
    pub fn allowed_from(&self) -> &'static [BookingStatus] {
        use BookingStatus::*;
        match self {
            Transition::Approve | Transition::Reject => &[Pending],
            Transition::Cancel => &[Pending, Approved, InProgress],
            Transition::Start => &[Approved],
            Transition::Complete => &[InProgress],
        }
    }

    pub fn target(&self) -> BookingStatus {
        match self {
            Transition::Approve => BookingStatus::Approved,
            Transition::Reject => BookingStatus::Rejected,
            Transition::Cancel => BookingStatus::Cancelled,
            Transition::Start => BookingStatus::InProgress,
            Transition::Complete => BookingStatus::Completed,
        }
    }

    /// The transition that ends in `status`, if any does.
    pub fn into_status(status: BookingStatus) -> Option<Self> {
        [
            Transition::Approve,
            Transition::Reject,
            Transition::Cancel,
            Transition::Start,
            Transition::Complete,
        ]
        .into_iter()
        .find(|t| t.target() == status)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
            Transition::Start => "start",
            Transition::Complete => "complete",
        }
    }

    fn check(&self, booking: &Booking) -> Result<(), EngineError> {
        if self.allowed_from().contains(&booking.status) {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                booking: booking.id,
                expected: self.allowed_from(),
                actual: booking.status,
            })
        }
    }
}

fn record<T>(transition: &'static str, result: &Result<T, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "transition" => transition, "outcome" => outcome)
        .increment(1);
}

async fn write_opt<T>(lock: &Option<Arc<RwLock<T>>>) -> Option<tokio::sync::RwLockWriteGuard<'_, T>> {
    match lock {
        Some(l) => Some(l.write().await),
        None => None,
    }
}

impl Engine {
    /// Validate a trip request, confirm at least one vehicle could serve it,
    /// and store it as Pending under a fresh protocol.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        let result = self.create_booking_inner(req).await;
        record("create", &result);
        result
    }

    async fn create_booking_inner(&self, req: NewBooking) -> Result<Booking, EngineError> {
        let now = now_ms();
        let window = trip_window(req.departure_at, req.arrival_at, now)?;
        let requester_name = required_text("requester_name", &req.requester_name, MAX_NAME_LEN)?;
        let destination = required_text("destination", &req.destination, MAX_PURPOSE_LEN)?;
        let description =
            optional_text("description", req.description.as_deref(), MAX_DESCRIPTION_LEN)?;
        let headcount = in_range("headcount", req.headcount, 1, MAX_HEADCOUNT)?;
        if self.bookings.len() >= MAX_BOOKINGS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }

        let _gate = self.commit_gate().await;

        let candidates = self
            .available_vehicles_in(req.required_category, &window, CheckStage::Creation, None)
            .await;
        if candidates.is_empty() {
            metrics::counter!(EMPTY_AVAILABILITY_TOTAL, "resource" => "vehicle").increment(1);
            debug!(category = req.required_category.as_str(), "no vehicle for requested window");
            return Err(EngineError::NoAvailability {
                category: req.required_category,
                window,
            });
        }

        let id = Ulid::new();
        let protocol = self.reserve_protocol(id, now)?;
        let booking = Booking {
            id,
            protocol: protocol.clone(),
            departure_at: window.start,
            arrival_at: window.end,
            requester_name,
            headcount,
            destination,
            description,
            required_category: req.required_category,
            needs_driver: req.needs_driver,
            status: BookingStatus::Pending,
            created_at: now,
            allocated_vehicle_id: None,
            allocated_driver_id: None,
            admin_notes: None,
        };

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            Self::release_key(&self.protocols, &protocol, id);
            return Err(e);
        }
        self.bookings.insert(id, Arc::new(RwLock::new(booking.clone())));
        info!(booking = %id, protocol = %protocol, candidates = candidates.len(), "booking created");
        Ok(booking)
    }

    fn reserve_protocol(&self, id: Ulid, now: Ms) -> Result<String, EngineError> {
        let mut rng = rand::thread_rng();
        for _ in 0..PROTOCOL_ATTEMPTS {
            let candidate = protocol::generate(now, &mut rng);
            if Self::reserve_key(&self.protocols, &candidate, id) {
                return Ok(candidate);
            }
        }
        warn!(booking = %id, "protocol space exhausted for this second");
        Err(EngineError::ConflictViolation(Constraint::DuplicateProtocol))
    }

    /// Pending → Approved. Allocates the chosen vehicle (and driver) after
    /// re-checking, under their locks, that both are still free.
    pub async fn approve_booking(&self, id: Ulid, approval: Approval) -> Result<Booking, EngineError> {
        let result = self.approve_inner(id, approval).await;
        record(Transition::Approve.as_str(), &result);
        result
    }

    async fn approve_inner(&self, id: Ulid, approval: Approval) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate().await;

        let booking_lock = self.booking(&id)?;
        let mut booking = booking_lock.write().await;
        Transition::Approve.check(&booking)?;
        let notes = optional_text("admin_notes", approval.notes.as_deref(), MAX_NOTES_LEN)?;

        let vehicle_id = approval
            .vehicle_id
            .ok_or_else(|| EngineError::invalid("vehicle_id", "a vehicle must be selected"))?;
        if booking.needs_driver && approval.driver_id.is_none() {
            return Err(EngineError::invalid(
                "driver_id",
                "this trip needs a driver",
            ));
        }

        let vehicle_lock = self.vehicle(&vehicle_id)?;
        let driver_lock = approval.driver_id.map(|d| self.driver(&d)).transpose()?;

        // Lock order: booking, vehicle, driver.
        let mut vehicle = vehicle_lock.write().await;
        let mut driver = write_opt(&driver_lock).await;

        let window = booking.window();
        let blocking = self.policy.blocking(CheckStage::Review);
        let now = now_ms();

        if vehicle.vehicle.category != booking.required_category {
            return Err(EngineError::invalid(
                "vehicle_id",
                format!(
                    "vehicle is {}, booking needs {}",
                    vehicle.vehicle.category.as_str(),
                    booking.required_category.as_str()
                ),
            ));
        }
        if vehicle.vehicle.status == VehicleStatus::Maintenance {
            return Err(EngineError::invalid("vehicle_id", "vehicle is in maintenance"));
        }
        if let Some(conflicting_booking) = find_conflict(&vehicle.schedule, &window, blocking, Some(id)) {
            return Err(EngineError::ConflictViolation(Constraint::DoubleAllocation {
                resource: Entity::Vehicle,
                resource_id: vehicle_id,
                conflicting_booking,
            }));
        }

        if let Some(d) = driver.as_deref() {
            if !driver_eligible(&d.driver, None, now) {
                return Err(EngineError::invalid(
                    "driver_id",
                    "driver is irregular or has expired documents",
                ));
            }
            if let Some(conflicting_booking) = find_conflict(&d.schedule, &window, blocking, Some(id)) {
                return Err(EngineError::ConflictViolation(Constraint::DoubleAllocation {
                    resource: Entity::Driver,
                    resource_id: d.driver.id,
                    conflicting_booking,
                }));
            }
        }

        let event = Event::BookingApproved {
            id,
            vehicle_id,
            driver_id: approval.driver_id,
            notes,
        };
        self.wal_append(&event).await?;
        apply_transition(&mut booking, Some(&mut *vehicle), driver.as_deref_mut(), &event);
        info!(
            booking = %id,
            protocol = %booking.protocol,
            vehicle = %vehicle_id,
            driver = ?approval.driver_id,
            "booking approved"
        );
        Ok(booking.clone())
    }

    /// Pending → Rejected. Notes explaining the decision are mandatory.
    pub async fn reject_booking(&self, id: Ulid, notes: &str) -> Result<Booking, EngineError> {
        let result = self
            .run_transition(id, Transition::Reject, || {
                let notes = required_text("admin_notes", notes, MAX_NOTES_LEN)?;
                Ok(Event::BookingRejected { id, notes })
            })
            .await;
        record(Transition::Reject.as_str(), &result);
        result
    }

    /// Pending/Approved/InProgress → Cancelled. Frees whatever was allocated.
    pub async fn cancel_booking(&self, id: Ulid, notes: &str) -> Result<Booking, EngineError> {
        let result = self
            .run_transition(id, Transition::Cancel, || {
                let notes = required_text("admin_notes", notes, MAX_NOTES_LEN)?;
                Ok(Event::BookingCancelled { id, notes })
            })
            .await;
        record(Transition::Cancel.as_str(), &result);
        result
    }

    /// Approved → InProgress.
    pub async fn start_trip(&self, id: Ulid) -> Result<Booking, EngineError> {
        let result = self
            .run_transition(id, Transition::Start, || Ok(Event::TripStarted { id }))
            .await;
        record(Transition::Start.as_str(), &result);
        result
    }

    /// InProgress → Completed. Notes are appended to what the admin already wrote.
    pub async fn complete_trip(&self, id: Ulid, notes: Option<&str>) -> Result<Booking, EngineError> {
        let result = self
            .run_transition(id, Transition::Complete, || {
                let notes = optional_text("completion_notes", notes, MAX_NOTES_LEN)?;
                Ok(Event::TripCompleted { id, notes })
            })
            .await;
        record(Transition::Complete.as_str(), &result);
        result
    }

    /// Check, persist and apply a transition that touches only the resources
    /// the booking already holds. `build` validates input and runs only once
    /// the status check has passed.
    async fn run_transition(
        &self,
        id: Ulid,
        transition: Transition,
        build: impl FnOnce() -> Result<Event, EngineError>,
    ) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate().await;
        let booking_lock = self.booking(&id)?;
        let mut booking = booking_lock.write().await;
        transition.check(&booking)?;
        let event = build()?;

        let vehicle_lock = booking
            .allocated_vehicle_id
            .map(|v| self.vehicle(&v))
            .transpose()?;
        let driver_lock = booking
            .allocated_driver_id
            .map(|d| self.driver(&d))
            .transpose()?;
        let mut vehicle = write_opt(&vehicle_lock).await;
        let mut driver = write_opt(&driver_lock).await;

        self.wal_append(&event).await?;
        apply_transition(&mut booking, vehicle.as_deref_mut(), driver.as_deref_mut(), &event);
        info!(
            booking = %id,
            protocol = %booking.protocol,
            status = booking.status.as_str(),
            "booking {}",
            transition.as_str()
        );
        Ok(booking.clone())
    }
}
