use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Calendar-aware year addition (Feb 29 clamps to Feb 28).
pub fn add_years(at: Ms, years: u32) -> Ms {
    DateTime::<Utc>::from_timestamp_millis(at)
        .and_then(|dt| dt.checked_add_months(Months::new(years * 12)))
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(Ms::MAX)
}

/// Whole days from `now` until `at`, truncated toward zero.
pub fn days_until(at: Ms, now: Ms) -> i64 {
    (at - now) / DAY_MS
}

// ── Enums ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VehicleCategory {
    Hatch,
    Sedan,
    Suv,
    Pickup,
    Truck,
}

impl VehicleCategory {
    pub const ALL: [VehicleCategory; 5] = [
        VehicleCategory::Hatch,
        VehicleCategory::Sedan,
        VehicleCategory::Suv,
        VehicleCategory::Pickup,
        VehicleCategory::Truck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleCategory::Hatch => "hatch",
            VehicleCategory::Sedan => "sedan",
            VehicleCategory::Suv => "suv",
            VehicleCategory::Pickup => "pickup",
            VehicleCategory::Truck => "truck",
        }
    }
}

impl FromStr for VehicleCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant { kind: "vehicle category", value: s.to_string() })
    }
}

/// Driving license classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LicenseCategory {
    A,
    B,
    C,
    D,
    E,
    AB,
    AC,
    AD,
    AE,
}

impl LicenseCategory {
    pub const ALL: [LicenseCategory; 9] = [
        LicenseCategory::A,
        LicenseCategory::B,
        LicenseCategory::C,
        LicenseCategory::D,
        LicenseCategory::E,
        LicenseCategory::AB,
        LicenseCategory::AC,
        LicenseCategory::AD,
        LicenseCategory::AE,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseCategory::A => "A",
            LicenseCategory::B => "B",
            LicenseCategory::C => "C",
            LicenseCategory::D => "D",
            LicenseCategory::E => "E",
            LicenseCategory::AB => "AB",
            LicenseCategory::AC => "AC",
            LicenseCategory::AD => "AD",
            LicenseCategory::AE => "AE",
        }
    }
}

impl FromStr for LicenseCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant { kind: "license category", value: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Approved,
        BookingStatus::Rejected,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Completed | BookingStatus::Cancelled
        )
    }

    /// Statuses in which the booking must carry a vehicle allocation.
    pub fn implies_allocation(&self) -> bool {
        matches!(
            self,
            BookingStatus::Approved | BookingStatus::InProgress | BookingStatus::Completed
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant { kind: "booking status", value: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleStatus {
    Available,
    Reserved,
    InUse,
    Maintenance,
}

impl VehicleStatus {
    pub const ALL: [VehicleStatus; 4] = [
        VehicleStatus::Available,
        VehicleStatus::Reserved,
        VehicleStatus::InUse,
        VehicleStatus::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Available => "available",
            VehicleStatus::Reserved => "reserved",
            VehicleStatus::InUse => "in_use",
            VehicleStatus::Maintenance => "maintenance",
        }
    }
}

impl FromStr for VehicleStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant { kind: "vehicle status", value: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverStatus {
    Available,
    Busy,
    OffDuty,
    Irregular,
}

impl DriverStatus {
    pub const ALL: [DriverStatus; 4] = [
        DriverStatus::Available,
        DriverStatus::Busy,
        DriverStatus::OffDuty,
        DriverStatus::Irregular,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Available => "available",
            DriverStatus::Busy => "busy",
            DriverStatus::OffDuty => "off_duty",
            DriverStatus::Irregular => "irregular",
        }
    }

    /// Set by an administrator; document recomputation leaves these alone.
    pub fn is_manual(&self) -> bool {
        matches!(self, DriverStatus::Busy | DriverStatus::OffDuty)
    }
}

impl FromStr for DriverStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant { kind: "driver status", value: s.to_string() })
    }
}

/// Derived from document dates, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentHealth {
    Ok,
    ExpiringSoon,
    Expired,
}

impl DocumentHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentHealth::Ok => "ok",
            DocumentHealth::ExpiringSoon => "expiring_soon",
            DocumentHealth::Expired => "expired",
        }
    }
}

// ── Entities ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub protocol: String,
    pub departure_at: Ms,
    pub arrival_at: Ms,
    pub requester_name: String,
    pub headcount: u32,
    pub destination: String,
    pub description: Option<String>,
    pub required_category: VehicleCategory,
    pub needs_driver: bool,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub allocated_vehicle_id: Option<Ulid>,
    pub allocated_driver_id: Option<Ulid>,
    pub admin_notes: Option<String>,
}

impl Booking {
    pub fn window(&self) -> Span {
        Span::new(self.departure_at, self.arrival_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Ulid,
    pub plate: String,
    pub model: String,
    pub category: VehicleCategory,
    pub passenger_capacity: u32,
    pub status: VehicleStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: Ulid,
    pub full_name: String,
    pub license_number: String,
    pub license_expiry: Ms,
    pub license_category: LicenseCategory,
    pub phone: String,
    pub toxicology_exam_date: Ms,
    pub status: DriverStatus,
    pub notes: Option<String>,
}

impl Driver {
    pub const EXAM_VALIDITY_YEARS: u32 = 2;
    pub const LICENSE_WARNING_DAYS: i64 = 30;
    pub const EXAM_WARNING_DAYS: i64 = 60;

    pub fn license_valid(&self, now: Ms) -> bool {
        self.license_expiry > now
    }

    pub fn exam_expiry(&self) -> Ms {
        add_years(self.toxicology_exam_date, Self::EXAM_VALIDITY_YEARS)
    }

    pub fn exam_valid(&self, now: Ms) -> bool {
        self.exam_expiry() > now
    }

    pub fn documents_valid(&self, now: Ms) -> bool {
        self.license_valid(now) && self.exam_valid(now)
    }

    /// Status implied by the documents alone.
    pub fn derived_status(&self, now: Ms) -> DriverStatus {
        if self.documents_valid(now) {
            DriverStatus::Available
        } else {
            DriverStatus::Irregular
        }
    }

    pub fn document_health(&self, now: Ms) -> DocumentHealth {
        if !self.documents_valid(now) {
            DocumentHealth::Expired
        } else if days_until(self.license_expiry, now) <= Self::LICENSE_WARNING_DAYS
            || days_until(self.exam_expiry(), now) <= Self::EXAM_WARNING_DAYS
        {
            DocumentHealth::ExpiringSoon
        } else {
            DocumentHealth::Ok
        }
    }
}

// ── Schedules ───────────────────────────────────────────────────

/// A booking's claim on a vehicle or driver. Mirrors the booking's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub booking_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
}

/// Allocations held by one resource, sorted by `span.start`. Rebuilt from the
/// bookings on replay; never written to the WAL.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub allocations: Vec<Allocation>,
}

impl Schedule {
    pub fn insert(&mut self, allocation: Allocation) {
        let pos = self
            .allocations
            .binary_search_by_key(&allocation.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.allocations.insert(pos, allocation);
    }

    pub fn remove(&mut self, booking_id: Ulid) -> Option<Allocation> {
        let pos = self.allocations.iter().position(|a| a.booking_id == booking_id)?;
        Some(self.allocations.remove(pos))
    }

    pub fn set_status(&mut self, booking_id: Ulid, status: BookingStatus) {
        if let Some(a) = self.allocations.iter_mut().find(|a| a.booking_id == booking_id) {
            a.status = status;
        }
    }

    /// Allocations whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Allocation> {
        let right_bound = self
            .allocations
            .partition_point(|a| a.span.start < query.end);
        self.allocations[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }
}

#[derive(Debug, Clone)]
pub struct VehicleState {
    pub vehicle: Vehicle,
    pub schedule: Schedule,
}

impl VehicleState {
    pub fn new(vehicle: Vehicle) -> Self {
        Self { vehicle, schedule: Schedule::default() }
    }
}

#[derive(Debug, Clone)]
pub struct DriverState {
    pub driver: Driver,
    pub schedule: Schedule,
}

impl DriverState {
    pub fn new(driver: Driver) -> Self {
        Self { driver, schedule: Schedule::default() }
    }
}

// ── Events ──────────────────────────────────────────────────────

/// The WAL record format. One event per operation; each event carries
/// everything needed to apply the whole transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleRegistered {
        vehicle: Vehicle,
    },
    VehicleUpdated {
        vehicle: Vehicle,
    },
    DriverRegistered {
        driver: Driver,
    },
    DriverUpdated {
        driver: Driver,
    },
    DriverStatusesRefreshed {
        changes: Vec<(Ulid, DriverStatus)>,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingApproved {
        id: Ulid,
        vehicle_id: Ulid,
        driver_id: Option<Ulid>,
        notes: Option<String>,
    },
    BookingRejected {
        id: Ulid,
        notes: String,
    },
    BookingCancelled {
        id: Ulid,
        notes: String,
    },
    TripStarted {
        id: Ulid,
    },
    TripCompleted {
        id: Ulid,
        notes: Option<String>,
    },
}

impl Event {
    /// Booking touched by a lifecycle event.
    pub fn booking_id(&self) -> Option<Ulid> {
        match self {
            Event::BookingApproved { id, .. }
            | Event::BookingRejected { id, .. }
            | Event::BookingCancelled { id, .. }
            | Event::TripStarted { id }
            | Event::TripCompleted { id, .. } => Some(*id),
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub category: Option<VehicleCategory>,
    /// Inclusive lower bound on departure.
    pub departure_from: Option<Ms>,
    /// Exclusive upper bound on departure.
    pub departure_to: Option<Ms>,
    pub vehicle_id: Option<Ulid>,
    pub driver_id: Option<Ulid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleFilter {
    pub category: Option<VehicleCategory>,
    pub status: Option<VehicleStatus>,
    /// Case-insensitive substring of plate or model.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverFilter {
    pub license_category: Option<LicenseCategory>,
    pub status: Option<DriverStatus>,
    /// Case-insensitive substring of name, license number or phone.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetStats {
    pub vehicles_total: usize,
    pub vehicles_by_status: Vec<(VehicleStatus, usize)>,
    pub vehicles_by_category: Vec<(VehicleCategory, usize)>,
    pub drivers_total: usize,
    pub drivers_by_status: Vec<(DriverStatus, usize)>,
    pub drivers_by_health: Vec<(DocumentHealth, usize)>,
    pub drivers_by_license: Vec<(LicenseCategory, usize)>,
    pub bookings_pending: usize,
    pub bookings_approved: usize,
    pub bookings_rejected: usize,
    pub bookings_departing_today: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAlert {
    pub driver_id: Ulid,
    pub full_name: String,
    pub license_number: String,
    pub health: DocumentHealth,
    pub days_to_license_expiry: i64,
    pub days_to_exam_expiry: i64,
}
