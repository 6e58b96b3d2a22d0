use std::fmt;

use ulid::Ulid;

use crate::model::{BookingStatus, Span, VehicleCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Booking,
    Vehicle,
    Driver,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Booking => "booking",
            Entity::Vehicle => "vehicle",
            Entity::Driver => "driver",
        }
    }
}

/// Store-level constraint that an operation would break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    DuplicatePlate(String),
    DuplicateLicense(String),
    /// Every protocol drawn during creation was already taken.
    DuplicateProtocol,
    /// The resource already holds a blocking allocation for an overlapping window.
    DoubleAllocation {
        resource: Entity,
        resource_id: Ulid,
        conflicting_booking: Ulid,
    },
    /// Removal refused while bookings still reference the resource.
    ActiveBookings {
        resource: Entity,
        resource_id: Ulid,
        count: usize,
    },
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::DuplicatePlate(p) => write!(f, "plate {p} is already registered"),
            Constraint::DuplicateLicense(l) => {
                write!(f, "license number {l} is already registered")
            }
            Constraint::DuplicateProtocol => f.write_str("could not allocate a unique protocol"),
            Constraint::DoubleAllocation {
                resource,
                resource_id,
                conflicting_booking,
            } => write!(
                f,
                "{} {resource_id} is already allocated to booking {conflicting_booking} in this window",
                resource.as_str()
            ),
            Constraint::ActiveBookings {
                resource,
                resource_id,
                count,
            } => write!(
                f,
                "{} {resource_id} is referenced by {count} active booking(s)",
                resource.as_str()
            ),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation {
        field: &'static str,
        reason: String,
    },
    NoAvailability {
        category: VehicleCategory,
        window: Span,
    },
    InvalidState {
        booking: Ulid,
        expected: &'static [BookingStatus],
        actual: BookingStatus,
    },
    NotFound {
        entity: Entity,
        key: String,
    },
    ConflictViolation(Constraint),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(entity: Entity, key: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "validation",
            EngineError::NoAvailability { .. } => "no_availability",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::NotFound { .. } => "not_found",
            EngineError::ConflictViolation(_) => "conflict",
            EngineError::LimitExceeded(_) => "limit",
            EngineError::WalError(_) => "wal",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            EngineError::NoAvailability { category, window } => write!(
                f,
                "no {} vehicle available for [{}, {})",
                category.as_str(),
                window.start,
                window.end
            ),
            EngineError::InvalidState {
                booking,
                expected,
                actual,
            } => {
                let expected: Vec<&str> = expected.iter().map(|s| s.as_str()).collect();
                write!(
                    f,
                    "booking {booking} is {actual}, expected one of [{}]",
                    expected.join(", ")
                )
            }
            EngineError::NotFound { entity, key } => {
                write!(f, "{} not found: {key}", entity.as_str())
            }
            EngineError::ConflictViolation(c) => write!(f, "constraint violation: {c}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
