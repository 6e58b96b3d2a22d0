//! Hard caps on input sizes and collection growth.

use crate::model::Ms;

pub const MAX_VEHICLES: usize = 10_000;
pub const MAX_DRIVERS: usize = 10_000;
pub const MAX_BOOKINGS: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_PURPOSE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_NOTES_LEN: usize = 1_000;
pub const MAX_MODEL_LEN: usize = 100;
pub const MAX_HEADCOUNT: u32 = 50;
pub const MAX_PASSENGER_CAPACITY: u32 = 50;

/// Jan 1, 2000 00:00:00 UTC.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// Jan 1, 2100 00:00:00 UTC.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single trip may last at most one year.
pub const MAX_TRIP_DURATION_MS: Ms = 366 * 86_400_000;

/// Attempts at drawing an unused protocol before giving up.
pub const PROTOCOL_ATTEMPTS: usize = 5;

pub const MAX_SQL_LEN: usize = 64 * 1024;

/// Largest payload a WAL frame may carry. A bigger length prefix can only
/// come from a torn or corrupted tail.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
