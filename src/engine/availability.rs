use ulid::Ulid;

use crate::model::*;

use super::conflict::{has_conflict, BlockingSet};

// ── Static eligibility ────────────────────────────────────────────

/// Vehicles in maintenance never enter the pool. Reserved or in-use
/// vehicles do: their schedule decides.
pub fn vehicle_eligible(vehicle: &Vehicle, category: VehicleCategory) -> bool {
    vehicle.category == category && vehicle.status != VehicleStatus::Maintenance
}

/// `license_category == None` skips the class filter (review candidates).
pub fn driver_eligible(driver: &Driver, license_category: Option<LicenseCategory>, now: Ms) -> bool {
    license_category.is_none_or(|c| driver.license_category == c)
        && driver.status != DriverStatus::Irregular
        && driver.documents_valid(now)
}

// ── Pool filters ──────────────────────────────────────────────────

/// Static filter, then the conflict check against `blocking`.
pub fn vehicle_available(
    state: &VehicleState,
    category: VehicleCategory,
    window: &Span,
    blocking: BlockingSet,
    exclude: Option<Ulid>,
) -> bool {
    vehicle_eligible(&state.vehicle, category)
        && !has_conflict(&state.schedule, window, blocking, exclude)
}

pub fn driver_available(
    state: &DriverState,
    license_category: Option<LicenseCategory>,
    window: &Span,
    blocking: BlockingSet,
    exclude: Option<Ulid>,
    now: Ms,
) -> bool {
    driver_eligible(&state.driver, license_category, now)
        && !has_conflict(&state.schedule, window, blocking, exclude)
}
