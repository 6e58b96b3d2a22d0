use std::collections::HashMap;
use std::hash::Hash;

use chrono::{Local, TimeZone};
use ulid::Ulid;

use crate::model::*;

use super::availability::{driver_available, vehicle_available};
use super::conflict::{now_ms, window, CheckStage};
use super::protocol::looks_like_protocol;
use super::{in_id_order, Engine, EngineError, Entity};

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn tally<K: Copy + Eq + Hash>(keys: &[K], counts: &HashMap<K, usize>) -> Vec<(K, usize)> {
    keys.iter()
        .map(|k| (*k, counts.get(k).copied().unwrap_or(0)))
        .collect()
}

/// Local-midnight bounds of the day containing `now`.
fn local_day(now: Ms) -> Span {
    let start = Local
        .timestamp_millis_opt(now)
        .single()
        .and_then(|dt| dt.date_naive().and_hms_opt(0, 0, 0))
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(now - now.rem_euclid(DAY_MS));
    Span::new(start, start + DAY_MS)
}

impl Engine {
    // ── Availability ─────────────────────────────────────────────

    pub(super) async fn available_vehicles_in(
        &self,
        category: VehicleCategory,
        window: &Span,
        stage: CheckStage,
        exclude: Option<Ulid>,
    ) -> Vec<Vehicle> {
        let blocking = self.policy.blocking(stage);
        let mut out = Vec::new();
        for lock in in_id_order(&self.vehicles) {
            let state = lock.read().await;
            if vehicle_available(&state, category, window, blocking, exclude) {
                out.push(state.vehicle.clone());
            }
        }
        out
    }

    pub(super) async fn available_drivers_in(
        &self,
        license_category: Option<LicenseCategory>,
        window: &Span,
        stage: CheckStage,
        exclude: Option<Ulid>,
    ) -> Vec<Driver> {
        let blocking = self.policy.blocking(stage);
        let now = now_ms();
        let mut out = Vec::new();
        for lock in in_id_order(&self.drivers) {
            let state = lock.read().await;
            if driver_available(&state, license_category, window, blocking, exclude, now) {
                out.push(state.driver.clone());
            }
        }
        out
    }

    /// Vehicles of `category` a new trip over the window could use, in
    /// registration order. Empty when nothing fits.
    pub async fn find_available_vehicles(
        &self,
        category: VehicleCategory,
        departure_at: Ms,
        arrival_at: Ms,
    ) -> Result<Vec<Vehicle>, EngineError> {
        let window = window(departure_at, arrival_at)?;
        let found = self
            .available_vehicles_in(category, &window, CheckStage::Creation, None)
            .await;
        if found.is_empty() {
            metrics::counter!(crate::observability::EMPTY_AVAILABILITY_TOTAL, "resource" => "vehicle")
                .increment(1);
        }
        Ok(found)
    }

    /// Drivers holding `license_category` with valid documents and no
    /// blocking allocation over the window.
    pub async fn find_available_drivers(
        &self,
        license_category: LicenseCategory,
        departure_at: Ms,
        arrival_at: Ms,
    ) -> Result<Vec<Driver>, EngineError> {
        let window = window(departure_at, arrival_at)?;
        let found = self
            .available_drivers_in(Some(license_category), &window, CheckStage::Creation, None)
            .await;
        if found.is_empty() {
            metrics::counter!(crate::observability::EMPTY_AVAILABILITY_TOTAL, "resource" => "driver")
                .increment(1);
        }
        Ok(found)
    }

    /// Vehicles an administrator may allocate to a pending booking.
    pub async fn vehicle_candidates(&self, booking_id: Ulid) -> Result<Vec<Vehicle>, EngineError> {
        let booking = self.get_booking(booking_id).await?;
        Ok(self
            .available_vehicles_in(
                booking.required_category,
                &booking.window(),
                CheckStage::Review,
                Some(booking_id),
            )
            .await)
    }

    /// Drivers an administrator may allocate to a pending booking. Any
    /// license class qualifies.
    pub async fn driver_candidates(&self, booking_id: Ulid) -> Result<Vec<Driver>, EngineError> {
        let booking = self.get_booking(booking_id).await?;
        Ok(self
            .available_drivers_in(None, &booking.window(), CheckStage::Review, Some(booking_id))
            .await)
    }

    // ── Lookups ──────────────────────────────────────────────────

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        Ok(self.booking(&id)?.read().await.clone())
    }

    pub async fn get_vehicle(&self, id: Ulid) -> Result<Vehicle, EngineError> {
        Ok(self.vehicle(&id)?.read().await.vehicle.clone())
    }

    pub async fn get_driver(&self, id: Ulid) -> Result<Driver, EngineError> {
        Ok(self.driver(&id)?.read().await.driver.clone())
    }

    pub async fn lookup_by_protocol(&self, protocol: &str) -> Result<Booking, EngineError> {
        let protocol = protocol.trim();
        if !looks_like_protocol(protocol) {
            return Err(EngineError::not_found(Entity::Booking, protocol));
        }
        let id = self
            .protocols
            .get(protocol)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::not_found(Entity::Booking, protocol))?;
        self.get_booking(id).await
    }

    /// Bookings matching the filter, most recently created first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let locks: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for lock in locks {
            let b = lock.read().await;
            let keep = filter.status.is_none_or(|s| b.status == s)
                && filter.category.is_none_or(|c| b.required_category == c)
                && filter.departure_from.is_none_or(|t| b.departure_at >= t)
                && filter.departure_to.is_none_or(|t| b.departure_at < t)
                && filter.vehicle_id.is_none_or(|v| b.allocated_vehicle_id == Some(v))
                && filter.driver_id.is_none_or(|d| b.allocated_driver_id == Some(d));
            if keep {
                out.push(b.clone());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// Vehicles matching the filter, ordered by plate.
    pub async fn list_vehicles(&self, filter: &VehicleFilter) -> Vec<Vehicle> {
        let mut out = Vec::new();
        for lock in in_id_order(&self.vehicles) {
            let guard = lock.read().await;
            let v = &guard.vehicle;
            let keep = filter.category.is_none_or(|c| v.category == c)
                && filter.status.is_none_or(|s| v.status == s)
                && filter
                    .text
                    .as_deref()
                    .is_none_or(|t| contains_ci(&v.plate, t) || contains_ci(&v.model, t));
            if keep {
                out.push(v.clone());
            }
        }
        out.sort_by(|a, b| a.plate.cmp(&b.plate));
        out
    }

    /// Drivers matching the filter, ordered by name.
    pub async fn list_drivers(&self, filter: &DriverFilter) -> Vec<Driver> {
        let mut out = Vec::new();
        for lock in in_id_order(&self.drivers) {
            let guard = lock.read().await;
            let d = &guard.driver;
            let keep = filter.license_category.is_none_or(|c| d.license_category == c)
                && filter.status.is_none_or(|s| d.status == s)
                && filter.text.as_deref().is_none_or(|t| {
                    contains_ci(&d.full_name, t)
                        || d.license_number.contains(t)
                        || d.phone.contains(t)
                });
            if keep {
                out.push(d.clone());
            }
        }
        out.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        out
    }

    // ── Dashboard ────────────────────────────────────────────────

    pub async fn fleet_stats(&self, now: Ms) -> FleetStats {
        let mut vehicle_status = HashMap::new();
        let mut vehicle_category = HashMap::new();
        let mut vehicles_total = 0;
        for lock in in_id_order(&self.vehicles) {
            let guard = lock.read().await;
            let v = &guard.vehicle;
            vehicles_total += 1;
            *vehicle_status.entry(v.status).or_insert(0) += 1;
            *vehicle_category.entry(v.category).or_insert(0) += 1;
        }

        let mut driver_status = HashMap::new();
        let mut driver_health = HashMap::new();
        let mut driver_license = HashMap::new();
        let mut drivers_total = 0;
        for lock in in_id_order(&self.drivers) {
            let guard = lock.read().await;
            let d = &guard.driver;
            drivers_total += 1;
            *driver_status.entry(d.status).or_insert(0) += 1;
            *driver_health.entry(d.document_health(now)).or_insert(0) += 1;
            *driver_license.entry(d.license_category).or_insert(0) += 1;
        }

        let today = local_day(now);
        let mut stats = FleetStats {
            vehicles_total,
            vehicles_by_status: tally(&VehicleStatus::ALL, &vehicle_status),
            vehicles_by_category: tally(&VehicleCategory::ALL, &vehicle_category),
            drivers_total,
            drivers_by_status: tally(&DriverStatus::ALL, &driver_status),
            drivers_by_health: tally(
                &[DocumentHealth::Ok, DocumentHealth::ExpiringSoon, DocumentHealth::Expired],
                &driver_health,
            ),
            drivers_by_license: tally(&LicenseCategory::ALL, &driver_license),
            ..FleetStats::default()
        };

        let locks: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        for lock in locks {
            let b = lock.read().await;
            match b.status {
                BookingStatus::Pending => stats.bookings_pending += 1,
                BookingStatus::Approved => stats.bookings_approved += 1,
                BookingStatus::Rejected => stats.bookings_rejected += 1,
                _ => {}
            }
            if today.contains_instant(b.departure_at)
                && matches!(b.status, BookingStatus::Approved | BookingStatus::InProgress)
            {
                stats.bookings_departing_today += 1;
            }
        }
        stats
    }

    /// Drivers whose documents are expired or close to it, most urgent first.
    pub async fn driver_alerts(&self, now: Ms) -> Vec<DocumentAlert> {
        let mut alerts = Vec::new();
        for lock in in_id_order(&self.drivers) {
            let guard = lock.read().await;
            let d = &guard.driver;
            let health = d.document_health(now);
            if health == DocumentHealth::Ok {
                continue;
            }
            alerts.push(DocumentAlert {
                driver_id: d.id,
                full_name: d.full_name.clone(),
                license_number: d.license_number.clone(),
                health,
                days_to_license_expiry: days_until(d.license_expiry, now),
                days_to_exam_expiry: days_until(d.exam_expiry(), now),
            });
        }
        alerts.sort_by_key(|a| (a.days_to_license_expiry, a.days_to_exam_expiry));
        alerts
    }
}
