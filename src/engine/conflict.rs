use std::fmt;
use std::str::FromStr;

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Bounds every stored or queried window must respect.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_TRIP_DURATION_MS {
        return Err(EngineError::LimitExceeded("trip too long"));
    }
    Ok(())
}

/// Window shape only: arrival strictly after departure.
pub(crate) fn window(departure_at: Ms, arrival_at: Ms) -> Result<Span, EngineError> {
    let span = Span::checked(departure_at, arrival_at).ok_or_else(|| {
        EngineError::invalid("arrival_at", "arrival must be after departure")
    })?;
    validate_span(&span)?;
    Ok(span)
}

/// Window for a new trip, which may not start in the past.
pub(crate) fn trip_window(departure_at: Ms, arrival_at: Ms, now: Ms) -> Result<Span, EngineError> {
    if departure_at < now {
        return Err(EngineError::invalid(
            "departure_at",
            "departure cannot be in the past",
        ));
    }
    window(departure_at, arrival_at)
}

/// Booking statuses whose allocations block a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingSet(u8);

impl BlockingSet {
    fn bit(status: BookingStatus) -> u8 {
        1 << BookingStatus::ALL
            .iter()
            .position(|s| *s == status)
            .unwrap_or_default()
    }

    pub fn of(statuses: &[BookingStatus]) -> Self {
        Self(statuses.iter().fold(0, |acc, s| acc | Self::bit(*s)))
    }

    pub fn contains(&self, status: BookingStatus) -> bool {
        self.0 & Self::bit(status) != 0
    }

    pub fn statuses(&self) -> impl Iterator<Item = BookingStatus> + '_ {
        BookingStatus::ALL.into_iter().filter(|s| self.contains(*s))
    }
}

impl FromStr for BlockingSet {
    type Err = crate::model::UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let statuses = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<BookingStatus>, _>>()?;
        Ok(Self::of(&statuses))
    }
}

impl fmt::Display for BlockingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.statuses().map(|s| s.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

/// When a conflict check runs, and therefore which statuses block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStage {
    /// A requester is submitting a new trip.
    Creation,
    /// An administrator is listing candidates or approving.
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingPolicy {
    pub creation: BlockingSet,
    pub review: BlockingSet,
}

impl BlockingPolicy {
    pub fn blocking(&self, stage: CheckStage) -> BlockingSet {
        match stage {
            CheckStage::Creation => self.creation,
            CheckStage::Review => self.review,
        }
    }
}

impl Default for BlockingPolicy {
    fn default() -> Self {
        Self {
            creation: BlockingSet::of(&[BookingStatus::Approved, BookingStatus::InProgress]),
            review: BlockingSet::of(&[
                BookingStatus::Pending,
                BookingStatus::Approved,
                BookingStatus::InProgress,
            ]),
        }
    }
}

/// First blocking allocation overlapping `window`, skipping `exclude`.
pub fn find_conflict(
    schedule: &Schedule,
    window: &Span,
    blocking: BlockingSet,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    schedule
        .overlapping(window)
        .find(|a| blocking.contains(a.status) && Some(a.booking_id) != exclude)
        .map(|a| a.booking_id)
}

pub fn has_conflict(
    schedule: &Schedule,
    window: &Span,
    blocking: BlockingSet,
    exclude: Option<Ulid>,
) -> bool {
    find_conflict(schedule, window, blocking, exclude).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(entries: &[(Ms, Ms, BookingStatus)]) -> (Schedule, Vec<Ulid>) {
        let mut s = Schedule::default();
        let mut ids = Vec::new();
        for &(start, end, status) in entries {
            let id = Ulid::new();
            ids.push(id);
            s.insert(Allocation {
                booking_id: id,
                span: Span::new(start, end),
                status,
            });
        }
        (s, ids)
    }

    #[test]
    fn touching_windows_do_not_conflict() {
        let (s, _) = schedule(&[(100, 200, BookingStatus::Approved)]);
        let creation = BlockingPolicy::default().creation;
        assert!(!has_conflict(&s, &Span::new(200, 300), creation, None));
        assert!(!has_conflict(&s, &Span::new(0, 100), creation, None));
        assert!(has_conflict(&s, &Span::new(199, 300), creation, None));
    }

    #[test]
    fn only_blocking_statuses_participate() {
        let (s, ids) = schedule(&[
            (100, 200, BookingStatus::Completed),
            (300, 400, BookingStatus::InProgress),
        ]);
        let policy = BlockingPolicy::default();
        assert!(!has_conflict(&s, &Span::new(100, 200), policy.creation, None));
        assert_eq!(
            find_conflict(&s, &Span::new(350, 360), policy.creation, None),
            Some(ids[1])
        );
    }

    #[test]
    fn excluded_booking_is_skipped() {
        let (s, ids) = schedule(&[(100, 200, BookingStatus::Approved)]);
        let review = BlockingPolicy::default().review;
        assert!(has_conflict(&s, &Span::new(150, 250), review, None));
        assert!(!has_conflict(&s, &Span::new(150, 250), review, Some(ids[0])));
    }

    #[test]
    fn blocking_set_parses_and_displays() {
        let set: BlockingSet = "approved, in_progress".parse().unwrap();
        assert_eq!(set, BlockingPolicy::default().creation);
        assert_eq!(set.to_string(), "approved,in_progress");
        assert!(!set.contains(BookingStatus::Pending));
        assert!("approved,bogus".parse::<BlockingSet>().is_err());
    }

    #[test]
    fn trip_window_rules() {
        let now = 1_800_000_000_000;
        assert!(matches!(
            trip_window(now - 1, now + 10, now),
            Err(EngineError::Validation { field: "departure_at", .. })
        ));
        assert!(matches!(
            trip_window(now + 10, now + 10, now),
            Err(EngineError::Validation { field: "arrival_at", .. })
        ));
        assert!(matches!(
            trip_window(now, now + 400 * DAY_MS, now),
            Err(EngineError::LimitExceeded(_))
        ));
        assert_eq!(trip_window(now, now + 10, now).unwrap(), Span::new(now, now + 10));
    }
}
