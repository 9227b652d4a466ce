use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

/// Per-day capacity counters for one time-slot.
///
/// A day without a record is not bookable. `booked` never exceeds
/// `capacity` through the engine: reservations are checked as a whole
/// before any counter moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateLedger {
    days: BTreeMap<NaiveDate, DayCapacity>,
}

/// What a release found while decrementing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: u32,
    /// Days with no capacity record.
    pub missing: Vec<NaiveDate>,
    /// Days whose counter was already zero.
    pub underflow: Vec<NaiveDate>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.underflow.is_empty()
    }
}

impl DateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_days(days: impl IntoIterator<Item = (NaiveDate, DayCapacity)>) -> Self {
        Self {
            days: days.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn get(&self, date: NaiveDate) -> Option<DayCapacity> {
        self.days.get(&date).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, DayCapacity)> + '_ {
        self.days.iter().map(|(d, c)| (*d, *c))
    }

    /// Records inside `range`, in date order.
    pub fn range(&self, range: &DateRange) -> impl Iterator<Item = (NaiveDate, DayCapacity)> + '_ {
        self.days.range(range.start..=range.end).map(|(d, c)| (*d, *c))
    }

    /// Days in `range` that have no record yet.
    pub fn count_missing(&self, range: &DateRange) -> u32 {
        range.days().filter(|d| !self.days.contains_key(d)).count() as u32
    }

    /// Create a zero-booked record for every absent day in `range`.
    /// Existing records keep their capacity and bookings. Returns how many
    /// records were created.
    pub fn ensure_range(&mut self, range: &DateRange, capacity: u32) -> u32 {
        let mut created = 0;
        for day in range.days() {
            self.days.entry(day).or_insert_with(|| {
                created += 1;
                DayCapacity { capacity, booked: 0 }
            });
        }
        created
    }

    /// Would reserving one place on every listed day succeed?
    ///
    /// Missing records are reported before capacity, so a request that
    /// strays outside the ledger always reads as "not bookable". A day listed
    /// twice needs room for two.
    pub fn check(&self, dates: &[NaiveDate]) -> Result<(), EngineError> {
        if let Some(day) = dates.iter().find(|d| !self.days.contains_key(d)) {
            return Err(EngineError::CapacityRecordMissing(*day));
        }
        let mut wanted: HashMap<NaiveDate, u32> = HashMap::with_capacity(dates.len());
        for day in dates {
            let rec = self.days[day];
            let want = wanted.entry(*day).or_insert(0);
            *want += 1;
            if rec.booked + *want > rec.capacity {
                return Err(EngineError::CapacityExceeded(*day));
            }
        }
        Ok(())
    }

    /// Increment every listed day. Callers run `check` first.
    ///
    /// Returns the days pushed past capacity. That only happens when a log
    /// holds reservations that were never checked against each other; the
    /// bookings still count so later releases balance, and `check` refuses
    /// the day until it drains.
    pub fn reserve(&mut self, dates: &[NaiveDate]) -> Vec<NaiveDate> {
        let mut overbooked = Vec::new();
        for day in dates {
            if let Some(rec) = self.days.get_mut(day) {
                rec.booked += 1;
                if rec.booked > rec.capacity {
                    overbooked.push(*day);
                }
            }
        }
        overbooked
    }

    /// What `release` would find, without touching the counters.
    pub fn inspect_release(&self, dates: &[NaiveDate]) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        let mut taken: HashMap<NaiveDate, u32> = HashMap::new();
        for day in dates {
            let Some(rec) = self.days.get(day) else {
                report.missing.push(*day);
                continue;
            };
            let released = taken.entry(*day).or_insert(0);
            if rec.booked == *released {
                report.underflow.push(*day);
            } else {
                *released += 1;
                report.released += 1;
            }
        }
        report
    }

    /// Decrement every listed day, flooring at zero. Missing records and
    /// zero counters are skipped and reported.
    pub fn release(&mut self, dates: &[NaiveDate]) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        for day in dates {
            match self.days.get_mut(day) {
                None => report.missing.push(*day),
                Some(rec) if rec.booked == 0 => report.underflow.push(*day),
                Some(rec) => {
                    rec.booked -= 1;
                    report.released += 1;
                }
            }
        }
        report
    }

    /// Validate a per-day capacity override.
    pub fn check_capacity_override(
        &self,
        date: NaiveDate,
        capacity: u32,
    ) -> Result<(), EngineError> {
        let rec = self
            .get(date)
            .ok_or(EngineError::CapacityRecordMissing(date))?;
        if capacity < rec.booked {
            return Err(EngineError::CapacityBelowBooked {
                date,
                capacity,
                booked: rec.booked,
            });
        }
        Ok(())
    }

    pub fn set_capacity(&mut self, date: NaiveDate, capacity: u32) {
        if let Some(rec) = self.days.get_mut(&date) {
            rec.capacity = capacity;
        }
    }

    pub fn total_booked(&self) -> u64 {
        self.days.values().map(|r| r.booked as u64).sum()
    }

    pub fn full_days(&self) -> u32 {
        self.days.values().filter(|r| r.remaining() == 0).count() as u32
    }
}

/// Log and count anything odd a release ran into. Never fails.
pub(super) fn report_release_inconsistencies(token: &ReservationToken, report: &ReleaseReport) {
    if !report.missing.is_empty() {
        warn!(
            opportunity_id = %token.opportunity_id,
            slot_id = %token.time_slot_id,
            days = ?report.missing,
            "release skipped days without a capacity record"
        );
        metrics::counter!(observability::LEDGER_INCONSISTENCIES_TOTAL, "kind" => "missing_record")
            .increment(report.missing.len() as u64);
    }
    if !report.underflow.is_empty() {
        warn!(
            opportunity_id = %token.opportunity_id,
            slot_id = %token.time_slot_id,
            days = ?report.underflow,
            "release found days already at zero bookings"
        );
        metrics::counter!(observability::LEDGER_INCONSISTENCIES_TOTAL, "kind" => "underflow")
            .increment(report.underflow.len() as u64);
    }
}

impl Engine {
    /// Create day records for `range` that don't exist yet. Idempotent.
    pub async fn ensure_range(
        &self,
        opportunity_id: Ulid,
        slot_id: Ulid,
        range: DateRange,
        capacity: u32,
    ) -> Result<u32, EngineError> {
        if range.len_days() > MAX_SLOT_DAYS {
            return Err(EngineError::LimitExceeded("capacity range too long"));
        }
        if capacity > MAX_DAY_CAPACITY {
            return Err(EngineError::LimitExceeded("day capacity too large"));
        }
        let txn = self.write_opportunity(&opportunity_id).await?;
        let ss = txn.slot(&slot_id)?;
        let window = ss.slot.window();
        if !window.contains_range(&range) {
            return Err(EngineError::DateRangeOutOfBounds {
                requested: range,
                window,
            });
        }
        let missing = ss.ledger.count_missing(&range);
        if missing == 0 {
            return Ok(0);
        }
        let event = Event::CapacityRangeEnsured {
            opportunity_id,
            slot_id,
            range,
            capacity,
        };
        self.persist_and_apply(txn, event).await?;
        info!(%opportunity_id, %slot_id, created = missing, "capacity range ensured");
        Ok(missing)
    }

    /// Reserve one place on every listed day, or none of them.
    pub async fn check_and_reserve(
        &self,
        opportunity_id: Ulid,
        slot_id: Ulid,
        dates: Vec<NaiveDate>,
    ) -> Result<ReservationToken, EngineError> {
        if dates.is_empty() {
            return Err(EngineError::InvalidInput("no dates to reserve".into()));
        }
        if dates.len() > MAX_STAY_DAYS as usize {
            return Err(EngineError::LimitExceeded("too many dates in one reservation"));
        }
        let txn = self.write_opportunity(&opportunity_id).await?;
        if let Err(e) = txn.slot(&slot_id)?.ledger.check(&dates) {
            observability::record_reservation_rejected(&e);
            return Err(e);
        }
        let token = ReservationToken {
            opportunity_id,
            time_slot_id: slot_id,
            days: dates,
        };
        self.persist_and_apply(txn, Event::DaysReserved { token: token.clone() }).await?;
        metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => "reserved").increment(1);
        Ok(token)
    }

    /// Give back one place on every listed day. Oddities are logged, not returned.
    pub async fn release(
        &self,
        opportunity_id: Ulid,
        slot_id: Ulid,
        dates: Vec<NaiveDate>,
    ) -> Result<ReleaseReport, EngineError> {
        let txn = self.write_opportunity(&opportunity_id).await?;
        let report = txn.slot(&slot_id)?.ledger.inspect_release(&dates);
        let token = ReservationToken {
            opportunity_id,
            time_slot_id: slot_id,
            days: dates,
        };
        report_release_inconsistencies(&token, &report);
        self.persist_and_apply(txn, Event::DaysReleased { token }).await?;
        metrics::counter!(observability::RELEASES_TOTAL).increment(1);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn june(capacity: u32) -> DateLedger {
        let mut ledger = DateLedger::new();
        let range = DateRange::new(d("2025-06-01"), d("2025-06-30")).unwrap();
        ledger.ensure_range(&range, capacity);
        ledger
    }

    fn days(from: &str, to: &str) -> Vec<NaiveDate> {
        DateRange::new(d(from), d(to)).unwrap().days().collect()
    }

    #[test]
    fn ensure_range_creates_one_record_per_day() {
        let ledger = june(2);
        assert_eq!(ledger.len(), 30);
        assert_eq!(
            ledger.get(d("2025-06-15")),
            Some(DayCapacity { capacity: 2, booked: 0 })
        );
        assert_eq!(ledger.get(d("2025-07-01")), None);
    }

    #[test]
    fn ensure_range_is_idempotent_and_keeps_bookings() {
        let mut ledger = june(2);
        ledger.reserve(&days("2025-06-01", "2025-06-03"));
        let range = DateRange::new(d("2025-06-01"), d("2025-07-05")).unwrap();
        let created = ledger.ensure_range(&range, 9);
        assert_eq!(created, 5);
        assert_eq!(
            ledger.get(d("2025-06-01")),
            Some(DayCapacity { capacity: 2, booked: 1 })
        );
        assert_eq!(ledger.get(d("2025-07-05")).unwrap().capacity, 9);
        assert_eq!(ledger.ensure_range(&range, 9), 0);
    }

    #[test]
    fn check_reports_missing_before_full() {
        let mut ledger = june(1);
        ledger.reserve(&[d("2025-06-29")]);
        // 06-29 is full, 07-01 has no record: missing wins.
        let err = ledger.check(&days("2025-06-29", "2025-07-01")).unwrap_err();
        assert!(matches!(err, EngineError::CapacityRecordMissing(day) if day == d("2025-07-01")));
    }

    #[test]
    fn check_names_first_full_day() {
        let mut ledger = june(1);
        ledger.reserve(&days("2025-06-05", "2025-06-06"));
        let err = ledger.check(&days("2025-06-01", "2025-06-10")).unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded(day) if day == d("2025-06-05")));
    }

    #[test]
    fn check_counts_duplicate_days() {
        let ledger = june(1);
        let err = ledger
            .check(&[d("2025-06-03"), d("2025-06-03")])
            .unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded(_)));
        assert!(june(2).check(&[d("2025-06-03"), d("2025-06-03")]).is_ok());
    }

    #[test]
    fn release_floors_at_zero_and_reports() {
        let mut ledger = june(2);
        ledger.reserve(&[d("2025-06-01")]);
        let report = ledger.release(&[d("2025-06-01"), d("2025-06-02"), d("2025-07-09")]);
        assert_eq!(report.released, 1);
        assert_eq!(report.underflow, vec![d("2025-06-02")]);
        assert_eq!(report.missing, vec![d("2025-07-09")]);
        assert!(!report.is_clean());
        assert_eq!(ledger.get(d("2025-06-02")).unwrap().booked, 0);
    }

    #[test]
    fn inspect_release_leaves_counters_alone() {
        let mut ledger = june(2);
        ledger.reserve(&[d("2025-06-01")]);
        let report = ledger.inspect_release(&[d("2025-06-01")]);
        assert!(report.is_clean());
        assert_eq!(ledger.get(d("2025-06-01")).unwrap().booked, 1);
    }

    #[test]
    fn inspect_release_matches_release_for_repeated_days() {
        let mut ledger = june(2);
        ledger.reserve(&[d("2025-06-01")]);
        let dates = [d("2025-06-01"), d("2025-06-01"), d("2025-06-02"), d("2025-07-09")];
        let inspected = ledger.inspect_release(&dates);
        assert_eq!(inspected.released, 1);
        assert_eq!(inspected.underflow, vec![d("2025-06-01"), d("2025-06-02")]);
        assert_eq!(inspected, ledger.release(&dates));
    }

    #[test]
    fn reserve_past_capacity_reports_the_day() {
        let mut ledger = june(1);
        assert!(ledger.reserve(&[d("2025-06-01")]).is_empty());
        let over = ledger.reserve(&days("2025-06-01", "2025-06-02"));
        assert_eq!(over, vec![d("2025-06-01")]);
        assert_eq!(ledger.get(d("2025-06-01")).unwrap().remaining(), 0);
        assert!(matches!(
            ledger.check(&[d("2025-06-01")]),
            Err(EngineError::CapacityExceeded(_))
        ));
        ledger.release(&[d("2025-06-01")]);
        assert!(matches!(
            ledger.check(&[d("2025-06-01")]),
            Err(EngineError::CapacityExceeded(_))
        ));
        ledger.release(&[d("2025-06-01")]);
        assert!(ledger.check(&[d("2025-06-01")]).is_ok());
    }

    #[test]
    fn reserve_release_round_trip_restores_ledger() {
        let original = june(3);
        let mut ledger = original.clone();
        let stay = days("2025-06-10", "2025-06-20");
        for _ in 0..3 {
            ledger.check(&stay).unwrap();
            ledger.reserve(&stay);
            assert_eq!(ledger.total_booked(), stay.len() as u64);
            assert!(ledger.release(&stay).is_clean());
        }
        assert_eq!(ledger, original);
    }

    #[test]
    fn capacity_override_cannot_drop_below_booked() {
        let mut ledger = june(3);
        ledger.reserve(&[d("2025-06-01")]);
        ledger.reserve(&[d("2025-06-01")]);
        let err = ledger.check_capacity_override(d("2025-06-01"), 1).unwrap_err();
        assert!(matches!(err, EngineError::CapacityBelowBooked { booked: 2, .. }));
        assert!(ledger.check_capacity_override(d("2025-06-01"), 2).is_ok());
        assert!(matches!(
            ledger.check_capacity_override(d("2025-08-01"), 2),
            Err(EngineError::CapacityRecordMissing(_))
        ));
    }

    #[test]
    fn full_days_counts_zero_capacity_too() {
        let mut ledger = june(1);
        ledger.set_capacity(d("2025-06-02"), 0);
        ledger.reserve(&[d("2025-06-01")]);
        assert_eq!(ledger.full_days(), 2);
    }
}
