use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Fields a host supplies when opening a slot.
#[derive(Debug, Clone)]
pub struct NewSlot {
    pub id: Ulid,
    pub opportunity_id: Ulid,
    pub range: DateRange,
    pub default_capacity: u32,
    pub minimum_stay: u32,
}

/// Slot policy for a requested stay. Checks run in a fixed order: status,
/// then bounds, then minimum stay.
pub fn validate_window(slot: &TimeSlot, requested: &DateRange) -> Result<(), EngineError> {
    if !slot.is_open() {
        return Err(EngineError::SlotClosed(slot.id));
    }
    let window = slot.window();
    if !window.contains_range(requested) {
        return Err(EngineError::DateRangeOutOfBounds {
            requested: *requested,
            window,
        });
    }
    let requested_days = requested.len_days();
    if requested_days < slot.minimum_stay {
        return Err(EngineError::MinimumStayViolation {
            requested_days,
            minimum_days: slot.minimum_stay,
        });
    }
    Ok(())
}

// Rollup mutators. Only the lifecycle moves these; they never feed a
// capacity decision. `confirmed_count <= applied_count` holds after each.
impl TimeSlot {
    pub fn increment_applied(&mut self) {
        self.applied_count = self.applied_count.saturating_add(1);
    }

    pub fn decrement_applied(&mut self) {
        self.applied_count = self.applied_count.saturating_sub(1);
        self.confirmed_count = self.confirmed_count.min(self.applied_count);
    }

    pub fn increment_confirmed(&mut self) {
        if self.confirmed_count < self.applied_count {
            self.confirmed_count += 1;
        }
    }

    pub fn decrement_confirmed(&mut self) {
        self.confirmed_count = self.confirmed_count.saturating_sub(1);
    }

    /// Apply signed deltas from one committed transition. Confirmed goes
    /// down before applied, applied goes up before confirmed.
    pub fn apply_rollup_delta(&mut self, applied: i8, confirmed: i8) {
        if confirmed < 0 {
            self.decrement_confirmed();
        }
        if applied > 0 {
            self.increment_applied();
        }
        if applied < 0 {
            self.decrement_applied();
        }
        if confirmed > 0 {
            self.increment_confirmed();
        }
    }
}

impl Engine {
    /// Register an OPEN slot and create its day records in one commit.
    pub async fn open_slot(&self, new: NewSlot) -> Result<TimeSlot, EngineError> {
        let NewSlot {
            id,
            opportunity_id,
            range,
            default_capacity,
            minimum_stay,
        } = new;
        if default_capacity == 0 {
            return Err(EngineError::InvalidInput("default capacity must be at least 1".into()));
        }
        if default_capacity > MAX_DAY_CAPACITY {
            return Err(EngineError::LimitExceeded("day capacity too large"));
        }
        if range.len_days() > MAX_SLOT_DAYS {
            return Err(EngineError::LimitExceeded("slot window too long"));
        }
        if minimum_stay > range.len_days() {
            return Err(EngineError::InvalidInput(format!(
                "minimum stay of {minimum_stay} days exceeds the {}-day window",
                range.len_days()
            )));
        }

        let txn = self.write_opportunity(&opportunity_id).await?;
        if txn.slots.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if txn.slots.len() >= MAX_SLOTS_PER_OPPORTUNITY {
            return Err(EngineError::LimitExceeded("too many slots for one opportunity"));
        }

        let slot = TimeSlot {
            id,
            opportunity_id,
            start_date: range.start,
            end_date: range.end,
            default_capacity,
            minimum_stay,
            applied_count: 0,
            confirmed_count: 0,
            status: SlotStatus::Open,
        };
        self.persist_and_apply(txn, Event::SlotOpened { slot: slot.clone() }).await?;
        info!(
            %opportunity_id,
            slot_id = %id,
            start = %range.start,
            end = %range.end,
            default_capacity,
            "slot opened"
        );
        Ok(slot)
    }

    pub async fn close_slot(
        &self,
        opportunity_id: Ulid,
        slot_id: Ulid,
    ) -> Result<TimeSlot, EngineError> {
        self.set_slot_status(opportunity_id, slot_id, SlotStatus::Closed)
            .await
    }

    pub async fn reopen_slot(
        &self,
        opportunity_id: Ulid,
        slot_id: Ulid,
    ) -> Result<TimeSlot, EngineError> {
        self.set_slot_status(opportunity_id, slot_id, SlotStatus::Open)
            .await
    }

    /// Flip a slot's status. Existing reservations are unaffected. Setting
    /// the status a slot already has commits nothing.
    async fn set_slot_status(
        &self,
        opportunity_id: Ulid,
        slot_id: Ulid,
        status: SlotStatus,
    ) -> Result<TimeSlot, EngineError> {
        let txn = self.write_opportunity(&opportunity_id).await?;
        if txn.slot(&slot_id)?.slot.status == status {
            return Ok(txn.slot(&slot_id)?.slot.clone());
        }
        let event = Event::SlotStatusChanged {
            opportunity_id,
            slot_id,
            status,
        };
        let txn = self.persist_and_apply(txn, event).await?;
        info!(%opportunity_id, %slot_id, ?status, "slot status changed");
        Ok(txn.slot(&slot_id)?.slot.clone())
    }

    /// Override one day's capacity. The day must have a record and the new
    /// capacity can't drop below what is already booked.
    pub async fn set_day_capacity(
        &self,
        opportunity_id: Ulid,
        slot_id: Ulid,
        date: NaiveDate,
        capacity: u32,
    ) -> Result<DateCapacityRecord, EngineError> {
        if capacity > MAX_DAY_CAPACITY {
            return Err(EngineError::LimitExceeded("day capacity too large"));
        }
        let txn = self.write_opportunity(&opportunity_id).await?;
        txn.slot(&slot_id)?
            .ledger
            .check_capacity_override(date, capacity)?;
        let event = Event::DayCapacitySet {
            opportunity_id,
            slot_id,
            date,
            capacity,
        };
        let txn = self.persist_and_apply(txn, event).await?;

        let booked = txn
            .slot(&slot_id)?
            .ledger
            .get(date)
            .map(|r| r.booked)
            .unwrap_or_default();
        info!(%opportunity_id, %slot_id, %date, capacity, "day capacity set");
        Ok(DateCapacityRecord {
            date,
            opportunity_id,
            time_slot_id: slot_id,
            capacity,
            booked_count: booked,
        })
    }
}
