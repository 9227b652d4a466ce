use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for audit timestamps only. Booking math is in days.
pub type Ms = i64;

/// Inclusive range of calendar days `[start, end]`.
///
/// Every range in the system uses this convention: a stay from June 1st to
/// June 10th covers ten days, both ends included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Returns `None` when `end` falls before `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn len_days(&self) -> u32 {
        (self.end.signed_duration_since(self.start).num_days() + 1) as u32
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Clamp to `other`, or `None` if the two ranges are disjoint.
    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        DateRange::new(self.start.max(other.start), self.end.min(other.end))
    }

    /// Every calendar day in the range, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        self.start.iter_days().take(self.len_days() as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Open,
    Closed,
}

/// A host-defined booking window under an opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Ulid,
    pub opportunity_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Max concurrent occupants per day unless a day is overridden.
    pub default_capacity: u32,
    /// Shortest permitted stay, in days (inclusive count).
    pub minimum_stay: u32,
    /// Reporting rollup: live applications holding capacity in this slot.
    pub applied_count: u32,
    /// Reporting rollup: applications that reached ACTIVE.
    pub confirmed_count: u32,
    pub status: SlotStatus,
}

impl TimeSlot {
    pub fn window(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SlotStatus::Open
    }
}

/// Per-day inventory counter for one time-slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCapacity {
    pub capacity: u32,
    pub booked: u32,
}

impl DayCapacity {
    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.booked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Draft,
    Pending,
    Accepted,
    Rejected,
    Active,
    Completed,
    Cancelled,
}

impl ApplicationStatus {
    /// Withdrawn applications no longer count toward the one-per-slot rule.
    pub fn is_live(&self) -> bool {
        !matches!(self, ApplicationStatus::Rejected | ApplicationStatus::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::Rejected
                | ApplicationStatus::Cancelled
                | ApplicationStatus::Completed
        )
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApplicationStatus::Draft => "DRAFT",
            ApplicationStatus::Pending => "PENDING",
            ApplicationStatus::Accepted => "ACCEPTED",
            ApplicationStatus::Rejected => "REJECTED",
            ApplicationStatus::Active => "ACTIVE",
            ApplicationStatus::Completed => "COMPLETED",
            ApplicationStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Who asked for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    User,
    Host,
    System,
}

/// The exact day-set a reservation incremented. Releasing the token
/// decrements the same days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationToken {
    pub opportunity_id: Ulid,
    pub time_slot_id: Ulid,
    pub days: Vec<NaiveDate>,
}

/// A user's booking request against an opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: Ulid,
    pub user_id: Ulid,
    pub opportunity_id: Ulid,
    pub host_id: Ulid,
    pub time_slot_id: Option<Ulid>,
    pub status: ApplicationStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_days: u32,
    /// Held while the application occupies ledger capacity.
    pub reservation: Option<ReservationToken>,
    /// Counted in the slot's `confirmed_count`.
    pub confirmed: bool,
    /// Whether the slot's `applied_count` includes this application.
    pub applied: bool,
    pub initiated_by: Option<Actor>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Application {
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OpportunityCreated {
        id: Ulid,
        host_id: Ulid,
        title: Option<String>,
        at: Ms,
    },
    /// Registers the slot and creates its day records at `default_capacity`.
    SlotOpened {
        slot: TimeSlot,
    },
    CapacityRangeEnsured {
        opportunity_id: Ulid,
        slot_id: Ulid,
        range: DateRange,
        capacity: u32,
    },
    SlotStatusChanged {
        opportunity_id: Ulid,
        slot_id: Ulid,
        status: SlotStatus,
    },
    DayCapacitySet {
        opportunity_id: Ulid,
        slot_id: Ulid,
        date: NaiveDate,
        capacity: u32,
    },
    DaysReserved {
        token: ReservationToken,
    },
    DaysReleased {
        token: ReservationToken,
    },
    /// A new application; if it carries a reservation the ledger and the
    /// applied rollup move with it.
    ApplicationCreated {
        application: Application,
    },
    ApplicationTransitioned {
        opportunity_id: Ulid,
        application_id: Ulid,
        to: ApplicationStatus,
        actor: Actor,
        at: Ms,
        reserve: Option<ReservationToken>,
        release: Option<ReservationToken>,
        applied_delta: i8,
        confirmed_delta: i8,
    },
    RollupsReconciled {
        opportunity_id: Ulid,
        slot_id: Ulid,
        applied_count: u32,
        confirmed_count: u32,
    },
    /// Compaction snapshot of one slot and its full ledger.
    SlotRestored {
        slot: TimeSlot,
        days: Vec<(NaiveDate, DayCapacity)>,
    },
    /// Compaction snapshot of one application. No ledger side effects.
    ApplicationRestored {
        application: Application,
    },
}

impl Event {
    /// The opportunity whose state this event changes.
    pub fn opportunity_id(&self) -> Ulid {
        match self {
            Event::OpportunityCreated { id, .. } => *id,
            Event::SlotOpened { slot } | Event::SlotRestored { slot, .. } => slot.opportunity_id,
            Event::CapacityRangeEnsured { opportunity_id, .. }
            | Event::SlotStatusChanged { opportunity_id, .. }
            | Event::DayCapacitySet { opportunity_id, .. }
            | Event::ApplicationTransitioned { opportunity_id, .. }
            | Event::RollupsReconciled { opportunity_id, .. } => *opportunity_id,
            Event::DaysReserved { token } | Event::DaysReleased { token } => token.opportunity_id,
            Event::ApplicationCreated { application }
            | Event::ApplicationRestored { application } => application.opportunity_id,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::OpportunityCreated { .. } => "opportunity_created",
            Event::SlotOpened { .. } => "slot_opened",
            Event::CapacityRangeEnsured { .. } => "capacity_range_ensured",
            Event::SlotStatusChanged { .. } => "slot_status_changed",
            Event::DayCapacitySet { .. } => "day_capacity_set",
            Event::DaysReserved { .. } => "days_reserved",
            Event::DaysReleased { .. } => "days_released",
            Event::ApplicationCreated { .. } => "application_created",
            Event::ApplicationTransitioned { .. } => "application_transitioned",
            Event::RollupsReconciled { .. } => "rollups_reconciled",
            Event::SlotRestored { .. } => "slot_restored",
            Event::ApplicationRestored { .. } => "application_restored",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityInfo {
    pub id: Ulid,
    pub host_id: Ulid,
    pub title: Option<String>,
    pub slot_count: usize,
    pub created_at: Ms,
}

/// One day of one slot, as exposed to calendars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateCapacityRecord {
    pub date: NaiveDate,
    pub opportunity_id: Ulid,
    pub time_slot_id: Ulid,
    pub capacity: u32,
    pub booked_count: u32,
}

/// Listing view of a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSummary {
    #[serde(flatten)]
    pub slot: TimeSlot,
    /// Days with a capacity record.
    pub bookable_days: u32,
    /// Days with no remaining capacity.
    pub full_days: u32,
}
