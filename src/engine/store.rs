use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::ledger::DateLedger;
use super::EngineError;

/// A slot's metadata together with its day ledger.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub slot: TimeSlot,
    pub ledger: DateLedger,
}

/// Everything owned by one opportunity. Guarded by a single lock so a
/// reservation, the rollups and the application record move together.
#[derive(Debug, Clone)]
pub struct OpportunityState {
    pub id: Ulid,
    pub host_id: Ulid,
    pub title: Option<String>,
    pub created_at: Ms,
    pub slots: BTreeMap<Ulid, SlotState>,
    pub applications: HashMap<Ulid, Application>,
}

impl OpportunityState {
    pub fn new(id: Ulid, host_id: Ulid, title: Option<String>, created_at: Ms) -> Self {
        Self {
            id,
            host_id,
            title,
            created_at,
            slots: BTreeMap::new(),
            applications: HashMap::new(),
        }
    }

    pub fn slot(&self, slot_id: &Ulid) -> Result<&SlotState, EngineError> {
        self.slots.get(slot_id).ok_or(EngineError::SlotNotFound(*slot_id))
    }

    pub fn info(&self) -> OpportunityInfo {
        OpportunityInfo {
            id: self.id,
            host_id: self.host_id,
            title: self.title.clone(),
            slot_count: self.slots.len(),
            created_at: self.created_at,
        }
    }

    /// A live application by `user_id` for the same slot, if any.
    pub fn live_application_for(&self, user_id: Ulid, time_slot_id: Option<Ulid>) -> Option<Ulid> {
        self.applications
            .values()
            .find(|a| a.user_id == user_id && a.time_slot_id == time_slot_id && a.status.is_live())
            .map(|a| a.id)
    }
}

/// Apply a committed event to an opportunity (no locking: caller holds the lock).
///
/// Application is mechanical; every check happened before the event was
/// written, so replay reproduces the same state.
pub fn apply_event(
    os: &mut OpportunityState,
    event: &Event,
    application_index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::SlotOpened { slot } => {
            let mut ledger = DateLedger::new();
            ledger.ensure_range(&slot.window(), slot.default_capacity);
            os.slots.insert(
                slot.id,
                SlotState {
                    slot: slot.clone(),
                    ledger,
                },
            );
        }
        Event::CapacityRangeEnsured {
            slot_id,
            range,
            capacity,
            ..
        } => {
            if let Some(ss) = os.slots.get_mut(slot_id) {
                ss.ledger.ensure_range(range, *capacity);
            }
        }
        Event::SlotStatusChanged { slot_id, status, .. } => {
            if let Some(ss) = os.slots.get_mut(slot_id) {
                ss.slot.status = *status;
            }
        }
        Event::DayCapacitySet {
            slot_id,
            date,
            capacity,
            ..
        } => {
            if let Some(ss) = os.slots.get_mut(slot_id) {
                ss.ledger.set_capacity(*date, *capacity);
            }
        }
        Event::DaysReserved { token } => {
            if let Some(ss) = os.slots.get_mut(&token.time_slot_id) {
                let over = ss.ledger.reserve(&token.days);
                report_overbooked(os.id, token.time_slot_id, &over);
            }
        }
        Event::DaysReleased { token } => {
            if let Some(ss) = os.slots.get_mut(&token.time_slot_id) {
                ss.ledger.release(&token.days);
            }
        }
        Event::ApplicationCreated { application } => {
            if let Some(slot_id) = application.time_slot_id
                && let Some(ss) = os.slots.get_mut(&slot_id)
            {
                if let Some(token) = &application.reservation {
                    let over = ss.ledger.reserve(&token.days);
                    report_overbooked(os.id, slot_id, &over);
                }
                if application.applied {
                    ss.slot.increment_applied();
                }
            }
            application_index.insert(application.id, os.id);
            os.applications.insert(application.id, application.clone());
        }
        Event::ApplicationTransitioned {
            application_id,
            to,
            actor,
            at,
            reserve,
            release,
            applied_delta,
            confirmed_delta,
            ..
        } => {
            let Some(app) = os.applications.get_mut(application_id) else {
                return;
            };
            if let Some(slot_id) = app.time_slot_id
                && let Some(ss) = os.slots.get_mut(&slot_id)
            {
                if let Some(token) = reserve {
                    let over = ss.ledger.reserve(&token.days);
                    report_overbooked(os.id, slot_id, &over);
                }
                if let Some(token) = release {
                    ss.ledger.release(&token.days);
                }
                ss.slot.apply_rollup_delta(*applied_delta, *confirmed_delta);
            }

            app.status = *to;
            app.updated_at = *at;
            if reserve.is_some() {
                app.reservation = reserve.clone();
            }
            if release.is_some() {
                app.reservation = None;
            }
            if *applied_delta != 0 {
                app.applied = *applied_delta > 0;
            }
            if *confirmed_delta != 0 {
                app.confirmed = *confirmed_delta > 0;
            }
            if matches!(to, ApplicationStatus::Rejected | ApplicationStatus::Cancelled) {
                app.initiated_by = Some(*actor);
            }
        }
        Event::RollupsReconciled {
            slot_id,
            applied_count,
            confirmed_count,
            ..
        } => {
            if let Some(ss) = os.slots.get_mut(slot_id) {
                ss.slot.applied_count = *applied_count;
                ss.slot.confirmed_count = *confirmed_count;
            }
        }
        Event::SlotRestored { slot, days } => {
            os.slots.insert(
                slot.id,
                SlotState {
                    slot: slot.clone(),
                    ledger: DateLedger::from_days(days.iter().copied()),
                },
            );
        }
        Event::ApplicationRestored { application } => {
            application_index.insert(application.id, os.id);
            os.applications.insert(application.id, application.clone());
        }
        // Opportunity creation is handled at the DashMap level, not here.
        Event::OpportunityCreated { .. } => {}
    }
}

fn report_overbooked(opportunity_id: Ulid, slot_id: Ulid, days: &[NaiveDate]) {
    if days.is_empty() {
        return;
    }
    warn!(%opportunity_id, %slot_id, ?days, "applied reservation overbooks days");
    metrics::counter!(observability::LEDGER_INCONSISTENCIES_TOTAL, "kind" => "overbooked")
        .increment(days.len() as u64);
}

/// The events that recreate `os` from nothing. Used by WAL compaction.
pub fn snapshot_events(os: &OpportunityState) -> Vec<Event> {
    let mut events = Vec::with_capacity(1 + os.slots.len() + os.applications.len());
    events.push(Event::OpportunityCreated {
        id: os.id,
        host_id: os.host_id,
        title: os.title.clone(),
        at: os.created_at,
    });
    for ss in os.slots.values() {
        events.push(Event::SlotRestored {
            slot: ss.slot.clone(),
            days: ss.ledger.iter().collect(),
        });
    }
    let mut apps: Vec<&Application> = os.applications.values().collect();
    apps.sort_by_key(|a| a.id);
    for app in apps {
        events.push(Event::ApplicationRestored {
            application: app.clone(),
        });
    }
    events
}
