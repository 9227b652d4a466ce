use dashmap::mapref::entry::Entry;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::allocator::{BookingRequest, plan_reservation};
use super::ledger::{ReleaseReport, report_release_inconsistencies};
use super::{Engine, EngineError, now_ms};

/// Input for creating an application.
#[derive(Debug, Clone)]
pub struct NewApplication {
    pub id: Ulid,
    pub user_id: Ulid,
    pub opportunity_id: Ulid,
    pub time_slot_id: Option<Ulid>,
    pub range: DateRange,
    /// Save as DRAFT: nothing is reserved until it is submitted.
    pub draft: bool,
}

/// Side effects a status change carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionEffect {
    /// Reserve the application's stay (submitting a draft).
    pub reserve: bool,
    /// Give the held reservation back.
    pub release: bool,
    pub applied_delta: i8,
    pub confirmed_delta: i8,
}

/// Is `app` allowed to move to `to` on behalf of `actor`, and what does it cost?
///
/// ```text
/// DRAFT ──► PENDING ──► ACCEPTED ──► ACTIVE ──► COMPLETED
///             │  └──────────┼──────────►┘
///             ├──► REJECTED ◄┤
///             └──► CANCELLED ◄── (DRAFT, ACCEPTED, ACTIVE too)
/// ```
pub fn check_transition(
    app: &Application,
    to: ApplicationStatus,
    actor: Actor,
) -> Result<TransitionEffect, EngineError> {
    use ApplicationStatus::*;

    let withdraw = TransitionEffect {
        reserve: false,
        release: app.reservation.is_some(),
        applied_delta: -(app.applied as i8),
        confirmed_delta: -(app.confirmed as i8),
    };
    match (app.status, to) {
        (Draft, Pending) => Ok(TransitionEffect {
            reserve: true,
            applied_delta: 1,
            ..Default::default()
        }),
        (Pending, Accepted) | (Active, Completed) => Ok(TransitionEffect::default()),
        (Pending | Accepted, Active) => Ok(TransitionEffect {
            confirmed_delta: (app.applied && !app.confirmed) as i8,
            ..Default::default()
        }),
        (Pending | Accepted, Rejected) => {
            if actor == Actor::User {
                return Err(EngineError::NotPermitted("only the host can reject an application"));
            }
            Ok(withdraw)
        }
        (Draft | Pending | Accepted | Active, Cancelled) => Ok(withdraw),
        (from, to) => Err(EngineError::InvalidTransition { from, to }),
    }
}

impl Engine {
    /// Create an application. Unless saved as a draft, its stay is reserved
    /// in the same commit; if that fails nothing is stored.
    pub async fn create_application(
        &self,
        new: NewApplication,
    ) -> Result<Application, EngineError> {
        if new.range.len_days() > MAX_STAY_DAYS {
            return Err(EngineError::LimitExceeded("stay too long"));
        }
        if self.application_index.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }

        let txn = self.write_opportunity(&new.opportunity_id).await?;
        if txn.applications.len() >= MAX_APPLICATIONS_PER_OPPORTUNITY {
            return Err(EngineError::LimitExceeded("too many applications for one opportunity"));
        }
        if let Some(slot_id) = new.time_slot_id {
            txn.slot(&slot_id)?;
        }
        if let Some(existing) = txn.live_application_for(new.user_id, new.time_slot_id) {
            return Err(EngineError::DuplicateApplication {
                user_id: new.user_id,
                existing,
            });
        }

        let (status, reservation) = if new.draft {
            (ApplicationStatus::Draft, None)
        } else {
            let req = BookingRequest {
                opportunity_id: new.opportunity_id,
                time_slot_id: new.time_slot_id,
                range: new.range,
            };
            match plan_reservation(&txn, &req) {
                Ok(token) => (ApplicationStatus::Pending, token),
                Err(e) => {
                    observability::record_reservation_rejected(&e);
                    return Err(e);
                }
            }
        };

        // Claimed before the commit so a concurrent create with the same id,
        // on any opportunity, sees it taken. Released again if the commit fails.
        match self.application_index.entry(new.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(new.id)),
            Entry::Vacant(slot) => {
                slot.insert(new.opportunity_id);
            }
        }

        let now = now_ms();
        let application = Application {
            id: new.id,
            user_id: new.user_id,
            opportunity_id: new.opportunity_id,
            host_id: txn.host_id,
            time_slot_id: new.time_slot_id,
            status,
            start_date: new.range.start,
            end_date: new.range.end,
            duration_days: new.range.len_days(),
            applied: reservation.is_some(),
            reservation,
            confirmed: false,
            initiated_by: None,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(
            txn,
            Event::ApplicationCreated {
                application: application.clone(),
            },
        )
        .await?;

        if application.reservation.is_some() {
            metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => "reserved")
                .increment(1);
        }
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => status.to_string())
            .increment(1);
        info!(
            application_id = %application.id,
            opportunity_id = %application.opportunity_id,
            user_id = %application.user_id,
            %status,
            "application created"
        );
        Ok(application)
    }

    /// Move an application to `to`, committing its capacity and rollup side
    /// effects together with the status change.
    ///
    /// Release problems (missing day records, counters already at zero) are
    /// logged and never block the transition.
    pub async fn transition_application(
        &self,
        application_id: Ulid,
        to: ApplicationStatus,
        actor: Actor,
    ) -> Result<Application, EngineError> {
        let opportunity_id = self
            .opportunity_for_application(&application_id)
            .ok_or(EngineError::NotFound(application_id))?;
        let txn = self.write_opportunity(&opportunity_id).await?;
        let app = txn
            .applications
            .get(&application_id)
            .ok_or(EngineError::NotFound(application_id))?;
        let effect = check_transition(app, to, actor)?;
        let from = app.status;

        let mut applied_delta = effect.applied_delta;
        let reserve = if effect.reserve {
            let req = BookingRequest {
                opportunity_id,
                time_slot_id: app.time_slot_id,
                range: app.range(),
            };
            let token = plan_reservation(&txn, &req)
                .inspect_err(observability::record_reservation_rejected)?;
            if token.is_none() {
                applied_delta = 0;
            }
            token
        } else {
            None
        };

        let release = if effect.release {
            app.reservation.clone()
        } else {
            None
        };
        if let Some(token) = &release {
            let report = match txn.slot(&token.time_slot_id) {
                Ok(ss) => ss.ledger.inspect_release(&token.days),
                Err(_) => {
                    warn!(
                        %application_id,
                        slot_id = %token.time_slot_id,
                        "releasing against a slot that no longer exists"
                    );
                    ReleaseReport {
                        missing: token.days.clone(),
                        ..Default::default()
                    }
                }
            };
            report_release_inconsistencies(token, &report);
        }

        let event = Event::ApplicationTransitioned {
            opportunity_id,
            application_id,
            to,
            actor,
            at: now_ms(),
            reserve: reserve.clone(),
            release: release.clone(),
            applied_delta,
            confirmed_delta: effect.confirmed_delta,
        };
        let txn = self.persist_and_apply(txn, event).await?;

        if reserve.is_some() {
            metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => "reserved")
                .increment(1);
        }
        if release.is_some() {
            metrics::counter!(observability::RELEASES_TOTAL).increment(1);
        }
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => to.to_string()).increment(1);
        info!(%application_id, %opportunity_id, %from, %to, ?actor, "application transitioned");

        txn.applications
            .get(&application_id)
            .cloned()
            .ok_or(EngineError::NotFound(application_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ApplicationStatus::*;
    use chrono::NaiveDate;

    fn app(status: ApplicationStatus, reserved: bool, confirmed: bool) -> Application {
        let opportunity_id = Ulid::new();
        let time_slot_id = Ulid::new();
        let start = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        Application {
            id: Ulid::new(),
            user_id: Ulid::new(),
            opportunity_id,
            host_id: Ulid::new(),
            time_slot_id: Some(time_slot_id),
            status,
            start_date: start,
            end_date: start,
            duration_days: 1,
            reservation: reserved.then(|| ReservationToken {
                opportunity_id,
                time_slot_id,
                days: vec![start],
            }),
            confirmed,
            applied: reserved,
            initiated_by: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn submit_draft_reserves() {
        let e = check_transition(&app(Draft, false, false), Pending, Actor::User).unwrap();
        assert!(e.reserve);
        assert_eq!(e.applied_delta, 1);
    }

    #[test]
    fn activate_confirms_once() {
        let e = check_transition(&app(Accepted, true, false), Active, Actor::Host).unwrap();
        assert_eq!(e.confirmed_delta, 1);
        assert!(!e.reserve && !e.release);
        let e = check_transition(&app(Pending, true, false), Active, Actor::Host).unwrap();
        assert_eq!(e.confirmed_delta, 1);
    }

    #[test]
    fn cancel_active_undoes_everything() {
        let e = check_transition(&app(Active, true, true), Cancelled, Actor::User).unwrap();
        assert_eq!(
            e,
            TransitionEffect {
                reserve: false,
                release: true,
                applied_delta: -1,
                confirmed_delta: -1,
            }
        );
    }

    #[test]
    fn cancel_draft_has_nothing_to_release() {
        let e = check_transition(&app(Draft, false, false), Cancelled, Actor::User).unwrap();
        assert_eq!(e, TransitionEffect::default());
    }

    #[test]
    fn users_cannot_reject() {
        assert!(matches!(
            check_transition(&app(Pending, true, false), Rejected, Actor::User),
            Err(EngineError::NotPermitted(_))
        ));
        assert!(check_transition(&app(Pending, true, false), Rejected, Actor::Host).is_ok());
        assert!(check_transition(&app(Accepted, true, false), Rejected, Actor::System).is_ok());
    }

    #[test]
    fn illegal_moves_are_refused() {
        let cases = [
            (Draft, Accepted),
            (Draft, Active),
            (Pending, Completed),
            (Accepted, Pending),
            (Active, Rejected),
            (Active, Pending),
            (Completed, Cancelled),
            (Rejected, Pending),
            (Cancelled, Pending),
            (Cancelled, Cancelled),
        ];
        for (from, to) in cases {
            let err = check_transition(&app(from, true, false), to, Actor::Host).unwrap_err();
            assert!(
                matches!(
                    err,
                    EngineError::InvalidTransition { from: f, to: t } if f == from && t == to
                ),
                "{from} -> {to} should be refused"
            );
        }
    }
}
