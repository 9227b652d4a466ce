use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::ledger::report_release_inconsistencies;
use super::registry::validate_window;
use super::store::OpportunityState;
use super::{Engine, EngineError};

/// A stay to be placed against an opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub opportunity_id: Ulid,
    pub time_slot_id: Option<Ulid>,
    pub range: DateRange,
}

/// Decide what a booking would reserve, without reserving it.
///
/// Returns `Ok(None)` when the opportunity has no slots at all (nothing to
/// reserve). Every other outcome is either the exact day-set to increment or
/// the first policy or capacity failure.
pub fn plan_reservation(
    os: &OpportunityState,
    req: &BookingRequest,
) -> Result<Option<ReservationToken>, EngineError> {
    let Some(slot_id) = req.time_slot_id else {
        if os.slots.is_empty() {
            return Ok(None);
        }
        return Err(EngineError::InvalidInput(
            "opportunity has time slots; choose one".into(),
        ));
    };
    if req.range.len_days() > MAX_STAY_DAYS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }

    let ss = os.slot(&slot_id)?;
    validate_window(&ss.slot, &req.range)?;
    let days: Vec<_> = req.range.days().collect();
    ss.ledger.check(&days)?;

    Ok(Some(ReservationToken {
        opportunity_id: req.opportunity_id,
        time_slot_id: slot_id,
        days,
    }))
}

impl Engine {
    /// Validate a stay against its slot and reserve every covered day in one
    /// commit. On any failure the ledger is untouched.
    pub async fn reserve(
        &self,
        req: BookingRequest,
    ) -> Result<Option<ReservationToken>, EngineError> {
        let txn = self.write_opportunity(&req.opportunity_id).await?;
        let token = match plan_reservation(&txn, &req) {
            Ok(Some(token)) => token,
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!(opportunity_id = %req.opportunity_id, error = %e, "reservation refused");
                observability::record_reservation_rejected(&e);
                return Err(e);
            }
        };
        self.persist_and_apply(txn, Event::DaysReserved { token: token.clone() }).await?;
        metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => "reserved").increment(1);
        info!(
            opportunity_id = %token.opportunity_id,
            slot_id = %token.time_slot_id,
            start = %req.range.start,
            end = %req.range.end,
            "stay reserved"
        );
        Ok(Some(token))
    }

    /// Give a token's days back to the ledger. Days that vanished or are
    /// already at zero are logged and skipped.
    pub async fn release_reservation(&self, token: ReservationToken) -> Result<(), EngineError> {
        let txn = self.write_opportunity(&token.opportunity_id).await?;
        let report = txn
            .slot(&token.time_slot_id)?
            .ledger
            .inspect_release(&token.days);
        report_release_inconsistencies(&token, &report);
        self.persist_and_apply(txn, Event::DaysReleased { token }).await?;
        metrics::counter!(observability::RELEASES_TOTAL).increment(1);
        Ok(())
    }
}
