use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::store::SlotState;
use super::{Engine, EngineError};

fn summarize(ss: &SlotState) -> SlotSummary {
    SlotSummary {
        slot: ss.slot.clone(),
        bookable_days: ss.ledger.len() as u32,
        full_days: ss.ledger.full_days(),
    }
}

impl Engine {
    pub async fn list_opportunities(&self) -> Vec<OpportunityInfo> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for os in shared {
            out.push(os.read().await.info());
        }
        out.sort_by_key(|o| o.id);
        out
    }

    pub async fn get_opportunity(&self, id: Ulid) -> Result<OpportunityInfo, EngineError> {
        Ok(self.read_opportunity(&id).await?.info())
    }

    pub async fn get_slot(
        &self,
        opportunity_id: Ulid,
        slot_id: Ulid,
    ) -> Result<TimeSlot, EngineError> {
        let os = self.read_opportunity(&opportunity_id).await?;
        Ok(os.slot(&slot_id)?.slot.clone())
    }

    /// Slot summaries for listings, ordered by id.
    pub async fn list_slots(&self, opportunity_id: Ulid) -> Result<Vec<SlotSummary>, EngineError> {
        let os = self.read_opportunity(&opportunity_id).await?;
        Ok(os.slots.values().map(summarize).collect())
    }

    /// Day records of one slot inside `range`, in date order. Days without
    /// a record are simply absent from the result.
    pub async fn capacity_records(
        &self,
        opportunity_id: Ulid,
        slot_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<DateCapacityRecord>, EngineError> {
        if range.len_days() > MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let os = self.read_opportunity(&opportunity_id).await?;
        let ss = os.slot(&slot_id)?;
        Ok(ss
            .ledger
            .range(&range)
            .map(|(date, rec)| DateCapacityRecord {
                date,
                opportunity_id,
                time_slot_id: slot_id,
                capacity: rec.capacity,
                booked_count: rec.booked,
            })
            .collect())
    }

    pub async fn get_application(&self, id: Ulid) -> Result<Application, EngineError> {
        let opportunity_id = self
            .opportunity_for_application(&id)
            .ok_or(EngineError::NotFound(id))?;
        let os = self.read_opportunity(&opportunity_id).await?;
        os.applications
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Applications of one opportunity, oldest first.
    pub async fn list_applications(
        &self,
        opportunity_id: Ulid,
    ) -> Result<Vec<Application>, EngineError> {
        let os = self.read_opportunity(&opportunity_id).await?;
        let mut apps: Vec<Application> = os.applications.values().cloned().collect();
        apps.sort_by_key(|a| a.id);
        Ok(apps)
    }
}
