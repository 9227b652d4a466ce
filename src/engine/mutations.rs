use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::store::{OpportunityState, snapshot_events};
use super::{Engine, EngineError, WalCommand, commit_task_failed, now_ms};

impl Engine {
    pub async fn create_opportunity(
        &self,
        id: Ulid,
        host_id: Ulid,
        title: Option<String>,
    ) -> Result<OpportunityInfo, EngineError> {
        if let Some(ref t) = title
            && t.len() > MAX_TITLE_LEN
        {
            return Err(EngineError::LimitExceeded("title too long"));
        }

        let gate = self.enter_gate().await?;
        let create = self.create_lock.clone().lock_owned().await;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.state.len() >= MAX_OPPORTUNITIES {
            return Err(EngineError::LimitExceeded("too many opportunities"));
        }

        let at = now_ms();
        let event = Event::OpportunityCreated {
            id,
            host_id,
            title: title.clone(),
            at,
        };
        let os = OpportunityState::new(id, host_id, title, at);
        let info = os.info();

        // Same detached commit as `persist_and_apply`: the map insert must
        // follow a durable append even if this caller goes away.
        let commit = self.committer();
        let state = self.state.clone();
        tokio::spawn(async move {
            let _held = (gate, create);
            commit.append(&event).await?;
            state.insert(id, Arc::new(RwLock::new(os)));
            metrics::gauge!(observability::OPPORTUNITIES_ACTIVE).set(state.len() as f64);
            commit.notify.send(id, &event);
            Ok::<_, EngineError>(())
        })
        .await
        .map_err(commit_task_failed)??;
        info!(opportunity_id = %id, %host_id, "opportunity created");
        Ok(info)
    }

    /// Recompute every slot's applied/confirmed rollups from its
    /// applications and commit a correction wherever they drifted.
    /// Returns how many slots were corrected.
    pub async fn reconcile_rollups(&self) -> Result<usize, EngineError> {
        let ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut corrected = 0;
        for opportunity_id in ids {
            let mut txn = match self.write_opportunity(&opportunity_id).await {
                Ok(txn) => txn,
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            let mut drift = Vec::new();
            for (slot_id, ss) in &txn.slots {
                let (applied, confirmed) = txn
                    .applications
                    .values()
                    .filter(|a| a.time_slot_id == Some(*slot_id))
                    .fold((0u32, 0u32), |(ap, co), a| {
                        (ap + a.applied as u32, co + a.confirmed as u32)
                    });
                if (applied, confirmed) != (ss.slot.applied_count, ss.slot.confirmed_count) {
                    warn!(
                        %opportunity_id,
                        %slot_id,
                        stored_applied = ss.slot.applied_count,
                        stored_confirmed = ss.slot.confirmed_count,
                        applied,
                        confirmed,
                        "slot rollups drifted"
                    );
                    drift.push((*slot_id, applied, confirmed));
                }
            }

            for (slot_id, applied_count, confirmed_count) in drift {
                let event = Event::RollupsReconciled {
                    opportunity_id,
                    slot_id,
                    applied_count,
                    confirmed_count,
                };
                txn = self.persist_and_apply(txn, event).await?;
                metrics::counter!(observability::ROLLUP_DRIFT_TOTAL).increment(1);
                corrected += 1;
            }
        }
        Ok(corrected)
    }

    /// Rewrite the WAL as a snapshot of current state.
    ///
    /// Holds the gate exclusively, so no commit can land between taking the
    /// snapshot and swapping the file.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.acquire_exclusive_gate().await?;

        let mut entries: Vec<(Ulid, super::SharedOpportunityState)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);

        let mut events = Vec::new();
        for (_, shared) in entries {
            let os = shared.read().await;
            events.extend(snapshot_events(&os));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()));

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "status" => status).increment(1);
        if result.is_ok() {
            info!(events = count, "WAL compacted");
        }
        result
    }

    async fn acquire_exclusive_gate(
        &self,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<()>, EngineError> {
        self.acquire("compaction gate", || self.gate.clone().write_owned())
            .await
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
