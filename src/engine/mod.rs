mod allocator;
mod error;
mod ledger;
mod lifecycle;
mod mutations;
mod queries;
mod registry;
mod store;

pub use allocator::{BookingRequest, plan_reservation};
pub use error::EngineError;
pub use ledger::{DateLedger, ReleaseReport};
pub use lifecycle::{NewApplication, TransitionEffect, check_transition};
pub use registry::{NewSlot, validate_window};
pub use store::{OpportunityState, SlotState};

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

use store::apply_event;

pub type SharedOpportunityState = Arc<RwLock<OpportunityState>>;

// ── Group-commit WAL channel ─────────────────────────────

const WAL_CHANNEL_CAPACITY: usize = 4096;
const WAL_BATCH_LIMIT: usize = 512;

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Drains whatever is queued, writes all appends, and fsyncs
/// once per batch. Control commands flush pending appends before running so
/// the log order matches the order callers were acknowledged in.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut inbox = Vec::with_capacity(WAL_BATCH_LIMIT);
    let mut batch = Vec::with_capacity(WAL_BATCH_LIMIT);
    while rx.recv_many(&mut inbox, WAL_BATCH_LIMIT).await > 0 {
        for cmd in inbox.drain(..) {
            match cmd {
                WalCommand::Append { event, response } => batch.push((event, response)),
                WalCommand::Compact { events, response } => {
                    commit_batch(&mut wal, &mut batch);
                    let _ = response.send(wal.compact(&events));
                }
                WalCommand::AppendsSinceCompact { response } => {
                    commit_batch(&mut wal, &mut batch);
                    let _ = response.send(wal.appends_since_compact());
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
    }
    debug!("WAL writer stopped");
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = write_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Write and fsync a whole batch, or none of it: on any failure the log is
/// cut back to where the batch started, since every caller will be told the
/// commit failed.
fn write_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let start = wal.checkpoint()?;
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result
        && let Err(rollback) = wal.rollback(start)
    {
        error!(error = %e, rollback_error = %rollback, "failed to roll back a failed WAL batch");
    }
    result
}

// ── Engine ───────────────────────────────────────────────

/// Lock and storage timeouts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long one attempt may wait for a lock or for room in the WAL queue.
    pub storage_timeout: Duration,
    /// Attempts before giving up with `StorageUnavailable`.
    pub max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

pub struct Engine {
    pub state: Arc<DashMap<Ulid, SharedOpportunityState>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: application id → opportunity id. A create claims its
    /// id here before committing.
    pub(super) application_index: Arc<DashMap<Ulid, Ulid>>,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes can't miss a concurrent commit.
    pub(super) gate: Arc<RwLock<()>>,
    /// Serializes opportunity creation (existence check + insert).
    pub(super) create_lock: Arc<Mutex<()>>,
    pub(super) config: EngineConfig,
}

/// Exclusive access to one opportunity for the duration of a mutation.
///
/// Holds the compaction gate (shared) and the opportunity's write lock.
/// Validation, the WAL append and the in-memory apply all happen while this
/// is alive, so concurrent check-and-reserve calls on the same opportunity
/// are linearizable.
pub struct OpportunityTxn {
    guard: OwnedRwLockWriteGuard<OpportunityState>,
    _gate: OwnedRwLockReadGuard<()>,
}

impl Deref for OpportunityTxn {
    type Target = OpportunityState;

    fn deref(&self) -> &OpportunityState {
        &self.guard
    }
}

impl DerefMut for OpportunityTxn {
    fn deref_mut(&mut self) -> &mut OpportunityState {
        &mut self.guard
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let application_index = DashMap::new();
        let mut opportunities: HashMap<Ulid, OpportunityState> = HashMap::new();
        for event in &events {
            match event {
                Event::OpportunityCreated {
                    id,
                    host_id,
                    title,
                    at,
                } => {
                    let os = OpportunityState::new(*id, *host_id, title.clone(), *at);
                    opportunities.insert(*id, os);
                }
                other => {
                    if let Some(os) = opportunities.get_mut(&other.opportunity_id()) {
                        apply_event(os, other, &application_index);
                    }
                }
            }
        }

        let state = DashMap::with_capacity(opportunities.len());
        for (id, os) in opportunities {
            state.insert(id, Arc::new(RwLock::new(os)));
        }
        metrics::gauge!(observability::OPPORTUNITIES_ACTIVE).set(state.len() as f64);
        info!(
            path = %wal_path.display(),
            events = events.len(),
            opportunities = state.len(),
            "engine state restored"
        );

        Ok(Self {
            state: Arc::new(state),
            wal_tx,
            notify,
            application_index: Arc::new(application_index),
            gate: Arc::new(RwLock::new(())),
            create_lock: Arc::new(Mutex::new(())),
            config,
        })
    }

    pub fn get_opportunity_state(&self, id: &Ulid) -> Option<SharedOpportunityState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn opportunity_for_application(&self, application_id: &Ulid) -> Option<Ulid> {
        self.application_index.get(application_id).map(|e| *e.value())
    }

    /// Run `acquire` with the storage timeout, backing off between attempts.
    async fn acquire<T, F, Fut>(&self, what: &'static str, mut acquire: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut backoff = Duration::from_millis(10);
        for attempt in 1..=self.config.max_attempts {
            match tokio::time::timeout(self.config.storage_timeout, acquire()).await {
                Ok(v) => return Ok(v),
                Err(_) => {
                    metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL, "lock" => what)
                        .increment(1);
                    debug!(what, attempt, "lock acquisition timed out");
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        Err(EngineError::StorageUnavailable(format!("timed out waiting for {what}")))
    }

    pub(super) async fn enter_gate(&self) -> Result<OwnedRwLockReadGuard<()>, EngineError> {
        self.acquire("compaction gate", || self.gate.clone().read_owned()).await
    }

    /// Lock an opportunity for a mutation.
    pub(super) async fn write_opportunity(&self, id: &Ulid) -> Result<OpportunityTxn, EngineError> {
        let gate = self.enter_gate().await?;
        let shared = self
            .get_opportunity_state(id)
            .ok_or(EngineError::NotFound(*id))?;
        let guard = self
            .acquire("opportunity lock", || shared.clone().write_owned())
            .await?;
        Ok(OpportunityTxn { guard, _gate: gate })
    }

    pub(super) async fn read_opportunity(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockReadGuard<OpportunityState>, EngineError> {
        let shared = self
            .get_opportunity_state(id)
            .ok_or(EngineError::NotFound(*id))?;
        self.acquire("opportunity lock", || shared.clone().read_owned())
            .await
    }

    pub(super) fn committer(&self) -> Committer {
        Committer {
            wal_tx: self.wal_tx.clone(),
            application_index: self.application_index.clone(),
            notify: self.notify.clone(),
            storage_timeout: self.config.storage_timeout,
        }
    }

    /// WAL-append, apply, notify. The caller has already validated.
    ///
    /// Runs on its own task that owns `txn`: once a record may reach the log
    /// it is applied in memory too, even if the caller is dropped midway.
    /// The transaction is handed back for any follow-up reads.
    pub(super) async fn persist_and_apply(
        &self,
        mut txn: OpportunityTxn,
        event: Event,
    ) -> Result<OpportunityTxn, EngineError> {
        let commit = self.committer();
        tokio::spawn(async move {
            commit.append(&event).await.inspect_err(|_| commit.unclaim(&event))?;
            apply_event(&mut txn, &event, &commit.application_index);
            commit.notify.send(event.opportunity_id(), &event);
            Ok::<_, EngineError>(txn)
        })
        .await
        .map_err(commit_task_failed)?
    }
}

pub(super) fn commit_task_failed(e: tokio::task::JoinError) -> EngineError {
    EngineError::StorageUnavailable(format!("commit task failed: {e}"))
}

/// What a detached commit needs from the engine.
pub(super) struct Committer {
    wal_tx: mpsc::Sender<WalCommand>,
    pub(super) application_index: Arc<DashMap<Ulid, Ulid>>,
    pub(super) notify: Arc<NotifyHub>,
    storage_timeout: Duration,
}

impl Committer {
    /// Durably log `event` via the group-commit writer. Returns once the
    /// batch holding it has been fsynced.
    pub(super) async fn append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send_timeout(
                WalCommand::Append {
                    event: event.clone(),
                    response: tx,
                },
                self.storage_timeout,
            )
            .await
            .map_err(|e| EngineError::StorageUnavailable(format!("WAL queue: {e}")))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
    }

    /// Release the id a failed application create had claimed.
    fn unclaim(&self, event: &Event) {
        if let Event::ApplicationCreated { application } = event {
            self.application_index
                .remove_if(&application.id, |_, opp| *opp == application.opportunity_id);
        }
    }
}

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}
