use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the WAL whenever enough appends have piled up since the last
/// compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// One compactor pass. Returns true if a compaction ran and succeeded.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not due");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(appends, "compacted WAL");
            true
        }
        Err(e) => {
            warn!(error = %e, "WAL compaction failed");
            false
        }
    }
}

/// Periodically recompute slot rollups from applications and drop notify
/// channels nobody listens to.
pub async fn run_reconciler(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // The first tick fires immediately; state was just replayed, skip it.
    interval.tick().await;
    loop {
        interval.tick().await;
        match engine.reconcile_rollups().await {
            Ok(0) => debug!("slot rollups consistent"),
            Ok(n) => warn!(slots = n, "repaired drifted slot rollups"),
            Err(e) => warn!(error = %e, "rollup reconciliation failed"),
        }
        let pruned = engine.notify.prune();
        if pruned > 0 {
            debug!(pruned, "dropped idle notification channels");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, NewSlot};
    use crate::model::DateRange;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("stayledger_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{name}-{}.wal", Ulid::new()))
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold");
        let engine =
            Engine::new(path.clone(), Arc::new(NotifyHub::new()), EngineConfig::default())
                .unwrap();
        let opp = Ulid::new();
        engine.create_opportunity(opp, Ulid::new(), None).await.unwrap();
        engine
            .open_slot(NewSlot {
                id: Ulid::new(),
                opportunity_id: opp,
                range: DateRange::new("2025-06-01".parse().unwrap(), "2025-06-30".parse().unwrap())
                    .unwrap(),
                default_capacity: 1,
                minimum_stay: 0,
            })
            .await
            .unwrap();

        assert!(!compact_if_needed(&engine, 10).await);
        assert!(compact_if_needed(&engine, 2).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        drop(engine);
        let engine =
            Engine::new(path, Arc::new(NotifyHub::new()), EngineConfig::default()).unwrap();
        assert_eq!(engine.list_slots(opp).await.unwrap().len(), 1);
    }
}
