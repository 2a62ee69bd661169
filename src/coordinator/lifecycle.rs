// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background workers: replay of failed writes and cleanup of replayed records.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::metrics;

use super::{Replicate, ReplayRecord, ReplicateTimings, Shared};

pub(super) fn spawn_workers(
    runtime: &Handle,
    shared: Arc<Shared>,
    timings: ReplicateTimings,
) -> Vec<JoinHandle<()>> {
    let replay = {
        let shared = shared.clone();
        runtime.spawn(async move {
            let mut tick = tokio::time::interval(timings.replay_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                replay_pending(&shared).await;
            }
        })
    };

    let clean = runtime.spawn(async move {
        let mut tick = tokio::time::interval(timings.clean_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            clean_tombstoned(&shared);
        }
    });

    vec![replay, clean]
}

/// Replay every record that isn't tombstoned yet. Returns how many landed.
pub(crate) async fn replay_pending(shared: &Shared) -> usize {
    // Snapshot under the lock, replay without it
    let pending: Vec<Arc<ReplayRecord>> = {
        let records = shared.records.lock();
        records.iter().filter(|r| !r.is_tombstoned()).cloned().collect()
    };
    if pending.is_empty() {
        return 0;
    }
    debug!(pending = pending.len(), "Replaying failed writes");

    let mut replayed = 0;
    for record in pending {
        let action = record.action();
        let Some(backend) = shared.backend(&record.backend) else {
            warn!(backend = %record.backend, %action, "Replay record for unknown backend");
            continue;
        };

        match record.op.apply(backend.store.as_ref()).await {
            Ok(_) => {
                record.tombstone();
                replayed += 1;
                metrics::record_replay(&backend.label, action.as_str(), "success");
                info!(backend = %backend.label, %action, "Replayed write");
            }
            // Nothing left to converge (e.g. deleting what is already gone)
            Err(e) if e.is_permanent() => {
                record.tombstone();
                metrics::record_replay(&backend.label, action.as_str(), "dropped");
                debug!(backend = %backend.label, %action, error = %e, "Replay no longer applicable, dropped");
            }
            Err(e) => {
                metrics::record_replay(&backend.label, action.as_str(), "error");
                debug!(backend = %backend.label, %action, error = %e, "Replay failed, will retry next wake-up");
            }
        }
    }
    replayed
}

/// Drop tombstoned records. Returns how many were removed.
pub(crate) fn clean_tombstoned(shared: &Shared) -> usize {
    let mut records = shared.records.lock();
    let before = records.len();
    records.retain(|r| !r.is_tombstoned());
    let removed = before - records.len();
    if removed > 0 {
        debug!(removed, remaining = records.len(), "Cleaned replayed records");
        metrics::record_cleaned(removed);
    }
    removed
}

impl Replicate {
    /// Stop the background workers. Pending replay records are discarded
    /// with the coordinator.
    pub fn shutdown(&self) {
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            worker.abort();
        }
        let pending = self.shared.records.lock().iter().filter(|r| !r.is_tombstoned()).count();
        if pending > 0 {
            warn!(pending, "Replicate coordinator stopped with unreplayed writes");
        } else {
            info!("Replicate coordinator stopped");
        }
    }
}
