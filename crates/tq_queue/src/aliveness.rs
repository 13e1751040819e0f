//! Tracking of which workers are alive, and what they are working on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;
use tq_utils::net_protocol::buckets::BucketId;
use tq_utils::net_protocol::workers::{WorkerAliveness, WorkerId, WorkerStatus};
use tq_utils::time::Clock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerStateError {
    #[error("worker {0} is not registered")]
    NotRegistered(WorkerId),
    #[error("worker {0} is already enabled")]
    AlreadyEnabled(WorkerId),
    #[error("worker {0} is already disabled")]
    AlreadyDisabled(WorkerId),
    #[error("worker {0} is blocked")]
    Blocked(WorkerId),
    #[error("worker {0} is already alive")]
    AlreadyAlive(WorkerId),
}

#[derive(Debug)]
struct WorkerRecord {
    disabled: bool,
    last_seen: Instant,
    bucket_ids_being_processed: BTreeSet<BucketId>,
}

impl WorkerRecord {
    fn fresh(now: Instant) -> Self {
        Self {
            disabled: false,
            last_seen: now,
            bucket_ids_being_processed: Default::default(),
        }
    }

    fn status(&self, now: Instant, alive_report_timeout: Duration) -> WorkerStatus {
        if self.disabled {
            WorkerStatus::Blocked
        } else if now.saturating_duration_since(self.last_seen) > alive_report_timeout {
            WorkerStatus::Silent
        } else {
            WorkerStatus::Alive
        }
    }
}

/// Liveness state machine of every worker that has ever registered.
///
/// Workers that never registered have no record and are reported as
/// [WorkerStatus::NotRegistered].
pub struct WorkerAlivenessProvider {
    clock: Arc<dyn Clock>,
    alive_report_timeout: Duration,
    workers: RwLock<HashMap<WorkerId, WorkerRecord>>,
}

static_assertions::assert_impl_all!(WorkerAlivenessProvider: Send, Sync);

impl WorkerAlivenessProvider {
    pub fn new(clock: Arc<dyn Clock>, alive_report_timeout: Duration) -> Self {
        Self {
            clock,
            alive_report_timeout,
            workers: Default::default(),
        }
    }

    pub fn aliveness(&self, worker_id: &WorkerId) -> WorkerAliveness {
        let now = self.clock.now();
        match self.workers.read().get(worker_id) {
            Some(record) => self.aliveness_of(record, now),
            None => WorkerAliveness::not_registered(),
        }
    }

    pub fn status(&self, worker_id: &WorkerId) -> WorkerStatus {
        let now = self.clock.now();
        match self.workers.read().get(worker_id) {
            Some(record) => record.status(now, self.alive_report_timeout),
            None => WorkerStatus::NotRegistered,
        }
    }

    pub fn is_registered(&self, worker_id: &WorkerId) -> bool {
        self.workers.read().contains_key(worker_id)
    }

    /// Ids of the workers that can currently be expected to pick up work, sorted.
    pub fn workers_in_working_condition(&self) -> Vec<WorkerId> {
        let now = self.clock.now();
        let workers = self.workers.read();
        let mut alive: Vec<_> = workers
            .iter()
            .filter(|(_, record)| {
                record.status(now, self.alive_report_timeout) == WorkerStatus::Alive
            })
            .map(|(worker_id, _)| worker_id.clone())
            .collect();
        alive.sort();
        alive
    }

    pub fn all_worker_states(&self) -> BTreeMap<WorkerId, WorkerAliveness> {
        let now = self.clock.now();
        self.workers
            .read()
            .iter()
            .map(|(worker_id, record)| (worker_id.clone(), self.aliveness_of(record, now)))
            .collect()
    }

    /// (Re-)registers a worker, forgetting whatever it was processing before.
    pub fn register(&self, worker_id: &WorkerId) -> Result<(), WorkerStateError> {
        let now = self.clock.now();
        let mut workers = self.workers.write();

        if let Some(record) = workers.get(worker_id) {
            if record.disabled {
                return Err(WorkerStateError::Blocked(worker_id.clone()));
            }
            tracing::info!(%worker_id, "worker re-registered");
        } else {
            tracing::info!(%worker_id, "worker registered");
        }

        workers.insert(worker_id.clone(), WorkerRecord::fresh(now));
        Ok(())
    }

    /// Records an "I'm alive" report. The reported buckets replace the known in-flight set.
    pub fn report_alive(
        &self,
        worker_id: &WorkerId,
        bucket_ids_being_processed: BTreeSet<BucketId>,
    ) -> Result<(), WorkerStateError> {
        let now = self.clock.now();
        let mut workers = self.workers.write();
        let record = workers
            .get_mut(worker_id)
            .ok_or_else(|| WorkerStateError::NotRegistered(worker_id.clone()))?;

        record.last_seen = now;
        record.bucket_ids_being_processed = bucket_ids_being_processed;

        tracing::trace!(
            %worker_id,
            in_flight = record.bucket_ids_being_processed.len(),
            "worker reported alive"
        );
        Ok(())
    }

    /// A worker asking for work is as good as an alive report.
    pub fn will_dequeue_bucket(&self, worker_id: &WorkerId) {
        let now = self.clock.now();
        if let Some(record) = self.workers.write().get_mut(worker_id) {
            record.last_seen = now;
        }
    }

    pub fn did_dequeue_bucket(&self, worker_id: &WorkerId, bucket_id: &BucketId) {
        if let Some(record) = self.workers.write().get_mut(worker_id) {
            record.bucket_ids_being_processed.insert(bucket_id.clone());
        }
    }

    pub fn did_finish_bucket(&self, worker_id: &WorkerId, bucket_id: &BucketId) {
        if let Some(record) = self.workers.write().get_mut(worker_id) {
            record.bucket_ids_being_processed.remove(bucket_id);
        }
    }

    pub fn enable(&self, worker_id: &WorkerId) -> Result<(), WorkerStateError> {
        let now = self.clock.now();
        let mut workers = self.workers.write();
        let record = workers
            .get_mut(worker_id)
            .ok_or_else(|| WorkerStateError::NotRegistered(worker_id.clone()))?;

        if !record.disabled {
            return Err(WorkerStateError::AlreadyEnabled(worker_id.clone()));
        }

        record.disabled = false;
        record.last_seen = now;
        tracing::info!(%worker_id, "worker enabled");
        Ok(())
    }

    pub fn disable(&self, worker_id: &WorkerId) -> Result<(), WorkerStateError> {
        let mut workers = self.workers.write();
        let record = workers
            .get_mut(worker_id)
            .ok_or_else(|| WorkerStateError::NotRegistered(worker_id.clone()))?;

        if record.disabled {
            return Err(WorkerStateError::AlreadyDisabled(worker_id.clone()));
        }

        record.disabled = true;
        tracing::info!(%worker_id, "worker disabled");
        Ok(())
    }

    /// Checks that a worker is in a state from which it can be started again.
    pub fn check_can_kickstart(&self, worker_id: &WorkerId) -> Result<(), WorkerStateError> {
        match self.status(worker_id) {
            WorkerStatus::Alive => Err(WorkerStateError::AlreadyAlive(worker_id.clone())),
            WorkerStatus::Blocked => Err(WorkerStateError::Blocked(worker_id.clone())),
            WorkerStatus::NotRegistered | WorkerStatus::Silent => Ok(()),
        }
    }

    fn aliveness_of(&self, record: &WorkerRecord, now: Instant) -> WorkerAliveness {
        WorkerAliveness {
            status: record.status(now, self.alive_report_timeout),
            bucket_ids_being_processed: record.bucket_ids_being_processed.clone(),
        }
    }
}
