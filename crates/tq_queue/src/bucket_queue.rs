//! The queue of a single job.
//!
//! [BucketQueue] is split across submodules by role: enqueueing, dequeueing, accepting
//! results, and reclaiming buckets from workers that stopped working on them.

pub mod acceptor;
pub mod dequeuer;
pub mod enqueuer;
pub mod stuck;

#[cfg(test)]
pub(crate) mod test_utils;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tq_utils::net_protocol::jobs::{JobId, RunningQueueState};
use tq_utils::time::Clock;

use crate::aliveness::WorkerAlivenessProvider;
use crate::capabilities::WorkerCapabilitiesStorage;
use crate::history::TestHistoryTracker;
use crate::holder::BucketQueueHolder;
use crate::metrics::MetricRecorder;

/// Collaborators shared by the queues of every job.
#[derive(Clone)]
pub struct BucketQueueContext {
    pub aliveness: Arc<WorkerAlivenessProvider>,
    pub capabilities: Arc<WorkerCapabilitiesStorage>,
    pub history: TestHistoryTracker,
    pub metrics: Arc<dyn MetricRecorder>,
    pub clock: Arc<dyn Clock>,
    /// What workers are told to wait when nothing is available for them yet.
    pub check_again_after: Duration,
}

pub struct BucketQueue {
    job_id: JobId,
    holder: Arc<BucketQueueHolder>,
    ctx: BucketQueueContext,
}

impl BucketQueue {
    pub fn new(job_id: JobId, holder: Arc<BucketQueueHolder>, ctx: BucketQueueContext) -> Self {
        Self {
            job_id,
            holder,
            ctx,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn holder(&self) -> &Arc<BucketQueueHolder> {
        &self.holder
    }

    pub fn running_queue_state(&self) -> RunningQueueState {
        let (enqueued, dequeued) = self.holder.perform_with_exclusive_access(|| {
            (
                self.holder.all_enqueued_buckets(),
                self.holder.all_dequeued_buckets(),
            )
        });

        let enqueued_tests = enqueued
            .iter()
            .flat_map(|enqueued| &enqueued.bucket.test_entries)
            .map(|entry| entry.test_name.clone())
            .collect();

        let mut dequeued_tests: BTreeMap<_, Vec<_>> = BTreeMap::new();
        for dequeued in &dequeued {
            dequeued_tests
                .entry(dequeued.worker_id.clone())
                .or_default()
                .extend(
                    dequeued
                        .bucket()
                        .test_entries
                        .iter()
                        .map(|entry| entry.test_name.clone()),
                );
        }

        RunningQueueState {
            enqueued_bucket_count: enqueued.len(),
            enqueued_tests,
            dequeued_bucket_count: dequeued.len(),
            dequeued_tests,
        }
    }
}
