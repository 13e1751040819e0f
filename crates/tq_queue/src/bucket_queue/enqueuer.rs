use thiserror::Error;
use tq_utils::net_protocol::buckets::{Bucket, BucketId, EnqueuedBucket};
use tq_utils::net_protocol::jobs::JobId;

use crate::capabilities::requirements_are_satisfied;
use crate::metrics::QueueMetric;

use super::{BucketQueue, BucketQueueContext};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("buckets {bucket_ids:?} of job {job_id} require capabilities no alive worker has")]
    UnsatisfiableRequirements {
        job_id: JobId,
        bucket_ids: Vec<BucketId>,
    },
}

impl BucketQueue {
    /// Enqueues all of `buckets`, or none of them if any cannot be run by the current fleet.
    pub fn enqueue(&self, buckets: Vec<Bucket>) -> Result<(), EnqueueError> {
        validate_buckets(&self.ctx, &self.job_id, &buckets)?;
        self.enqueue_validated(buckets);
        Ok(())
    }

    /// Enqueues `buckets` that already passed [validate_buckets].
    pub(crate) fn enqueue_validated(&self, buckets: Vec<Bucket>) {
        if buckets.is_empty() {
            return;
        }

        let count = buckets.len();
        let now = self.ctx.clock.epoch_now();
        let enqueued_buckets = buckets
            .into_iter()
            .map(|bucket| EnqueuedBucket::new(bucket, now))
            .collect();

        // New buckets go right behind the front one.
        self.holder.perform_with_exclusive_access(|| {
            let position = self.holder.enqueued_count().min(1);
            self.holder.insert(enqueued_buckets, position);
        });

        tracing::debug!(job_id = %self.job_id, count, "enqueued buckets");
        self.ctx.metrics.record(QueueMetric::BucketsEnqueued {
            job_id: self.job_id.clone(),
            count,
        });
    }
}

/// Checks that some worker in working condition can run each of `buckets`.
/// Passes trivially while no worker is in working condition.
pub(crate) fn validate_buckets(
    ctx: &BucketQueueContext,
    job_id: &JobId,
    buckets: &[Bucket],
) -> Result<(), EnqueueError> {
    let workers = ctx.aliveness.workers_in_working_condition();
    if workers.is_empty() {
        return Ok(());
    }

    let fleet_capabilities: Vec<_> = workers
        .iter()
        .map(|worker_id| ctx.capabilities.worker_capabilities(worker_id))
        .collect();

    let bucket_ids: Vec<_> = buckets
        .iter()
        .filter(|bucket| {
            !fleet_capabilities.iter().any(|capabilities| {
                requirements_are_satisfied(&bucket.worker_capability_requirements, capabilities)
            })
        })
        .map(|bucket| bucket.bucket_id.clone())
        .collect();

    if bucket_ids.is_empty() {
        Ok(())
    } else {
        Err(EnqueueError::UnsatisfiableRequirements {
            job_id: job_id.clone(),
            bucket_ids,
        })
    }
}
