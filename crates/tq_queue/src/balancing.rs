//! Routing of worker and client requests across the queues of every job.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tq_utils::net_protocol::buckets::{Bucket, BucketId, TestEntry};
use tq_utils::net_protocol::jobs::{
    Job, JobGroup, JobId, JobResults, JobState, PrioritizedJob, QueueState,
};
use tq_utils::net_protocol::queue::DequeueResult;
use tq_utils::net_protocol::results::{TestEntryResult, TestingResult};
use tq_utils::net_protocol::workers::{WorkerCapabilities, WorkerId};

use crate::bucket_queue::acceptor::BucketQueueAcceptResult;
use crate::bucket_queue::enqueuer::{validate_buckets, EnqueueError};
use crate::bucket_queue::stuck::StuckBucket;
use crate::bucket_queue::{BucketQueue, BucketQueueContext};
use crate::container::MultipleQueuesContainer;
use crate::holder::BucketQueueHolder;
use crate::job_queue::JobQueue;
use crate::metrics::QueueMetric;
use crate::nothing_to_dequeue::NothingToDequeueBehavior;
use crate::results_collector::ResultsCollector;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("no queue for job {0}")]
    NoQueue(JobId),
    #[error("no queue has bucket {bucket_id} dequeued by worker {worker_id}")]
    NoMatchingQueueFound {
        bucket_id: BucketId,
        worker_id: WorkerId,
    },
    #[error("job {0} is already deleted")]
    JobIsAlreadyDeleted(JobId),
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

/// A queue serving many jobs at once.
pub trait BalancingBucketQueue: Send + Sync {
    /// Enqueues `buckets` into the queue of the job, creating or reviving it as needed.
    fn enqueue(&self, buckets: Vec<Bucket>, prioritized_job: PrioritizedJob)
        -> Result<(), QueueError>;

    fn dequeue_bucket(
        &self,
        worker_capabilities: &WorkerCapabilities,
        worker_id: &WorkerId,
    ) -> DequeueResult;

    /// Accepts a result for a bucket, even if the bucket's job was deleted meanwhile.
    fn accept(
        &self,
        bucket_id: &BucketId,
        testing_result: TestingResult,
        worker_id: &WorkerId,
    ) -> Result<BucketQueueAcceptResult, QueueError>;

    fn delete(&self, job_id: &JobId) -> Result<(), QueueError>;

    fn state(&self, job_id: &JobId) -> Result<JobState, QueueError>;

    fn results(&self, job_id: &JobId) -> Result<JobResults, QueueError>;

    fn reenqueue_stuck_buckets(&self) -> Vec<StuckBucket>;

    fn running_job_ids(&self) -> Vec<JobId>;

    fn all_job_states(&self) -> Vec<JobState>;

    fn running_job_groups(&self) -> Vec<JobGroup>;
}

pub struct MultipleJobsBucketQueue {
    container: MultipleQueuesContainer,
    ctx: BucketQueueContext,
    nothing_to_dequeue: Arc<dyn NothingToDequeueBehavior>,
}

static_assertions::assert_impl_all!(MultipleJobsBucketQueue: Send, Sync);

impl MultipleJobsBucketQueue {
    pub fn new(
        ctx: BucketQueueContext,
        nothing_to_dequeue: Arc<dyn NothingToDequeueBehavior>,
    ) -> Self {
        Self {
            container: Default::default(),
            ctx,
            nothing_to_dequeue,
        }
    }

    fn running_state(job_queue: &JobQueue) -> JobState {
        JobState {
            job_id: job_queue.job.job_id.clone(),
            queue_state: QueueState::Running(job_queue.bucket_queue.running_queue_state()),
        }
    }

    fn deleted_state(job_queue: &JobQueue) -> JobState {
        JobState {
            job_id: job_queue.job.job_id.clone(),
            queue_state: QueueState::Deleted,
        }
    }
}

/// Results for the entries of the accepted bucket that were held back for a retry.
fn retried_results_as_final(
    accepted: &BucketQueueAcceptResult,
    reported_results: Vec<TestEntryResult>,
) -> Vec<TestEntryResult> {
    let collected: HashSet<&TestEntry> = accepted
        .testing_result_to_collect
        .unfiltered_results
        .iter()
        .map(|result| &result.test_entry)
        .collect();

    accepted
        .dequeued_bucket
        .bucket()
        .test_entries
        .iter()
        .filter(|entry| !collected.contains(entry))
        .map(|entry| {
            reported_results
                .iter()
                .find(|result| &result.test_entry == entry)
                .cloned()
                .unwrap_or_else(|| TestEntryResult::lost(entry.clone()))
        })
        .collect()
}

impl BalancingBucketQueue for MultipleJobsBucketQueue {
    fn enqueue(
        &self,
        buckets: Vec<Bucket>,
        prioritized_job: PrioritizedJob,
    ) -> Result<(), QueueError> {
        let job_id = prioritized_job.job_id.clone();

        self.container.perform_with_exclusive_access(|state| {
            if let Some(job_queue) = state.running_queue(&job_id) {
                return Ok(job_queue.bucket_queue.enqueue(buckets)?);
            }

            // Nothing changes for a job whose buckets are rejected.
            validate_buckets(&self.ctx, &job_id, &buckets)?;

            let now = self.ctx.clock.epoch_now();
            let (holder, results_collector) = match state.take_deleted_queue(&job_id) {
                Some(deleted) => {
                    let dropped = deleted.bucket_queue.holder().remove_all_enqueued_buckets();
                    tracing::info!(%job_id, dropped, "reviving deleted job");
                    (
                        Arc::clone(deleted.bucket_queue.holder()),
                        deleted.results_collector,
                    )
                }
                None => {
                    tracing::info!(%job_id, "creating job");
                    (
                        Arc::new(BucketQueueHolder::default()),
                        Arc::new(ResultsCollector::default()),
                    )
                }
            };

            let job_group = state.track_job_group(&prioritized_job, now);
            let job_queue = JobQueue {
                job: Job {
                    job_id: job_id.clone(),
                    priority: prioritized_job.job_priority,
                    creation_time: now,
                },
                job_group,
                bucket_queue: BucketQueue::new(job_id.clone(), holder, self.ctx.clone()),
                results_collector,
            };
            job_queue.bucket_queue.enqueue_validated(buckets);
            state.add_running_queue(job_queue);

            self.ctx.metrics.record(QueueMetric::JobCreated {
                job_id: job_id.clone(),
            });

            Ok(())
        })
    }

    fn dequeue_bucket(
        &self,
        worker_capabilities: &WorkerCapabilities,
        worker_id: &WorkerId,
    ) -> DequeueResult {
        if !self.ctx.aliveness.is_registered(worker_id) {
            return DequeueResult::WorkerIsNotRegistered;
        }

        self.ctx.aliveness.will_dequeue_bucket(worker_id);
        self.ctx
            .capabilities
            .set_worker_capabilities(worker_id, worker_capabilities.clone());

        self.container.perform_with_exclusive_access(|state| {
            let mut dequeue_results = vec![];

            for job_queue in state.running_queues_in_dequeue_order() {
                match job_queue
                    .bucket_queue
                    .dequeue_result(worker_capabilities, worker_id)
                {
                    result @ (DequeueResult::DequeuedBucket(_)
                    | DequeueResult::WorkerIsNotRegistered) => return result,
                    result => dequeue_results.push(result),
                }
            }

            self.nothing_to_dequeue
                .dequeue_result_when_no_buckets_to_dequeue_available(&dequeue_results)
        })
    }

    fn accept(
        &self,
        bucket_id: &BucketId,
        testing_result: TestingResult,
        worker_id: &WorkerId,
    ) -> Result<BucketQueueAcceptResult, QueueError> {
        let no_matching_queue = || QueueError::NoMatchingQueueFound {
            bucket_id: bucket_id.clone(),
            worker_id: worker_id.clone(),
        };

        self.container.perform_with_exclusive_access(|state| {
            let holds_bucket = |job_queue: &&JobQueue| {
                job_queue
                    .bucket_queue
                    .holder()
                    .contains_dequeued_bucket(bucket_id, worker_id)
            };

            let (job_queue, is_deleted) =
                match state.running_queues().iter().find(holds_bucket) {
                    Some(job_queue) => (job_queue, false),
                    None => match state.deleted_queues().iter().find(holds_bucket) {
                        Some(job_queue) => (job_queue, true),
                        None => return Err(no_matching_queue()),
                    },
                };

            let reported_results = testing_result.unfiltered_results.clone();
            let mut accepted = job_queue
                .bucket_queue
                .accept(bucket_id, testing_result, worker_id)
                .map_err(|_| no_matching_queue())?;

            if is_deleted {
                // Retries of a deleted job never run, so their results are final.
                let dropped = job_queue.bucket_queue.holder().remove_all_enqueued_buckets();
                let final_results = retried_results_as_final(&accepted, reported_results);
                accepted
                    .testing_result_to_collect
                    .unfiltered_results
                    .extend(final_results);
                tracing::debug!(
                    job_id = %job_queue.job.job_id,
                    %bucket_id,
                    dropped,
                    "accepted late result of deleted job"
                );
            }

            job_queue
                .results_collector
                .append(accepted.testing_result_to_collect.clone());

            Ok(accepted)
        })
    }

    fn delete(&self, job_id: &JobId) -> Result<(), QueueError> {
        self.container.perform_with_exclusive_access(|state| {
            if state.running_queue(job_id).is_none() {
                return match state.deleted_queue(job_id) {
                    Some(_) => Err(QueueError::JobIsAlreadyDeleted(job_id.clone())),
                    None => Err(QueueError::NoQueue(job_id.clone())),
                };
            }

            let job_queue = state
                .move_to_deleted(job_id)
                .ok_or_else(|| QueueError::NoQueue(job_id.clone()))?;

            let dropped = job_queue.bucket_queue.holder().remove_all_enqueued_buckets();
            let duration = self
                .ctx
                .clock
                .epoch_now()
                .saturating_duration_since(job_queue.job.creation_time);

            tracing::info!(%job_id, dropped, ?duration, "deleted job");
            self.ctx.metrics.record(QueueMetric::JobDeleted {
                job_id: job_id.clone(),
            });
            self.ctx.metrics.record(QueueMetric::JobProcessingDuration {
                job_id: job_id.clone(),
                duration,
            });
            Ok(())
        })
    }

    fn state(&self, job_id: &JobId) -> Result<JobState, QueueError> {
        self.container.perform_with_exclusive_access(|state| {
            if let Some(job_queue) = state.running_queue(job_id) {
                Ok(Self::running_state(job_queue))
            } else if let Some(job_queue) = state.deleted_queue(job_id) {
                Ok(Self::deleted_state(job_queue))
            } else {
                Err(QueueError::NoQueue(job_id.clone()))
            }
        })
    }

    fn results(&self, job_id: &JobId) -> Result<JobResults, QueueError> {
        self.container.perform_with_exclusive_access(|state| {
            let job_queue = state
                .running_queue(job_id)
                .or_else(|| state.deleted_queue(job_id))
                .ok_or_else(|| QueueError::NoQueue(job_id.clone()))?;

            Ok(JobResults {
                job_id: job_id.clone(),
                testing_results: job_queue.results_collector.collected_results(),
            })
        })
    }

    fn reenqueue_stuck_buckets(&self) -> Vec<StuckBucket> {
        self.container.perform_with_exclusive_access(|state| {
            state
                .running_queues()
                .iter()
                .flat_map(|job_queue| job_queue.bucket_queue.reenqueue_stuck_buckets())
                .collect()
        })
    }

    fn running_job_ids(&self) -> Vec<JobId> {
        self.container.perform_with_exclusive_access(|state| {
            state
                .running_queues_in_dequeue_order()
                .into_iter()
                .map(|job_queue| job_queue.job.job_id.clone())
                .collect()
        })
    }

    fn all_job_states(&self) -> Vec<JobState> {
        self.container.perform_with_exclusive_access(|state| {
            let running = state.running_queues().iter().map(Self::running_state);
            let deleted = state.deleted_queues().iter().map(Self::deleted_state);
            running.chain(deleted).collect()
        })
    }

    fn running_job_groups(&self) -> Vec<JobGroup> {
        self.container
            .perform_with_exclusive_access(|state| state.running_job_groups())
    }
}
