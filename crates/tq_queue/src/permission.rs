//! Gating of which workers may take buckets at all.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::RwLock;
use tq_utils::atomic;
use tq_utils::net_protocol::buckets::{Bucket, BucketId};
use tq_utils::net_protocol::jobs::{JobGroup, JobId, JobResults, JobState, PrioritizedJob};
use tq_utils::net_protocol::queue::DequeueResult;
use tq_utils::net_protocol::results::TestingResult;
use tq_utils::net_protocol::workers::{WorkerCapabilities, WorkerId};

use crate::balancing::{BalancingBucketQueue, QueueError};
use crate::bucket_queue::acceptor::BucketQueueAcceptResult;
use crate::bucket_queue::stuck::StuckBucket;
use crate::nothing_to_dequeue::NothingToDequeueBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerUtilizationPermission {
    AllowedToUtilize,
    NotAllowedToUtilize,
}

pub trait WorkerPermissionProvider: Send + Sync {
    fn utilization_permission(&self, worker_id: &WorkerId) -> WorkerUtilizationPermission;
}

/// Permissions for a pool of workers that may be shared with other tenants.
///
/// While sharing is off every worker may be utilized. While it is on, only the workers in
/// the utilizable set may.
#[derive(Debug, Default)]
pub struct SharedWorkerPermissionProvider {
    sharing_enabled: AtomicBool,
    utilizable_workers: RwLock<HashSet<WorkerId>>,
}

impl SharedWorkerPermissionProvider {
    pub fn toggle_worker_sharing(&self, enabled: bool) {
        let was_enabled = self.sharing_enabled.swap(enabled, atomic::ORDERING);
        if was_enabled != enabled {
            tracing::info!(enabled, "toggled worker sharing");
        }
    }

    pub fn is_sharing_enabled(&self) -> bool {
        self.sharing_enabled.load(atomic::ORDERING)
    }

    pub fn set_utilizable_workers(&self, workers: impl IntoIterator<Item = WorkerId>) {
        *self.utilizable_workers.write() = workers.into_iter().collect();
    }
}

impl WorkerPermissionProvider for SharedWorkerPermissionProvider {
    fn utilization_permission(&self, worker_id: &WorkerId) -> WorkerUtilizationPermission {
        if !self.is_sharing_enabled() || self.utilizable_workers.read().contains(worker_id) {
            WorkerUtilizationPermission::AllowedToUtilize
        } else {
            WorkerUtilizationPermission::NotAllowedToUtilize
        }
    }
}

/// A [BalancingBucketQueue] that hands nothing to workers it is not allowed to utilize.
pub struct WorkerPermissionAwareQueue<Q> {
    inner: Q,
    permissions: Arc<dyn WorkerPermissionProvider>,
    nothing_to_dequeue: Arc<dyn NothingToDequeueBehavior>,
}

impl<Q: BalancingBucketQueue> WorkerPermissionAwareQueue<Q> {
    pub fn new(
        inner: Q,
        permissions: Arc<dyn WorkerPermissionProvider>,
        nothing_to_dequeue: Arc<dyn NothingToDequeueBehavior>,
    ) -> Self {
        Self {
            inner,
            permissions,
            nothing_to_dequeue,
        }
    }
}

impl<Q: BalancingBucketQueue> BalancingBucketQueue for WorkerPermissionAwareQueue<Q> {
    fn enqueue(
        &self,
        buckets: Vec<Bucket>,
        prioritized_job: PrioritizedJob,
    ) -> Result<(), QueueError> {
        self.inner.enqueue(buckets, prioritized_job)
    }

    fn dequeue_bucket(
        &self,
        worker_capabilities: &WorkerCapabilities,
        worker_id: &WorkerId,
    ) -> DequeueResult {
        match self.permissions.utilization_permission(worker_id) {
            WorkerUtilizationPermission::AllowedToUtilize => {
                self.inner.dequeue_bucket(worker_capabilities, worker_id)
            }
            WorkerUtilizationPermission::NotAllowedToUtilize => {
                tracing::debug!(%worker_id, "worker is not allowed to be utilized");
                self.nothing_to_dequeue
                    .dequeue_result_when_no_buckets_to_dequeue_available(&[])
            }
        }
    }

    fn accept(
        &self,
        bucket_id: &BucketId,
        testing_result: TestingResult,
        worker_id: &WorkerId,
    ) -> Result<BucketQueueAcceptResult, QueueError> {
        self.inner.accept(bucket_id, testing_result, worker_id)
    }

    fn delete(&self, job_id: &JobId) -> Result<(), QueueError> {
        self.inner.delete(job_id)
    }

    fn state(&self, job_id: &JobId) -> Result<JobState, QueueError> {
        self.inner.state(job_id)
    }

    fn results(&self, job_id: &JobId) -> Result<JobResults, QueueError> {
        self.inner.results(job_id)
    }

    fn reenqueue_stuck_buckets(&self) -> Vec<StuckBucket> {
        self.inner.reenqueue_stuck_buckets()
    }

    fn running_job_ids(&self) -> Vec<JobId> {
        self.inner.running_job_ids()
    }

    fn all_job_states(&self) -> Vec<JobState> {
        self.inner.all_job_states()
    }

    fn running_job_groups(&self) -> Vec<JobGroup> {
        self.inner.running_job_groups()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tq_test_utils::{all_passed, bucket, job_id, prioritized_job, worker};
    use tq_utils::net_protocol::queue::DequeueResult;

    use crate::balancing::{BalancingBucketQueue, MultipleJobsBucketQueue};
    use crate::bucket_queue::test_utils::{TestEnv, CHECK_AGAIN_AFTER};
    use crate::nothing_to_dequeue::WaitForAllQueuesToDeplete;

    use super::{
        SharedWorkerPermissionProvider, WorkerPermissionAwareQueue, WorkerPermissionProvider,
        WorkerUtilizationPermission,
    };

    fn permission_aware_queue(
        env: &TestEnv,
        permissions: Arc<SharedWorkerPermissionProvider>,
    ) -> WorkerPermissionAwareQueue<MultipleJobsBucketQueue> {
        let nothing_to_dequeue = Arc::new(WaitForAllQueuesToDeplete {
            check_after: CHECK_AGAIN_AFTER,
        });
        WorkerPermissionAwareQueue::new(
            MultipleJobsBucketQueue::new(env.ctx.clone(), nothing_to_dequeue.clone()),
            permissions,
            nothing_to_dequeue,
        )
    }

    #[test]
    fn every_worker_is_allowed_without_sharing() {
        let permissions = SharedWorkerPermissionProvider::default();

        assert!(!permissions.is_sharing_enabled());
        assert_eq!(
            permissions.utilization_permission(&worker("w1")),
            WorkerUtilizationPermission::AllowedToUtilize
        );
    }

    #[test]
    fn only_utilizable_workers_are_allowed_with_sharing() {
        let permissions = SharedWorkerPermissionProvider::default();
        permissions.toggle_worker_sharing(true);
        permissions.set_utilizable_workers([worker("w1")]);

        assert_eq!(
            permissions.utilization_permission(&worker("w1")),
            WorkerUtilizationPermission::AllowedToUtilize
        );
        assert_eq!(
            permissions.utilization_permission(&worker("w2")),
            WorkerUtilizationPermission::NotAllowedToUtilize
        );

        permissions.toggle_worker_sharing(false);
        assert_eq!(
            permissions.utilization_permission(&worker("w2")),
            WorkerUtilizationPermission::AllowedToUtilize
        );
    }

    #[test]
    fn disallowed_worker_gets_nothing() {
        let env = TestEnv::new();
        env.register("w1");
        let permissions = Arc::new(SharedWorkerPermissionProvider::default());
        permissions.toggle_worker_sharing(true);
        let queue = permission_aware_queue(&env, permissions.clone());
        queue
            .enqueue(vec![bucket("a", &["t1"])], prioritized_job("job"))
            .unwrap();

        assert_eq!(
            queue.dequeue_bucket(&Default::default(), &worker("w1")),
            DequeueResult::CheckAgainLater {
                after: CHECK_AGAIN_AFTER
            }
        );

        permissions.set_utilizable_workers([worker("w1")]);
        assert!(matches!(
            queue.dequeue_bucket(&Default::default(), &worker("w1")),
            DequeueResult::DequeuedBucket(_)
        ));
    }

    #[test]
    fn everything_else_passes_through() {
        let env = TestEnv::new();
        env.register("w1");
        let queue = permission_aware_queue(&env, Arc::default());
        let b = bucket("a", &["t1"]);
        queue
            .enqueue(vec![b.clone()], prioritized_job("job"))
            .unwrap();
        queue.dequeue_bucket(&Default::default(), &worker("w1"));

        queue
            .accept(&b.bucket_id, all_passed(&b), &worker("w1"))
            .unwrap();

        assert_eq!(queue.running_job_ids(), vec![job_id("job")]);
        assert_eq!(
            queue.results(&job_id("job")).unwrap().testing_results,
            vec![all_passed(&b)]
        );
        queue.delete(&job_id("job")).unwrap();
        assert!(queue.running_job_ids().is_empty());
        assert!(queue.running_job_groups().is_empty());
        assert!(queue.reenqueue_stuck_buckets().is_empty());
    }
}
