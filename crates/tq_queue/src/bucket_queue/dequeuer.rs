use tq_utils::illegal_state;
use tq_utils::net_protocol::buckets::DequeuedBucket;
use tq_utils::net_protocol::queue::DequeueResult;
use tq_utils::net_protocol::workers::{WorkerCapabilities, WorkerId, WorkerStatus};

use crate::capabilities::requirements_are_satisfied;
use crate::metrics::QueueMetric;

use super::BucketQueue;

impl BucketQueue {
    /// Hands the next eligible bucket to `worker_id`, if there is one it may run.
    ///
    /// When the bucket picked by test history needs capabilities the worker lacks, nothing is
    /// handed out on this call, even if a later bucket would fit.
    pub fn dequeue_bucket(
        &self,
        worker_capabilities: &WorkerCapabilities,
        worker_id: &WorkerId,
    ) -> Option<DequeuedBucket> {
        let aliveness = &self.ctx.aliveness;

        aliveness.will_dequeue_bucket(worker_id);
        self.ctx
            .capabilities
            .set_worker_capabilities(worker_id, worker_capabilities.clone());

        if aliveness.status(worker_id) != WorkerStatus::Alive {
            return None;
        }

        self.holder.perform_with_exclusive_access(|| {
            let enqueued_buckets = self.holder.all_enqueued_buckets();
            let workers_in_working_condition = aliveness.workers_in_working_condition();

            let candidate = self.ctx.history.bucket_to_dequeue(
                worker_id,
                &enqueued_buckets,
                &workers_in_working_condition,
            )?;

            if !requirements_are_satisfied(
                &candidate.bucket.worker_capability_requirements,
                worker_capabilities,
            ) {
                tracing::debug!(
                    %worker_id,
                    bucket_id = %candidate.bucket.bucket_id,
                    "worker lacks capabilities for the next bucket"
                );
                return None;
            }

            let dequeued_bucket = DequeuedBucket {
                enqueued_bucket: candidate,
                worker_id: worker_id.clone(),
            };

            if !self
                .holder
                .replace_previously_enqueued_bucket(dequeued_bucket.clone())
            {
                illegal_state!(
                    "picked bucket is not enqueued",
                    bucket_id = %dequeued_bucket.bucket_id()
                );
                return None;
            }

            aliveness.did_dequeue_bucket(worker_id, dequeued_bucket.bucket_id());

            tracing::debug!(
                job_id = %self.job_id,
                %worker_id,
                bucket_id = %dequeued_bucket.bucket_id(),
                "dequeued bucket"
            );
            self.ctx.metrics.record(QueueMetric::BucketDequeued {
                job_id: self.job_id.clone(),
                worker_id: worker_id.clone(),
            });

            Some(dequeued_bucket)
        })
    }

    /// Like [BucketQueue::dequeue_bucket], but says why nothing was handed out.
    pub fn dequeue_result(
        &self,
        worker_capabilities: &WorkerCapabilities,
        worker_id: &WorkerId,
    ) -> DequeueResult {
        if !self.ctx.aliveness.is_registered(worker_id) {
            return DequeueResult::WorkerIsNotRegistered;
        }

        match self.dequeue_bucket(worker_capabilities, worker_id) {
            Some(dequeued_bucket) => DequeueResult::DequeuedBucket(dequeued_bucket),
            None if self.holder.is_depleted() => DequeueResult::QueueIsEmpty,
            None => DequeueResult::CheckAgainLater {
                after: self.ctx.check_again_after,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use tq_run_n_times::n_times;
    use tq_test_utils::{
        all_failed, bucket, bucket_with_retries, capability, with_requirement, worker,
    };
    use tq_utils::net_protocol::buckets::BucketId;
    use tq_utils::net_protocol::queue::DequeueResult;
    use tq_utils::net_protocol::workers::WorkerCapabilityConstraint;

    use crate::bucket_queue::test_utils::{TestEnv, CHECK_AGAIN_AFTER};

    #[test]
    fn dequeues_in_order_and_tracks_in_flight() {
        let env = TestEnv::new();
        env.register("w1");
        let queue = env.queue("job");
        queue
            .enqueue(vec![bucket("a", &["t1"]), bucket("b", &["t2"])])
            .unwrap();

        let dequeued = queue.dequeue_bucket(&Default::default(), &worker("w1")).unwrap();

        assert_eq!(dequeued.bucket_id(), &BucketId::from("a"));
        assert_eq!(dequeued.worker_id, worker("w1"));
        assert_eq!(queue.holder().enqueued_count(), 1);
        assert_eq!(queue.holder().dequeued_count(), 1);
        assert!(env
            .ctx
            .aliveness
            .aliveness(&worker("w1"))
            .bucket_ids_being_processed
            .contains(&BucketId::from("a")));
    }

    #[test]
    fn unregistered_worker_gets_nothing() {
        let env = TestEnv::new();
        let queue = env.queue("job");
        queue.enqueue(vec![bucket("a", &["t1"])]).unwrap();

        assert_eq!(
            queue.dequeue_result(&Default::default(), &worker("w1")),
            DequeueResult::WorkerIsNotRegistered
        );
        assert_eq!(queue.dequeue_bucket(&Default::default(), &worker("w1")), None);
        assert_eq!(queue.holder().enqueued_count(), 1);
    }

    #[test]
    fn blocked_worker_gets_nothing() {
        let env = TestEnv::new();
        env.register("w1");
        env.ctx.aliveness.disable(&worker("w1")).unwrap();
        let queue = env.queue("job");
        queue.enqueue(vec![bucket("a", &["t1"])]).unwrap();

        assert_eq!(queue.dequeue_bucket(&Default::default(), &worker("w1")), None);
        assert_eq!(
            queue.dequeue_result(&Default::default(), &worker("w1")),
            DequeueResult::CheckAgainLater {
                after: CHECK_AGAIN_AFTER
            }
        );
    }

    #[test]
    fn silent_worker_is_revived_by_dequeueing() {
        let env = TestEnv::new();
        env.register("w1");
        env.silence_workers();
        let queue = env.queue("job");
        queue.enqueue(vec![bucket("a", &["t1"])]).unwrap();

        assert!(queue.dequeue_bucket(&Default::default(), &worker("w1")).is_some());
    }

    #[test]
    fn dequeue_results() {
        let env = TestEnv::new();
        env.register("w1");
        let queue = env.queue("job");

        assert_eq!(
            queue.dequeue_result(&Default::default(), &worker("w1")),
            DequeueResult::QueueIsEmpty
        );

        queue.enqueue(vec![bucket("a", &["t1"])]).unwrap();
        assert!(matches!(
            queue.dequeue_result(&Default::default(), &worker("w1")),
            DequeueResult::DequeuedBucket(_)
        ));

        // The bucket is executing, so the queue is not done yet.
        assert_eq!(
            queue.dequeue_result(&Default::default(), &worker("w1")),
            DequeueResult::CheckAgainLater {
                after: CHECK_AGAIN_AFTER
            }
        );
    }

    #[test]
    fn capability_mismatch_on_front_bucket_hands_out_nothing() {
        let env = TestEnv::new();
        let queue = env.queue("job");
        let needs_gpu = with_requirement(
            bucket("a", &["t1"]),
            "gpu",
            WorkerCapabilityConstraint::Present,
        );
        // Enqueued before any worker is up, so nothing validates the requirement.
        queue
            .enqueue(vec![needs_gpu, bucket("b", &["t2"])])
            .unwrap();
        env.register("w1");

        // "b" would fit, but is not considered.
        assert_eq!(queue.dequeue_bucket(&Default::default(), &worker("w1")), None);
        assert_eq!(queue.holder().enqueued_count(), 2);

        let gpu = [capability("gpu", "1")].into_iter().collect();
        let dequeued = queue.dequeue_bucket(&gpu, &worker("w1")).unwrap();
        assert_eq!(dequeued.bucket_id(), &BucketId::from("a"));
    }

    #[test]
    fn dequeue_records_declared_capabilities() {
        let env = TestEnv::new();
        env.register("w1");
        let queue = env.queue("job");

        let caps = [capability("os", "16")].into_iter().collect();
        queue.dequeue_bucket(&caps, &worker("w1"));

        assert_eq!(env.ctx.capabilities.worker_capabilities(&worker("w1")), caps);
    }

    #[test]
    fn worker_that_failed_a_bucket_waits_for_others() {
        let env = TestEnv::new();
        env.register("w1");
        env.register("w2");
        let queue = env.queue("job");
        let retried = bucket_with_retries("a", &["t1"], 1);
        queue.enqueue(vec![retried.clone()]).unwrap();

        let dequeued = queue.dequeue_bucket(&Default::default(), &worker("w1")).unwrap();
        queue
            .accept(dequeued.bucket_id(), all_failed(&retried), &worker("w1"))
            .unwrap();

        assert_eq!(queue.holder().enqueued_count(), 1);
        assert_eq!(queue.dequeue_bucket(&Default::default(), &worker("w1")), None);
        assert!(queue.dequeue_bucket(&Default::default(), &worker("w2")).is_some());
    }

    #[test]
    #[n_times(50)]
    fn at_most_one_worker_dequeues_each_bucket() {
        let env = TestEnv::new();
        let workers: Vec<_> = (0..8).map(|i| format!("w{i}")).collect();
        for w in &workers {
            env.register(w);
        }
        let queue = Arc::new(env.queue("job"));
        queue
            .enqueue(
                (0..4)
                    .map(|i| bucket(&format!("b{i}"), &[format!("t{i}").as_str()]))
                    .collect(),
            )
            .unwrap();

        let handles: Vec<_> = workers
            .into_iter()
            .map(|w| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.dequeue_bucket(&Default::default(), &worker(&w)))
            })
            .collect();

        let dequeued: Vec<_> = handles
            .into_iter()
            .filter_map(|handle| handle.join().unwrap())
            .collect();

        let unique: HashSet<_> = dequeued.iter().map(|d| d.bucket_id().clone()).collect();
        assert_eq!(dequeued.len(), 4);
        assert_eq!(unique.len(), 4);
        assert_eq!(queue.holder().enqueued_count(), 0);
        assert_eq!(queue.holder().dequeued_count(), 4);
    }
}
