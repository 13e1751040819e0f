use tq_utils::illegal_state;
use tq_utils::net_protocol::buckets::Bucket;
use tq_utils::net_protocol::workers::{WorkerId, WorkerStatus};

use crate::metrics::QueueMetric;

use super::BucketQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckBucketReason {
    /// The worker is alive but no longer says it is processing the bucket.
    BucketLost,
    WorkerIsSilent,
    WorkerIsNotRegistered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StuckBucket {
    pub reason: StuckBucketReason,
    pub bucket: Bucket,
    pub worker_id: WorkerId,
}

impl BucketQueue {
    /// Takes back buckets from workers that are no longer working on them, and reenqueues
    /// their tests one bucket per test.
    pub fn reenqueue_stuck_buckets(&self) -> Vec<StuckBucket> {
        let stuck_buckets = self.holder.perform_with_exclusive_access(|| {
            let mut stuck_buckets = vec![];

            for dequeued_bucket in self.holder.all_dequeued_buckets() {
                let worker_id = &dequeued_bucket.worker_id;
                let bucket_id = dequeued_bucket.bucket_id();
                let aliveness = self.ctx.aliveness.aliveness(worker_id);

                let reason = match aliveness.status {
                    WorkerStatus::Alive
                        if aliveness.bucket_ids_being_processed.contains(bucket_id) =>
                    {
                        continue
                    }
                    WorkerStatus::Alive => StuckBucketReason::BucketLost,
                    WorkerStatus::Silent => StuckBucketReason::WorkerIsSilent,
                    WorkerStatus::Blocked => continue,
                    WorkerStatus::NotRegistered => {
                        illegal_state!(
                            "bucket is dequeued by a worker that is not registered",
                            %worker_id,
                            %bucket_id
                        );
                        StuckBucketReason::WorkerIsNotRegistered
                    }
                };

                let bucket = dequeued_bucket.bucket();
                let replacements = bucket.split_by_test_entry();
                let replacement_ids: Vec<_> = replacements
                    .iter()
                    .map(|replacement| replacement.bucket_id.clone())
                    .collect();

                self.ctx
                    .history
                    .will_reenqueue_previously_failed_tests(&bucket.bucket_id, &replacement_ids);

                if let Err(error) = self.enqueue(replacements) {
                    tracing::warn!(
                        job_id = %self.job_id,
                        %bucket_id,
                        %worker_id,
                        %error,
                        "could not reenqueue stuck bucket, will try again later"
                    );
                    continue;
                }

                self.holder.remove(&dequeued_bucket);
                self.ctx.aliveness.did_finish_bucket(worker_id, bucket_id);

                tracing::info!(
                    job_id = %self.job_id,
                    %bucket_id,
                    %worker_id,
                    ?reason,
                    "reenqueued stuck bucket"
                );
                stuck_buckets.push(StuckBucket {
                    reason,
                    bucket: bucket.clone(),
                    worker_id: worker_id.clone(),
                });
            }

            stuck_buckets
        });

        if !stuck_buckets.is_empty() {
            self.ctx.metrics.record(QueueMetric::StuckBucketsReenqueued {
                job_id: self.job_id.clone(),
                count: stuck_buckets.len(),
            });
        }

        stuck_buckets
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use tq_test_utils::{bucket, capability, test_entry, with_requirement, worker};
    use tq_utils::net_protocol::buckets::BucketId;
    use tq_utils::net_protocol::workers::WorkerCapabilityConstraint;
    use tracing_test::traced_test;

    use crate::bucket_queue::test_utils::TestEnv;
    use crate::bucket_queue::BucketQueue;
    use crate::metrics::QueueMetric;

    use super::{StuckBucket, StuckBucketReason};

    #[test]
    fn bucket_of_alive_worker_is_not_stuck() {
        let env = TestEnv::new();
        env.register("w1");
        let queue = env.queue("job");
        queue.enqueue(vec![bucket("a", &["t1"])]).unwrap();
        queue.dequeue_bucket(&Default::default(), &worker("w1")).unwrap();

        assert!(queue.reenqueue_stuck_buckets().is_empty());
        assert_eq!(queue.holder().dequeued_count(), 1);
    }

    #[test]
    fn bucket_of_silent_worker_is_split_and_reenqueued() {
        let env = TestEnv::new();
        env.register("w1");
        let queue = env.queue("job");
        let b = bucket("a", &["t1", "t2"]);
        queue.enqueue(vec![b.clone()]).unwrap();
        queue.dequeue_bucket(&Default::default(), &worker("w1")).unwrap();

        env.silence_workers();
        let stuck = queue.reenqueue_stuck_buckets();

        assert_eq!(
            stuck,
            vec![StuckBucket {
                reason: StuckBucketReason::WorkerIsSilent,
                bucket: b.clone(),
                worker_id: worker("w1"),
            }]
        );
        assert_eq!(queue.holder().dequeued_count(), 0);

        let enqueued = queue.holder().all_enqueued_buckets();
        assert_eq!(enqueued.len(), 2);
        let entries: BTreeSet<_> = enqueued
            .iter()
            .flat_map(|e| e.bucket.test_entries.clone())
            .collect();
        assert_eq!(entries, [test_entry("t1"), test_entry("t2")].into_iter().collect());
        assert!(enqueued.iter().all(|e| e.bucket.test_entries.len() == 1
            && e.bucket.bucket_id != b.bucket_id));

        assert!(env
            .metrics
            .metrics()
            .contains(&QueueMetric::StuckBucketsReenqueued {
                job_id: "job".into(),
                count: 1
            }));
    }

    #[test]
    fn bucket_missing_from_alive_report_is_lost() {
        let env = TestEnv::new();
        env.register("w1");
        let queue = env.queue("job");
        queue.enqueue(vec![bucket("a", &["t1"])]).unwrap();
        queue.dequeue_bucket(&Default::default(), &worker("w1")).unwrap();

        env.ctx
            .aliveness
            .report_alive(&worker("w1"), Default::default())
            .unwrap();
        let stuck = queue.reenqueue_stuck_buckets();

        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].reason, StuckBucketReason::BucketLost);
        assert_eq!(queue.holder().enqueued_count(), 1);
    }

    #[test]
    fn bucket_still_reported_is_kept() {
        let env = TestEnv::new();
        env.register("w1");
        let queue = env.queue("job");
        queue.enqueue(vec![bucket("a", &["t1"])]).unwrap();
        queue.dequeue_bucket(&Default::default(), &worker("w1")).unwrap();

        env.ctx
            .aliveness
            .report_alive(&worker("w1"), [BucketId::from("a")].into_iter().collect())
            .unwrap();

        assert!(queue.reenqueue_stuck_buckets().is_empty());
    }

    #[test]
    fn bucket_of_blocked_worker_is_left_alone() {
        let env = TestEnv::new();
        env.register("w1");
        let queue = env.queue("job");
        queue.enqueue(vec![bucket("a", &["t1"])]).unwrap();
        queue.dequeue_bucket(&Default::default(), &worker("w1")).unwrap();

        env.ctx.aliveness.disable(&worker("w1")).unwrap();
        env.silence_workers();

        assert!(queue.reenqueue_stuck_buckets().is_empty());
        assert_eq!(queue.holder().dequeued_count(), 1);
    }

    #[test]
    #[traced_test]
    fn bucket_of_unknown_worker_is_reclaimed() {
        let env = TestEnv::new();
        env.register("w1");
        let queue = env.queue("job");
        queue.enqueue(vec![bucket("a", &["t1"])]).unwrap();
        queue.dequeue_bucket(&Default::default(), &worker("w1")).unwrap();

        // The same holder seen through a tracker that never heard of "w1".
        let amnesiac = TestEnv::new();
        let queue = BucketQueue::new("job".into(), queue.holder().clone(), amnesiac.ctx.clone());

        let stuck = queue.reenqueue_stuck_buckets();

        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].reason, StuckBucketReason::WorkerIsNotRegistered);
        assert_eq!(queue.holder().enqueued_count(), 1);
        assert!(logs_contain("illegal state"));
    }

    #[test]
    #[traced_test]
    fn unsatisfiable_replacements_leave_bucket_in_place() {
        let env = TestEnv::new();
        let queue = env.queue("job");
        let needs_gpu = with_requirement(
            bucket("a", &["t1"]),
            "gpu",
            WorkerCapabilityConstraint::Present,
        );
        queue.enqueue(vec![needs_gpu]).unwrap();

        env.register("w1");
        let gpu = [capability("gpu", "1")].into_iter().collect();
        queue.dequeue_bucket(&gpu, &worker("w1")).unwrap();

        env.silence_workers();
        env.register("w2");

        assert!(queue.reenqueue_stuck_buckets().is_empty());
        assert_eq!(queue.holder().dequeued_count(), 1);
        assert_eq!(queue.holder().enqueued_count(), 0);
        assert!(logs_contain("could not reenqueue stuck bucket"));
    }
}
