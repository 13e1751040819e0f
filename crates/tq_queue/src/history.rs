//! Decides which worker may run which bucket, and which failed tests are retried.

pub mod storage;

use std::sync::Arc;

use tq_utils::net_protocol::buckets::{Bucket, BucketId, EnqueuedBucket, TestEntry};
use tq_utils::net_protocol::results::TestingResult;
use tq_utils::net_protocol::workers::WorkerId;

use self::storage::{TestAttempt, TestHistoryStorage};

/// Outcome of running a worker's result through the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestHistoryAcceptResult {
    /// Failed entries that have retries left and must run again.
    pub test_entries_to_reenqueue: Vec<TestEntry>,
    /// The result, minus the entries that will be retried.
    pub testing_result: TestingResult,
}

/// Never consults worker aliveness; callers pass in the workers in working condition.
#[derive(Clone)]
pub struct TestHistoryTracker {
    storage: Arc<dyn TestHistoryStorage>,
}

impl TestHistoryTracker {
    pub fn new(storage: Arc<dyn TestHistoryStorage>) -> Self {
        Self { storage }
    }

    /// Picks the bucket `worker_id` should run next, if any.
    ///
    /// The earliest bucket without a test the worker already failed wins. Failing that, the
    /// front bucket is handed out only if every worker in working condition has failed its
    /// tests, since nobody else can do better.
    pub fn bucket_to_dequeue(
        &self,
        worker_id: &WorkerId,
        enqueued_buckets: &[EnqueuedBucket],
        workers_in_working_condition: &[WorkerId],
    ) -> Option<EnqueuedBucket> {
        let not_failed_by_worker = enqueued_buckets
            .iter()
            .find(|enqueued| !self.bucket_failed_on_worker(&enqueued.bucket, worker_id));

        if let Some(enqueued) = not_failed_by_worker {
            return Some(enqueued.clone());
        }

        let front = enqueued_buckets.first()?;
        let failed_by_everyone = front.bucket.test_entries.iter().all(|entry| {
            let history = self.storage.history(&front.bucket.bucket_id, entry);
            !history.is_failing_on_worker(worker_id)
                || history
                    .failing_worker_ids()
                    .contains_all(workers_in_working_condition.iter())
        });

        if failed_by_everyone {
            tracing::debug!(
                %worker_id,
                bucket_id = %front.bucket.bucket_id,
                "handing out bucket the worker already failed"
            );
            Some(front.clone())
        } else {
            None
        }
    }

    /// Registers every reported entry as an attempt by `worker_id`, and splits off failed
    /// entries that still have retries left.
    pub fn accept(
        &self,
        testing_result: TestingResult,
        bucket: &Bucket,
        worker_id: &WorkerId,
    ) -> TestHistoryAcceptResult {
        let TestingResult {
            bucket_id,
            unfiltered_results,
        } = testing_result;

        let mut test_entries_to_reenqueue = vec![];
        let mut results_to_collect = Vec::with_capacity(unfiltered_results.len());

        for result in unfiltered_results {
            let succeeded = result.succeeded();
            self.storage.register_attempt(
                &bucket.bucket_id,
                &result.test_entry,
                TestAttempt {
                    worker_id: worker_id.clone(),
                    succeeded,
                },
            );

            if succeeded {
                results_to_collect.push(result);
                continue;
            }

            let attempts = self
                .storage
                .history(&bucket.bucket_id, &result.test_entry)
                .number_of_attempts();

            if attempts <= bucket.number_of_retries as usize {
                tracing::debug!(
                    %worker_id,
                    test = %result.test_entry.test_name,
                    attempts,
                    "test failed and will be retried"
                );
                test_entries_to_reenqueue.push(result.test_entry);
            } else {
                results_to_collect.push(result);
            }
        }

        TestHistoryAcceptResult {
            test_entries_to_reenqueue,
            testing_result: TestingResult::new(bucket_id, results_to_collect),
        }
    }

    /// Carries the history of `failed_bucket_id` over to the buckets created to retry it.
    pub fn will_reenqueue_previously_failed_tests(
        &self,
        failed_bucket_id: &BucketId,
        new_bucket_ids: &[BucketId],
    ) {
        for new_bucket_id in new_bucket_ids {
            self.storage
                .register_reenqueued_bucket(failed_bucket_id, new_bucket_id);
        }
    }

    fn bucket_failed_on_worker(&self, bucket: &Bucket, worker_id: &WorkerId) -> bool {
        bucket.test_entries.iter().any(|entry| {
            self.storage
                .history(&bucket.bucket_id, entry)
                .is_failing_on_worker(worker_id)
        })
    }
}
