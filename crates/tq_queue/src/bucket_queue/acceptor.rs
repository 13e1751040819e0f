use thiserror::Error;
use tq_utils::net_protocol::buckets::{Bucket, BucketId, DequeuedBucket, TestEntry};
use tq_utils::net_protocol::results::{TestEntryResult, TestingResult};
use tq_utils::net_protocol::workers::WorkerId;

use crate::metrics::QueueMetric;

use super::BucketQueue;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcceptError {
    #[error("no bucket {bucket_id} is dequeued by worker {worker_id}")]
    NoDequeuedBucket {
        bucket_id: BucketId,
        worker_id: WorkerId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketQueueAcceptResult {
    pub dequeued_bucket: DequeuedBucket,
    /// Final results of the bucket's tests. Tests that will be retried are not in here.
    pub testing_result_to_collect: TestingResult,
}

impl BucketQueue {
    /// Accepts a worker's result for a bucket it dequeued.
    ///
    /// Tests the worker did not report on are treated as failed. Failed tests with retries
    /// left are reenqueued, one bucket per test.
    pub fn accept(
        &self,
        bucket_id: &BucketId,
        testing_result: TestingResult,
        worker_id: &WorkerId,
    ) -> Result<BucketQueueAcceptResult, AcceptError> {
        self.holder.perform_with_exclusive_access(|| {
            let dequeued_bucket = self
                .holder
                .dequeued_bucket(bucket_id, worker_id)
                .ok_or_else(|| AcceptError::NoDequeuedBucket {
                    bucket_id: bucket_id.clone(),
                    worker_id: worker_id.clone(),
                })?;
            let bucket = dequeued_bucket.bucket();

            let lost_entries = testing_result.lost_test_entries(&bucket.test_entries);
            let mut final_lost_results = vec![];
            if !lost_entries.is_empty() {
                tracing::warn!(
                    job_id = %self.job_id,
                    %bucket_id,
                    %worker_id,
                    lost = lost_entries.len(),
                    "worker did not report every test of the bucket"
                );
                let lost_result = TestingResult::new(
                    bucket_id.clone(),
                    lost_entries.into_iter().map(TestEntryResult::lost).collect(),
                );
                let accepted = self.ctx.history.accept(lost_result, bucket, worker_id);
                final_lost_results = accepted.testing_result.unfiltered_results;

                let not_reenqueued =
                    self.reenqueue_failed_tests(bucket, accepted.test_entries_to_reenqueue);
                final_lost_results.extend(not_reenqueued.into_iter().map(TestEntryResult::lost));
            }

            let reported_results = testing_result.unfiltered_results.clone();
            let accepted = self.ctx.history.accept(testing_result, bucket, worker_id);
            let mut testing_result_to_collect = accepted.testing_result;

            let not_reenqueued =
                self.reenqueue_failed_tests(bucket, accepted.test_entries_to_reenqueue);
            testing_result_to_collect.unfiltered_results.extend(
                reported_results
                    .into_iter()
                    .filter(|result| not_reenqueued.contains(&result.test_entry)),
            );
            testing_result_to_collect
                .unfiltered_results
                .extend(final_lost_results);

            self.holder.remove(&dequeued_bucket);
            self.ctx.aliveness.did_finish_bucket(worker_id, bucket_id);

            tracing::debug!(
                job_id = %self.job_id,
                %bucket_id,
                %worker_id,
                "accepted bucket result"
            );
            self.ctx.metrics.record(QueueMetric::BucketResultAccepted {
                job_id: self.job_id.clone(),
                worker_id: worker_id.clone(),
            });

            Ok(BucketQueueAcceptResult {
                dequeued_bucket,
                testing_result_to_collect,
            })
        })
    }

    /// Enqueues one bucket per failed entry, in the lineage of `failed_bucket`.
    /// Returns the entries that could not be reenqueued.
    fn reenqueue_failed_tests(
        &self,
        failed_bucket: &Bucket,
        test_entries: Vec<TestEntry>,
    ) -> Vec<TestEntry> {
        if test_entries.is_empty() {
            return vec![];
        }

        let new_buckets: Vec<_> = test_entries
            .iter()
            .map(|entry| failed_bucket.with_test_entries(vec![entry.clone()]))
            .collect();
        let new_bucket_ids: Vec<_> = new_buckets
            .iter()
            .map(|bucket| bucket.bucket_id.clone())
            .collect();

        self.ctx
            .history
            .will_reenqueue_previously_failed_tests(&failed_bucket.bucket_id, &new_bucket_ids);

        match self.enqueue(new_buckets) {
            Ok(()) => {
                self.ctx.metrics.record(QueueMetric::TestsReenqueued {
                    job_id: self.job_id.clone(),
                    count: test_entries.len(),
                });
                vec![]
            }
            Err(error) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    bucket_id = %failed_bucket.bucket_id,
                    %error,
                    "could not reenqueue failed tests, reporting them as final"
                );
                test_entries
            }
        }
    }
}
