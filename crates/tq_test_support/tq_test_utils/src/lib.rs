//! Builders for the queue's data model, shared by tests across the workspace.

use std::time::Duration;

use tq_utils::net_protocol::buckets::{
    Bucket, BucketId, DequeuedBucket, EnqueuedBucket, TestEntry, TestName,
};
use tq_utils::net_protocol::jobs::{JobGroupId, JobId, PrioritizedJob, Priority};
use tq_utils::net_protocol::results::{
    TestEntryResult, TestException, TestRunResult, TestingResult,
};
use tq_utils::net_protocol::workers::{
    WorkerCapability, WorkerCapabilityConstraint, WorkerCapabilityRequirement, WorkerId,
};
use tq_utils::time::EpochMillis;

pub const TEST_CLASS: &str = "Tests";

pub fn worker(id: &str) -> WorkerId {
    WorkerId::from(id)
}

pub fn job_id(id: &str) -> JobId {
    JobId::from(id)
}

pub fn test_entry(method: &str) -> TestEntry {
    TestEntry::new(TestName::new(TEST_CLASS, method))
}

pub fn test_name(method: &str) -> TestName {
    TestName::new(TEST_CLASS, method)
}

/// A bucket with one test entry per method, and no retries.
pub fn bucket(id: &str, methods: &[&str]) -> Bucket {
    bucket_with_retries(id, methods, 0)
}

pub fn bucket_with_retries(id: &str, methods: &[&str], number_of_retries: u32) -> Bucket {
    Bucket {
        bucket_id: BucketId::from(id),
        test_entries: methods.iter().map(|method| test_entry(method)).collect(),
        payload: Default::default(),
        worker_capability_requirements: Default::default(),
        number_of_retries,
    }
}

pub fn with_requirement(
    mut bucket: Bucket,
    capability_name: &str,
    constraint: WorkerCapabilityConstraint,
) -> Bucket {
    bucket
        .worker_capability_requirements
        .insert(WorkerCapabilityRequirement {
            capability_name: capability_name.to_owned(),
            constraint,
        });
    bucket
}

pub fn capability(name: &str, value: &str) -> WorkerCapability {
    WorkerCapability::new(name, value)
}

pub fn enqueued(bucket: Bucket) -> EnqueuedBucket {
    EnqueuedBucket::new(bucket, EpochMillis::from_millis(0))
}

pub fn dequeued(enqueued_bucket: EnqueuedBucket, worker_id: &str) -> DequeuedBucket {
    DequeuedBucket {
        enqueued_bucket,
        worker_id: worker(worker_id),
    }
}

fn run(succeeded: bool) -> TestRunResult {
    TestRunResult {
        succeeded,
        exceptions: if succeeded {
            vec![]
        } else {
            vec![TestException::new("assertion failed")]
        },
        duration: Duration::from_millis(100),
        start_time: EpochMillis::from_millis(0),
    }
}

pub fn passed(entry: TestEntry) -> TestEntryResult {
    TestEntryResult::with_run_results(entry, vec![run(true)])
}

pub fn failed(entry: TestEntry) -> TestEntryResult {
    TestEntryResult::with_run_results(entry, vec![run(false)])
}

pub fn testing_result(bucket_id: &BucketId, results: Vec<TestEntryResult>) -> TestingResult {
    TestingResult::new(bucket_id.clone(), results)
}

pub fn all_passed(bucket: &Bucket) -> TestingResult {
    testing_result(
        &bucket.bucket_id,
        bucket.test_entries.iter().cloned().map(passed).collect(),
    )
}

pub fn all_failed(bucket: &Bucket) -> TestingResult {
    testing_result(
        &bucket.bucket_id,
        bucket.test_entries.iter().cloned().map(failed).collect(),
    )
}

pub fn prioritized_job(id: &str) -> PrioritizedJob {
    prioritized_job_in_group(id, "group", Priority::DEFAULT, Priority::DEFAULT)
}

pub fn prioritized_job_in_group(
    id: &str,
    group: &str,
    job_priority: Priority,
    job_group_priority: Priority,
) -> PrioritizedJob {
    PrioritizedJob {
        job_id: JobId::from(id),
        job_group_id: JobGroupId::from(group),
        job_priority,
        job_group_priority,
    }
}

pub fn priority(value: u16) -> Priority {
    match Priority::new(value) {
        Ok(priority) => priority,
        Err(e) => panic!("{e}"),
    }
}
