use std::collections::BTreeSet;
use std::fmt;

use derive_more::Display;
use serde_derive::{Deserialize, Serialize};

use crate::time::EpochMillis;

use super::workers::{WorkerCapabilityRequirement, WorkerId};

/// Opaque execution payload of a bucket. The queue never looks inside it.
pub type PayloadMap = serde_json::Map<String, serde_json::Value>;

#[derive(Serialize, Deserialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Display)]
pub struct BucketId(pub String);

impl BucketId {
    /// A fresh, globally unique bucket id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl From<&str> for BucketId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Distinguishes repeated enqueues of logically-equal buckets.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, Display)]
pub struct EnqueuedBucketId(pub uuid::Uuid);

impl EnqueuedBucketId {
    #[allow(clippy::new_without_default)] // Enqueue ids should be fresh, not defaulted
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

#[derive(Serialize, Deserialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct TestName {
    pub class_name: String,
    pub method_name: String,
}

impl TestName {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class_name, self.method_name)
    }
}

#[derive(Serialize, Deserialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct TestEntry {
    pub test_name: TestName,
    pub tags: Vec<String>,
    /// Identifier of the test in an external test case management system, if any.
    pub case_id: Option<u64>,
}

impl TestEntry {
    pub fn new(test_name: TestName) -> Self {
        Self {
            test_name,
            tags: vec![],
            case_id: None,
        }
    }
}

/// A unit of schedulable work. Never mutated once created.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Bucket {
    pub bucket_id: BucketId,
    pub test_entries: Vec<TestEntry>,
    pub payload: PayloadMap,
    pub worker_capability_requirements: BTreeSet<WorkerCapabilityRequirement>,
    /// How many times a failing test of this bucket may be retried.
    pub number_of_retries: u32,
}

impl Bucket {
    /// A bucket with the same payload and requirements as this one, but a fresh id and the
    /// given test entries.
    pub fn with_test_entries(&self, test_entries: Vec<TestEntry>) -> Bucket {
        Bucket {
            bucket_id: BucketId::generate(),
            test_entries,
            payload: self.payload.clone(),
            worker_capability_requirements: self.worker_capability_requirements.clone(),
            number_of_retries: self.number_of_retries,
        }
    }

    /// Splits this bucket into fresh buckets holding exactly one test entry each.
    pub fn split_by_test_entry(&self) -> Vec<Bucket> {
        self.test_entries
            .iter()
            .map(|entry| self.with_test_entries(vec![entry.clone()]))
            .collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnqueuedBucket {
    pub bucket: Bucket,
    pub enqueue_timestamp: EpochMillis,
    pub unique_identifier: EnqueuedBucketId,
}

impl EnqueuedBucket {
    pub fn new(bucket: Bucket, enqueue_timestamp: EpochMillis) -> Self {
        Self {
            bucket,
            enqueue_timestamp,
            unique_identifier: EnqueuedBucketId::new(),
        }
    }

    pub fn bucket_id(&self) -> &BucketId {
        &self.bucket.bucket_id
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DequeuedBucket {
    pub enqueued_bucket: EnqueuedBucket,
    pub worker_id: WorkerId,
}

impl DequeuedBucket {
    pub fn bucket(&self) -> &Bucket {
        &self.enqueued_bucket.bucket
    }

    pub fn bucket_id(&self) -> &BucketId {
        self.enqueued_bucket.bucket_id()
    }
}
