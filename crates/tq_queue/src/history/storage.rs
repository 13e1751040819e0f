//! Where test attempts are remembered.

use std::collections::HashMap;

use parking_lot::RwLock;
use tq_utils::net_protocol::buckets::{BucketId, TestEntry};
use tq_utils::net_protocol::workers::WorkerId;
use tq_utils::vec_set::VecSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestAttempt {
    pub worker_id: WorkerId,
    pub succeeded: bool,
}

/// Every attempt of a test entry within one bucket lineage, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestEntryHistory {
    pub attempts: Vec<TestAttempt>,
}

impl TestEntryHistory {
    pub fn number_of_attempts(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_failing_on_worker(&self, worker_id: &WorkerId) -> bool {
        self.attempts
            .iter()
            .any(|attempt| !attempt.succeeded && &attempt.worker_id == worker_id)
    }

    pub fn failing_worker_ids(&self) -> VecSet<WorkerId> {
        self.attempts
            .iter()
            .filter(|attempt| !attempt.succeeded)
            .map(|attempt| attempt.worker_id.clone())
            .collect()
    }
}

/// Storage of [TestEntryHistory], keyed by bucket lineage.
///
/// A lineage is a bucket together with every bucket created to retry its tests. Looking up
/// history by any bucket of a lineage gives the history of the whole lineage.
pub trait TestHistoryStorage: Send + Sync {
    fn history(&self, bucket_id: &BucketId, test_entry: &TestEntry) -> TestEntryHistory;

    fn register_attempt(&self, bucket_id: &BucketId, test_entry: &TestEntry, attempt: TestAttempt);

    /// Makes `new_bucket_id` part of the lineage of `previous_bucket_id`.
    fn register_reenqueued_bucket(&self, previous_bucket_id: &BucketId, new_bucket_id: &BucketId);
}

#[derive(Default, Debug)]
struct InMemoryHistories {
    /// Maps each bucket to the first bucket of its lineage.
    lineage_roots: HashMap<BucketId, BucketId>,
    histories: HashMap<(BucketId, TestEntry), TestEntryHistory>,
}

impl InMemoryHistories {
    fn lineage_root<'a>(&'a self, bucket_id: &'a BucketId) -> &'a BucketId {
        self.lineage_roots.get(bucket_id).unwrap_or(bucket_id)
    }
}

#[derive(Default, Debug)]
pub struct InMemoryTestHistoryStorage {
    inner: RwLock<InMemoryHistories>,
}

impl TestHistoryStorage for InMemoryTestHistoryStorage {
    fn history(&self, bucket_id: &BucketId, test_entry: &TestEntry) -> TestEntryHistory {
        let inner = self.inner.read();
        let root = inner.lineage_root(bucket_id).clone();
        inner
            .histories
            .get(&(root, test_entry.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn register_attempt(&self, bucket_id: &BucketId, test_entry: &TestEntry, attempt: TestAttempt) {
        let mut inner = self.inner.write();
        let root = inner.lineage_root(bucket_id).clone();
        inner
            .histories
            .entry((root, test_entry.clone()))
            .or_default()
            .attempts
            .push(attempt);
    }

    fn register_reenqueued_bucket(&self, previous_bucket_id: &BucketId, new_bucket_id: &BucketId) {
        let mut inner = self.inner.write();
        let root = inner.lineage_root(previous_bucket_id).clone();
        inner.lineage_roots.insert(new_bucket_id.clone(), root);
    }
}
