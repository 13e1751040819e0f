//! Lock-protected storage of one job's enqueued and dequeued buckets.

use std::cell::RefCell;

use parking_lot::ReentrantMutex;
use tq_utils::log_assert;
use tq_utils::net_protocol::buckets::{BucketId, DequeuedBucket, EnqueuedBucket};
use tq_utils::net_protocol::workers::WorkerId;

#[derive(Default, Debug)]
struct HolderState {
    enqueued: Vec<EnqueuedBucket>,
    dequeued: Vec<DequeuedBucket>,
}

/// Every operation takes the holder's reentrant lock, so a sequence of operations can be
/// made atomic by running it inside [BucketQueueHolder::perform_with_exclusive_access].
#[derive(Default, Debug)]
pub struct BucketQueueHolder {
    state: ReentrantMutex<RefCell<HolderState>>,
}

static_assertions::assert_impl_all!(BucketQueueHolder: Send, Sync);

impl BucketQueueHolder {
    /// Runs `work` while holding the holder's lock. Holder operations called from `work` on
    /// the same thread re-enter the lock.
    pub fn perform_with_exclusive_access<T>(&self, work: impl FnOnce() -> T) -> T {
        let _guard = self.state.lock();
        work()
    }

    // The cell is only borrowed for the duration of `f`, which never calls back into the
    // holder, so borrows cannot overlap.
    fn with_state<T>(&self, f: impl FnOnce(&mut HolderState) -> T) -> T {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    pub fn all_enqueued_buckets(&self) -> Vec<EnqueuedBucket> {
        self.with_state(|state| state.enqueued.clone())
    }

    pub fn all_dequeued_buckets(&self) -> Vec<DequeuedBucket> {
        self.with_state(|state| state.dequeued.clone())
    }

    pub fn enqueued_count(&self) -> usize {
        self.with_state(|state| state.enqueued.len())
    }

    pub fn dequeued_count(&self) -> usize {
        self.with_state(|state| state.dequeued.len())
    }

    /// No bucket is waiting or executing.
    pub fn is_depleted(&self) -> bool {
        self.with_state(|state| state.enqueued.is_empty() && state.dequeued.is_empty())
    }

    pub fn dequeued_bucket(
        &self,
        bucket_id: &BucketId,
        worker_id: &WorkerId,
    ) -> Option<DequeuedBucket> {
        self.with_state(|state| {
            state
                .dequeued
                .iter()
                .find(|dequeued| {
                    dequeued.bucket_id() == bucket_id && &dequeued.worker_id == worker_id
                })
                .cloned()
        })
    }

    pub fn contains_dequeued_bucket(&self, bucket_id: &BucketId, worker_id: &WorkerId) -> bool {
        self.dequeued_bucket(bucket_id, worker_id).is_some()
    }

    /// Inserts buckets at `position`, clamped to the number of enqueued buckets.
    pub fn insert(&self, enqueued_buckets: Vec<EnqueuedBucket>, position: usize) {
        self.with_state(|state| {
            let position = position.min(state.enqueued.len());
            let inserted = enqueued_buckets.len();
            state.enqueued.splice(position..position, enqueued_buckets);
            tracing::trace!(
                inserted,
                position,
                enqueued = state.enqueued.len(),
                "inserted buckets"
            );
        })
    }

    /// Removes a bucket from the dequeued set. Returns whether it was there.
    pub fn remove(&self, dequeued_bucket: &DequeuedBucket) -> bool {
        self.with_state(|state| {
            let before = state.dequeued.len();
            state.dequeued.retain(|dequeued| {
                dequeued.enqueued_bucket.unique_identifier
                    != dequeued_bucket.enqueued_bucket.unique_identifier
            });
            let removed = before != state.dequeued.len();
            tracing::trace!(removed, dequeued = state.dequeued.len(), "removed dequeued bucket");
            removed
        })
    }

    /// Moves the bucket from the enqueued set to the dequeued set.
    /// Returns false, changing nothing, if the bucket is no longer enqueued.
    pub fn replace_previously_enqueued_bucket(&self, dequeued_bucket: DequeuedBucket) -> bool {
        self.with_state(|state| {
            let unique_identifier = dequeued_bucket.enqueued_bucket.unique_identifier;
            let position = state
                .enqueued
                .iter()
                .position(|enqueued| enqueued.unique_identifier == unique_identifier);

            let position = match position {
                Some(position) => position,
                None => return false,
            };

            state.enqueued.remove(position);

            log_assert!(
                !state.dequeued.iter().any(|dequeued| {
                    dequeued.enqueued_bucket.unique_identifier == unique_identifier
                }),
                ?unique_identifier,
                "bucket is dequeued twice"
            );
            state.dequeued.push(dequeued_bucket);

            tracing::trace!(
                enqueued = state.enqueued.len(),
                dequeued = state.dequeued.len(),
                "moved bucket to dequeued"
            );
            true
        })
    }

    /// Drops every enqueued bucket, leaving dequeued ones alone. Returns how many were dropped.
    pub fn remove_all_enqueued_buckets(&self) -> usize {
        self.with_state(|state| {
            let removed = state.enqueued.len();
            state.enqueued.clear();
            tracing::trace!(removed, "removed all enqueued buckets");
            removed
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;

    use tq_test_utils::{bucket, dequeued, enqueued, worker};

    use super::BucketQueueHolder;

    #[test]
    fn insert_position_is_clamped() {
        let holder = BucketQueueHolder::default();
        let a = enqueued(bucket("a", &["t1"]));
        let b = enqueued(bucket("b", &["t2"]));
        let c = enqueued(bucket("c", &["t3"]));

        holder.insert(vec![a.clone()], 5);
        holder.insert(vec![b.clone()], 0);
        holder.insert(vec![c.clone()], 1);

        assert_eq!(holder.all_enqueued_buckets(), vec![b, c, a]);
    }

    #[test]
    fn replace_moves_bucket_to_dequeued() {
        let holder = BucketQueueHolder::default();
        let a = enqueued(bucket("a", &["t1"]));
        holder.insert(vec![a.clone()], 0);

        let dequeued_a = dequeued(a, "w1");
        assert!(holder.replace_previously_enqueued_bucket(dequeued_a.clone()));

        assert!(holder.all_enqueued_buckets().is_empty());
        assert_eq!(holder.all_dequeued_buckets(), vec![dequeued_a.clone()]);
        assert_eq!(
            holder.dequeued_bucket(dequeued_a.bucket_id(), &worker("w1")),
            Some(dequeued_a.clone())
        );
        assert_eq!(holder.dequeued_bucket(dequeued_a.bucket_id(), &worker("w2")), None);

        // Already moved.
        assert!(!holder.replace_previously_enqueued_bucket(dequeued_a));
    }

    #[test]
    fn remove_and_depletion() {
        let holder = BucketQueueHolder::default();
        let a = enqueued(bucket("a", &["t1"]));
        holder.insert(vec![a.clone()], 0);
        assert!(!holder.is_depleted());

        let dequeued_a = dequeued(a, "w1");
        holder.replace_previously_enqueued_bucket(dequeued_a.clone());
        assert!(!holder.is_depleted());

        assert!(holder.remove(&dequeued_a));
        assert!(!holder.remove(&dequeued_a));
        assert!(holder.is_depleted());
    }

    #[test]
    fn remove_all_enqueued_keeps_dequeued() {
        let holder = BucketQueueHolder::default();
        let a = enqueued(bucket("a", &["t1"]));
        let b = enqueued(bucket("b", &["t2"]));
        holder.insert(vec![a.clone(), b], 0);
        holder.replace_previously_enqueued_bucket(dequeued(a, "w1"));

        assert_eq!(holder.remove_all_enqueued_buckets(), 1);
        assert_eq!(holder.enqueued_count(), 0);
        assert_eq!(holder.dequeued_count(), 1);
    }

    #[test]
    fn exclusive_access_is_reentrant() {
        let holder = BucketQueueHolder::default();

        let count = holder.perform_with_exclusive_access(|| {
            holder.insert(vec![enqueued(bucket("a", &["t1"]))], 0);
            holder.perform_with_exclusive_access(|| holder.enqueued_count())
        });

        assert_eq!(count, 1);
    }

    #[test]
    fn exclusive_access_blocks_other_threads() {
        let holder = Arc::new(BucketQueueHolder::default());
        holder.insert(vec![enqueued(bucket("a", &["t1"]))], 0);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let holder = Arc::clone(&holder);
                thread::spawn(move || {
                    holder.perform_with_exclusive_access(|| {
                        let candidate = holder.all_enqueued_buckets().into_iter().next();
                        candidate.map(|candidate| {
                            holder.replace_previously_enqueued_bucket(dequeued(
                                candidate,
                                &format!("w{i}"),
                            ))
                        })
                    })
                })
            })
            .collect();

        let claimed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|claimed| *claimed == Some(true))
            .count();

        assert_eq!(claimed, 1);
        assert_eq!(holder.dequeued_count(), 1);
    }
}
