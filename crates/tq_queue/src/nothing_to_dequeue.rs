//! What to tell a worker when no job has a bucket for it.

use std::time::Duration;

use tq_utils::net_protocol::queue::DequeueResult;

pub trait NothingToDequeueBehavior: Send + Sync {
    /// Combines the answers of every queue that was asked, none of which handed out a bucket.
    fn dequeue_result_when_no_buckets_to_dequeue_available(
        &self,
        dequeue_results: &[DequeueResult],
    ) -> DequeueResult;
}

/// Lets workers go only once every queue has been drained.
#[derive(Debug, Clone, Copy)]
pub struct WaitForAllQueuesToDeplete {
    pub check_after: Duration,
}

impl NothingToDequeueBehavior for WaitForAllQueuesToDeplete {
    fn dequeue_result_when_no_buckets_to_dequeue_available(
        &self,
        dequeue_results: &[DequeueResult],
    ) -> DequeueResult {
        let all_empty = !dequeue_results.is_empty()
            && dequeue_results
                .iter()
                .all(|result| matches!(result, DequeueResult::QueueIsEmpty));

        if all_empty {
            return DequeueResult::QueueIsEmpty;
        }

        let after = dequeue_results
            .iter()
            .filter_map(|result| match result {
                DequeueResult::CheckAgainLater { after } => Some(*after),
                _ => None,
            })
            .min()
            .unwrap_or(self.check_after);

        DequeueResult::CheckAgainLater { after }
    }
}

/// Always keeps workers polling.
#[derive(Debug, Clone, Copy)]
pub struct CheckLater {
    pub check_after: Duration,
}

impl NothingToDequeueBehavior for CheckLater {
    fn dequeue_result_when_no_buckets_to_dequeue_available(
        &self,
        _dequeue_results: &[DequeueResult],
    ) -> DequeueResult {
        DequeueResult::CheckAgainLater {
            after: self.check_after,
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tq_utils::net_protocol::queue::DequeueResult;

    use super::{CheckLater, NothingToDequeueBehavior, WaitForAllQueuesToDeplete};

    const CHECK_AFTER: Duration = Duration::from_secs(10);

    fn later(secs: u64) -> DequeueResult {
        DequeueResult::CheckAgainLater {
            after: Duration::from_secs(secs),
        }
    }

    #[test]
    fn wait_for_depletion_with_all_queues_empty() {
        let behavior = WaitForAllQueuesToDeplete {
            check_after: CHECK_AFTER,
        };

        assert_eq!(
            behavior.dequeue_result_when_no_buckets_to_dequeue_available(&[
                DequeueResult::QueueIsEmpty,
                DequeueResult::QueueIsEmpty
            ]),
            DequeueResult::QueueIsEmpty
        );
    }

    #[test]
    fn wait_for_depletion_picks_the_shortest_wait() {
        let behavior = WaitForAllQueuesToDeplete {
            check_after: CHECK_AFTER,
        };

        assert_eq!(
            behavior.dequeue_result_when_no_buckets_to_dequeue_available(&[
                later(30),
                DequeueResult::QueueIsEmpty,
                later(3)
            ]),
            later(3)
        );
    }

    #[test]
    fn wait_for_depletion_without_answers_checks_later() {
        let behavior = WaitForAllQueuesToDeplete {
            check_after: CHECK_AFTER,
        };

        assert_eq!(
            behavior.dequeue_result_when_no_buckets_to_dequeue_available(&[]),
            later(10)
        );
    }

    #[test]
    fn check_later_ignores_empty_queues() {
        let behavior = CheckLater {
            check_after: CHECK_AFTER,
        };

        assert_eq!(
            behavior.dequeue_result_when_no_buckets_to_dequeue_available(&[
                DequeueResult::QueueIsEmpty
            ]),
            later(10)
        );
        assert_eq!(
            behavior.dequeue_result_when_no_buckets_to_dequeue_available(&[]),
            later(10)
        );
    }
}
