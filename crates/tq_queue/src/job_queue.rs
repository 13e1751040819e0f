use std::cmp::Ordering;
use std::sync::Arc;

use tq_utils::net_protocol::jobs::{Job, JobGroup};

use crate::bucket_queue::BucketQueue;
use crate::results_collector::ResultsCollector;

/// Everything the queue keeps about one job.
pub(crate) struct JobQueue {
    pub job: Job,
    pub job_group: JobGroup,
    pub bucket_queue: BucketQueue,
    pub results_collector: Arc<ResultsCollector>,
}

impl JobQueue {
    /// Order in which job queues are offered to workers: higher job group priority first,
    /// then higher job priority, then older jobs.
    pub fn dequeue_order(&self, other: &JobQueue) -> Ordering {
        other
            .job_group
            .priority
            .cmp(&self.job_group.priority)
            .then_with(|| other.job.priority.cmp(&self.job.priority))
            .then_with(|| self.job.creation_time.cmp(&other.job.creation_time))
    }
}
