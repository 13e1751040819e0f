use std::collections::HashMap;

use parking_lot::Mutex;
use tq_utils::log_assert;
use tq_utils::net_protocol::jobs::{JobGroup, JobGroupId, JobId, PrioritizedJob};
use tq_utils::time::EpochMillis;

use crate::job_queue::JobQueue;

#[derive(Debug)]
struct TrackedJobGroup {
    job_group: JobGroup,
    running_job_count: usize,
}

/// The running and deleted job queues, plus the groups of the running ones.
#[derive(Default)]
pub(crate) struct ContainerState {
    running: Vec<JobQueue>,
    deleted: Vec<JobQueue>,
    job_groups: HashMap<JobGroupId, TrackedJobGroup>,
}

impl ContainerState {
    pub fn running_queue(&self, job_id: &JobId) -> Option<&JobQueue> {
        self.running.iter().find(|queue| &queue.job.job_id == job_id)
    }

    pub fn deleted_queue(&self, job_id: &JobId) -> Option<&JobQueue> {
        self.deleted.iter().find(|queue| &queue.job.job_id == job_id)
    }

    pub fn running_queues(&self) -> &[JobQueue] {
        &self.running
    }

    pub fn deleted_queues(&self) -> &[JobQueue] {
        &self.deleted
    }

    /// Running queues in the order workers are served from them.
    pub fn running_queues_in_dequeue_order(&self) -> Vec<&JobQueue> {
        let mut queues: Vec<_> = self.running.iter().collect();
        // Stable, so insertion order breaks remaining ties.
        queues.sort_by(|a, b| a.dequeue_order(b));
        queues
    }

    pub fn take_deleted_queue(&mut self, job_id: &JobId) -> Option<JobQueue> {
        let position = self
            .deleted
            .iter()
            .position(|queue| &queue.job.job_id == job_id)?;
        Some(self.deleted.remove(position))
    }

    pub fn add_running_queue(&mut self, queue: JobQueue) {
        log_assert!(
            self.running_queue(&queue.job.job_id).is_none(),
            job_id = %queue.job.job_id,
            "job has two running queues"
        );
        self.running.push(queue);
    }

    /// Moves the job's queue from running to deleted, and stops tracking its group if it was
    /// the group's last running job. Returns the moved queue.
    pub fn move_to_deleted(&mut self, job_id: &JobId) -> Option<&JobQueue> {
        let position = self
            .running
            .iter()
            .position(|queue| &queue.job.job_id == job_id)?;
        let queue = self.running.remove(position);
        self.untrack_job_group(&queue.job_group.job_group_id);
        self.deleted.push(queue);
        self.deleted.last()
    }

    /// The group a new job of `prioritized_job` belongs to, created if this is its first
    /// running job.
    pub fn track_job_group(
        &mut self,
        prioritized_job: &PrioritizedJob,
        now: EpochMillis,
    ) -> JobGroup {
        let tracked = self
            .job_groups
            .entry(prioritized_job.job_group_id.clone())
            .or_insert_with(|| TrackedJobGroup {
                job_group: JobGroup {
                    job_group_id: prioritized_job.job_group_id.clone(),
                    priority: prioritized_job.job_group_priority,
                    creation_time: now,
                },
                running_job_count: 0,
            });
        tracked.running_job_count += 1;
        tracked.job_group.clone()
    }

    fn untrack_job_group(&mut self, job_group_id: &JobGroupId) {
        let remove = match self.job_groups.get_mut(job_group_id) {
            Some(tracked) => {
                tracked.running_job_count = tracked.running_job_count.saturating_sub(1);
                tracked.running_job_count == 0
            }
            None => {
                log_assert!(false, %job_group_id, "job group is not tracked");
                false
            }
        };
        if remove {
            self.job_groups.remove(job_group_id);
        }
    }

    /// Groups with running jobs, highest priority first.
    pub fn running_job_groups(&self) -> Vec<JobGroup> {
        let mut groups: Vec<_> = self
            .job_groups
            .values()
            .map(|tracked| tracked.job_group.clone())
            .collect();
        groups.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.creation_time.cmp(&b.creation_time))
                .then_with(|| a.job_group_id.cmp(&b.job_group_id))
        });
        groups
    }
}

/// Job queues of every job, behind the cross-job lock.
/// The lock is always taken before the lock of any single job's holder.
#[derive(Default)]
pub(crate) struct MultipleQueuesContainer {
    state: Mutex<ContainerState>,
}

impl MultipleQueuesContainer {
    pub fn perform_with_exclusive_access<T>(
        &self,
        work: impl FnOnce(&mut ContainerState) -> T,
    ) -> T {
        let mut state = self.state.lock();
        work(&mut state)
    }
}
