use std::collections::BTreeMap;

use derive_more::Display;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::EpochMillis;

use super::buckets::TestName;
use super::results::TestingResult;
use super::workers::WorkerId;

#[derive(Serialize, Deserialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Display)]
pub struct JobId(pub String);

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

#[derive(Serialize, Deserialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Display)]
pub struct JobGroupId(pub String);

impl From<&str> for JobGroupId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("priority {0} is out of range 0..=999")]
pub struct PriorityError(pub u16);

/// Scheduling priority of a job or job group. Higher values are served first.
#[derive(
    Serialize, Deserialize, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Display,
)]
#[serde(try_from = "u16", into = "u16")]
pub struct Priority(u16);

impl Priority {
    pub const LOWEST: Priority = Priority(0);
    pub const DEFAULT: Priority = Priority(500);
    pub const HIGHEST: Priority = Priority(999);

    pub fn new(value: u16) -> Result<Self, PriorityError> {
        if value > Self::HIGHEST.0 {
            return Err(PriorityError(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u16> for Priority {
    type Error = PriorityError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u16 {
    fn from(priority: Priority) -> u16 {
        priority.0
    }
}

/// A job as submitted for scheduling.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PrioritizedJob {
    pub job_id: JobId,
    pub job_group_id: JobGroupId,
    pub job_priority: Priority,
    pub job_group_priority: Priority,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub job_id: JobId,
    pub priority: Priority,
    pub creation_time: EpochMillis,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct JobGroup {
    pub job_group_id: JobGroupId,
    pub priority: Priority,
    pub creation_time: EpochMillis,
}

/// Snapshot of a running job's queue.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct RunningQueueState {
    pub enqueued_bucket_count: usize,
    pub enqueued_tests: Vec<TestName>,
    pub dequeued_bucket_count: usize,
    pub dequeued_tests: BTreeMap<WorkerId, Vec<TestName>>,
}

impl RunningQueueState {
    /// Whether nothing is waiting or executing.
    pub fn is_depleted(&self) -> bool {
        self.enqueued_bucket_count == 0 && self.dequeued_bucket_count == 0
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum QueueState {
    Running(RunningQueueState),
    Deleted,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct JobState {
    pub job_id: JobId,
    pub queue_state: QueueState,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct JobResults {
    pub job_id: JobId,
    pub testing_results: Vec<TestingResult>,
}
