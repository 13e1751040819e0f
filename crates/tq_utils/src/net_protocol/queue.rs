use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use super::buckets::{Bucket, BucketId, DequeuedBucket};
use super::jobs::{JobId, JobResults, JobState, PrioritizedJob};
use super::results::TestingResult;
use super::workers::{WorkerAliveness, WorkerCapabilities, WorkerConfiguration, WorkerId};

/// The queue's answer to a worker asking for work.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum DequeueResult {
    DequeuedBucket(DequeuedBucket),
    /// Every job the worker could serve has finished.
    QueueIsEmpty,
    /// Nothing is available right now; ask again after the given duration.
    CheckAgainLater { after: Duration },
    WorkerIsNotRegistered,
}

/// A request to the queue, from either a worker or a client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Request {
    // Worker -> queue
    RegisterWorker {
        worker_id: WorkerId,
    },
    Dequeue {
        worker_id: WorkerId,
        capabilities: WorkerCapabilities,
    },
    ReportResult {
        worker_id: WorkerId,
        bucket_id: BucketId,
        testing_result: TestingResult,
    },
    ReportAlive {
        worker_id: WorkerId,
        bucket_ids_being_processed: BTreeSet<BucketId>,
    },

    // Client/operator -> queue
    ScheduleTests {
        prioritized_job: PrioritizedJob,
        buckets: Vec<Bucket>,
    },
    DeleteJob {
        job_id: JobId,
    },
    JobState {
        job_id: JobId,
    },
    JobResults {
        job_id: JobId,
    },
    RunningJobIds,
    EnableWorker {
        worker_id: WorkerId,
    },
    DisableWorker {
        worker_id: WorkerId,
    },
    KickstartWorker {
        worker_id: WorkerId,
    },
    ToggleWorkerSharing {
        enabled: bool,
    },
    /// The workers that may still be utilized while sharing is enabled.
    SetUtilizableWorkers {
        worker_ids: Vec<WorkerId>,
    },
    WorkerStates,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Response {
    WorkerConfiguration(WorkerConfiguration),
    Dequeue(DequeueResult),
    JobState(JobState),
    JobResults(JobResults),
    RunningJobIds(Vec<JobId>),
    WorkerStates(BTreeMap<WorkerId, WorkerAliveness>),
    Ack,
    Error { message: String },
}
