//! The queue's front door: every operation workers and clients can ask of the queue.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::instrument;
use tq_utils::net_protocol::buckets::{Bucket, BucketId};
use tq_utils::net_protocol::jobs::{JobId, JobResults, JobState, PrioritizedJob};
use tq_utils::net_protocol::queue::{DequeueResult, Request, Response};
use tq_utils::net_protocol::results::TestingResult;
use tq_utils::net_protocol::workers::{
    WorkerAliveness, WorkerCapabilities, WorkerConfiguration, WorkerId,
};
use tq_utils::time::{Clock, SystemClock};

use crate::aliveness::{WorkerAlivenessProvider, WorkerStateError};
use crate::balancing::{BalancingBucketQueue, MultipleJobsBucketQueue, QueueError};
use crate::bucket_queue::acceptor::BucketQueueAcceptResult;
use crate::bucket_queue::stuck::StuckBucket;
use crate::bucket_queue::BucketQueueContext;
use crate::capabilities::WorkerCapabilitiesStorage;
use crate::config::QueueConfig;
use crate::history::storage::{InMemoryTestHistoryStorage, TestHistoryStorage};
use crate::history::TestHistoryTracker;
use crate::metrics::{MetricRecorder, TracingMetricRecorder};
use crate::permission::{SharedWorkerPermissionProvider, WorkerPermissionAwareQueue};

/// Starts a worker that is not running, e.g. by asking its host to boot it.
pub trait WorkerKickstarter: Send + Sync {
    fn kickstart(&self, worker_id: &WorkerId) -> anyhow::Result<()>;
}

/// A kickstarter for fleets without remote control; it only logs the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingKickstarter;

impl WorkerKickstarter for LoggingKickstarter {
    fn kickstart(&self, worker_id: &WorkerId) -> anyhow::Result<()> {
        tracing::warn!(%worker_id, "worker must be restarted by hand");
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("no configuration for worker {0}")]
    MissingWorkerConfiguration(WorkerId),
    #[error(transparent)]
    WorkerState(#[from] WorkerStateError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KickstartError {
    #[error(transparent)]
    WorkerState(#[from] WorkerStateError),
    #[error("could not kickstart worker {worker_id}: {reason}")]
    Failed { worker_id: WorkerId, reason: String },
}

/// Collaborators a [QueueServer] is built with.
pub struct QueueServerDependencies {
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<dyn MetricRecorder>,
    pub history_storage: Arc<dyn TestHistoryStorage>,
    pub kickstarter: Arc<dyn WorkerKickstarter>,
}

impl Default for QueueServerDependencies {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            metrics: Arc::new(TracingMetricRecorder),
            history_storage: Arc::new(InMemoryTestHistoryStorage::default()),
            kickstarter: Arc::new(LoggingKickstarter),
        }
    }
}

pub struct QueueServer {
    worker_configurations: HashMap<WorkerId, WorkerConfiguration>,
    stuck_buckets_check_interval: Duration,
    aliveness: Arc<WorkerAlivenessProvider>,
    permissions: Arc<SharedWorkerPermissionProvider>,
    kickstarter: Arc<dyn WorkerKickstarter>,
    queue: WorkerPermissionAwareQueue<MultipleJobsBucketQueue>,
}

static_assertions::assert_impl_all!(QueueServer: Send, Sync);

impl QueueServer {
    pub fn new(config: &QueueConfig, deps: QueueServerDependencies) -> Self {
        let QueueServerDependencies {
            clock,
            metrics,
            history_storage,
            kickstarter,
        } = deps;

        let aliveness = Arc::new(WorkerAlivenessProvider::new(
            Arc::clone(&clock),
            config.worker_alive_report_timeout(),
        ));
        let ctx = BucketQueueContext {
            aliveness: Arc::clone(&aliveness),
            capabilities: Arc::new(WorkerCapabilitiesStorage::default()),
            history: TestHistoryTracker::new(history_storage),
            metrics,
            clock,
            check_again_after: config.check_again_after(),
        };

        let nothing_to_dequeue = config.nothing_to_dequeue_behavior();
        let permissions = Arc::new(SharedWorkerPermissionProvider::default());
        let queue = WorkerPermissionAwareQueue::new(
            MultipleJobsBucketQueue::new(ctx, Arc::clone(&nothing_to_dequeue)),
            permissions.clone(),
            nothing_to_dequeue,
        );

        Self {
            worker_configurations: config.worker_configurations(),
            stuck_buckets_check_interval: config.stuck_buckets_check_interval(),
            aliveness,
            permissions,
            kickstarter,
            queue,
        }
    }

    pub fn stuck_buckets_check_interval(&self) -> Duration {
        self.stuck_buckets_check_interval
    }

    #[instrument(level = "trace", skip(self))]
    pub fn register_worker(
        &self,
        worker_id: &WorkerId,
    ) -> Result<WorkerConfiguration, RegistrationError> {
        let configuration = self
            .worker_configurations
            .get(worker_id)
            .cloned()
            .ok_or_else(|| RegistrationError::MissingWorkerConfiguration(worker_id.clone()))?;

        self.aliveness.register(worker_id)?;
        Ok(configuration)
    }

    #[instrument(level = "trace", skip(self))]
    pub fn dequeue(
        &self,
        worker_id: &WorkerId,
        capabilities: &WorkerCapabilities,
    ) -> DequeueResult {
        self.queue.dequeue_bucket(capabilities, worker_id)
    }

    #[instrument(level = "trace", skip(self, testing_result))]
    pub fn report_result(
        &self,
        worker_id: &WorkerId,
        bucket_id: &BucketId,
        testing_result: TestingResult,
    ) -> Result<BucketQueueAcceptResult, QueueError> {
        self.queue.accept(bucket_id, testing_result, worker_id)
    }

    #[instrument(level = "trace", skip(self))]
    pub fn report_alive(
        &self,
        worker_id: &WorkerId,
        bucket_ids_being_processed: BTreeSet<BucketId>,
    ) -> Result<(), WorkerStateError> {
        self.aliveness
            .report_alive(worker_id, bucket_ids_being_processed)
    }

    #[instrument(level = "trace", skip(self, buckets))]
    pub fn schedule_tests(
        &self,
        prioritized_job: PrioritizedJob,
        buckets: Vec<Bucket>,
    ) -> Result<(), QueueError> {
        self.queue.enqueue(buckets, prioritized_job)
    }

    #[instrument(level = "trace", skip(self))]
    pub fn delete_job(&self, job_id: &JobId) -> Result<(), QueueError> {
        self.queue.delete(job_id)
    }

    pub fn job_state(&self, job_id: &JobId) -> Result<JobState, QueueError> {
        self.queue.state(job_id)
    }

    pub fn job_results(&self, job_id: &JobId) -> Result<JobResults, QueueError> {
        self.queue.results(job_id)
    }

    pub fn running_job_ids(&self) -> Vec<JobId> {
        self.queue.running_job_ids()
    }

    #[instrument(level = "trace", skip(self))]
    pub fn enable_worker(&self, worker_id: &WorkerId) -> Result<(), WorkerStateError> {
        self.aliveness.enable(worker_id)
    }

    /// Stops handing buckets to the worker. Buckets it already has are left to it.
    #[instrument(level = "trace", skip(self))]
    pub fn disable_worker(&self, worker_id: &WorkerId) -> Result<(), WorkerStateError> {
        self.aliveness.disable(worker_id)
    }

    #[instrument(level = "trace", skip(self))]
    pub fn kickstart_worker(&self, worker_id: &WorkerId) -> Result<(), KickstartError> {
        self.aliveness.check_can_kickstart(worker_id)?;
        self.kickstarter
            .kickstart(worker_id)
            .map_err(|error| KickstartError::Failed {
                worker_id: worker_id.clone(),
                reason: format!("{error:#}"),
            })
    }

    #[instrument(level = "trace", skip(self))]
    pub fn toggle_worker_sharing(&self, enabled: bool) {
        self.permissions.toggle_worker_sharing(enabled)
    }

    pub fn set_utilizable_workers(&self, worker_ids: Vec<WorkerId>) {
        self.permissions.set_utilizable_workers(worker_ids)
    }

    pub fn worker_states(&self) -> BTreeMap<WorkerId, WorkerAliveness> {
        self.aliveness.all_worker_states()
    }

    pub fn reenqueue_stuck_buckets(&self) -> Vec<StuckBucket> {
        self.queue.reenqueue_stuck_buckets()
    }

    /// Answers a single request. Failures become [Response::Error].
    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::RegisterWorker { worker_id } => {
                respond(self.register_worker(&worker_id), Response::WorkerConfiguration)
            }
            Request::Dequeue {
                worker_id,
                capabilities,
            } => Response::Dequeue(self.dequeue(&worker_id, &capabilities)),
            Request::ReportResult {
                worker_id,
                bucket_id,
                testing_result,
            } => respond(
                self.report_result(&worker_id, &bucket_id, testing_result),
                |_| Response::Ack,
            ),
            Request::ReportAlive {
                worker_id,
                bucket_ids_being_processed,
            } => respond(
                self.report_alive(&worker_id, bucket_ids_being_processed),
                |()| Response::Ack,
            ),
            Request::ScheduleTests {
                prioritized_job,
                buckets,
            } => respond(self.schedule_tests(prioritized_job, buckets), |()| {
                Response::Ack
            }),
            Request::DeleteJob { job_id } => respond(self.delete_job(&job_id), |()| Response::Ack),
            Request::JobState { job_id } => respond(self.job_state(&job_id), Response::JobState),
            Request::JobResults { job_id } => {
                respond(self.job_results(&job_id), Response::JobResults)
            }
            Request::RunningJobIds => Response::RunningJobIds(self.running_job_ids()),
            Request::EnableWorker { worker_id } => {
                respond(self.enable_worker(&worker_id), |()| Response::Ack)
            }
            Request::DisableWorker { worker_id } => {
                respond(self.disable_worker(&worker_id), |()| Response::Ack)
            }
            Request::KickstartWorker { worker_id } => {
                respond(self.kickstart_worker(&worker_id), |()| Response::Ack)
            }
            Request::ToggleWorkerSharing { enabled } => {
                self.toggle_worker_sharing(enabled);
                Response::Ack
            }
            Request::SetUtilizableWorkers { worker_ids } => {
                self.set_utilizable_workers(worker_ids);
                Response::Ack
            }
            Request::WorkerStates => Response::WorkerStates(self.worker_states()),
        }
    }
}

fn respond<T, E: Display>(result: Result<T, E>, ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(error) => {
            tracing::debug!(%error, "request failed");
            Response::Error {
                message: error.to_string(),
            }
        }
    }
}
