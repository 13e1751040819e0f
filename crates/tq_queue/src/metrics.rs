//! Fire-and-forget metrics about queue activity.

use std::time::Duration;

use tq_utils::net_protocol::jobs::JobId;
use tq_utils::net_protocol::workers::WorkerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMetric {
    BucketsEnqueued { job_id: JobId, count: usize },
    BucketDequeued { job_id: JobId, worker_id: WorkerId },
    BucketResultAccepted { job_id: JobId, worker_id: WorkerId },
    TestsReenqueued { job_id: JobId, count: usize },
    StuckBucketsReenqueued { job_id: JobId, count: usize },
    JobCreated { job_id: JobId },
    JobDeleted { job_id: JobId },
    JobProcessingDuration { job_id: JobId, duration: Duration },
}

/// Sink for [QueueMetric]s. Recording must not block or fail the caller.
pub trait MetricRecorder: Send + Sync {
    fn record(&self, metric: QueueMetric);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricRecorder;

impl MetricRecorder for NoopMetricRecorder {
    fn record(&self, _metric: QueueMetric) {}
}

/// Emits every metric as a `tracing` event under the `tq_queue::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricRecorder;

impl MetricRecorder for TracingMetricRecorder {
    fn record(&self, metric: QueueMetric) {
        tracing::info!(target: "tq_queue::metrics", ?metric, "metric");
    }
}
