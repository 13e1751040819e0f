use std::sync::Arc;
use std::time::Duration;

use tq_test_utils::worker;
use tq_utils::net_protocol::jobs::JobId;
use tq_utils::time::ManualClock;

use crate::aliveness::WorkerAlivenessProvider;
use crate::capabilities::WorkerCapabilitiesStorage;
use crate::history::storage::InMemoryTestHistoryStorage;
use crate::history::TestHistoryTracker;
use crate::holder::BucketQueueHolder;
use crate::metrics::test_utils::CapturingMetricRecorder;

use super::{BucketQueue, BucketQueueContext};

pub const ALIVE_REPORT_TIMEOUT: Duration = Duration::from_secs(30);
pub const CHECK_AGAIN_AFTER: Duration = Duration::from_secs(5);

/// Shared collaborators of queues under test, with a clock that only moves when told to.
pub struct TestEnv {
    pub clock: ManualClock,
    pub metrics: Arc<CapturingMetricRecorder>,
    pub ctx: BucketQueueContext,
}

impl TestEnv {
    pub fn new() -> Self {
        let clock = ManualClock::new();
        let metrics = Arc::new(CapturingMetricRecorder::default());
        let ctx = BucketQueueContext {
            aliveness: Arc::new(WorkerAlivenessProvider::new(
                Arc::new(clock.clone()),
                ALIVE_REPORT_TIMEOUT,
            )),
            capabilities: Arc::new(WorkerCapabilitiesStorage::default()),
            history: TestHistoryTracker::new(Arc::new(InMemoryTestHistoryStorage::default())),
            metrics: metrics.clone(),
            clock: Arc::new(clock.clone()),
            check_again_after: CHECK_AGAIN_AFTER,
        };
        Self {
            clock,
            metrics,
            ctx,
        }
    }

    pub fn register(&self, worker_id: &str) {
        self.ctx.aliveness.register(&worker(worker_id)).unwrap();
    }

    /// Makes every registered worker miss its alive report.
    pub fn silence_workers(&self) {
        self.clock.advance(ALIVE_REPORT_TIMEOUT * 2);
    }

    pub fn queue(&self, job_id: &str) -> BucketQueue {
        BucketQueue::new(
            JobId::from(job_id),
            Arc::new(BucketQueueHolder::default()),
            self.ctx.clone(),
        )
    }
}
