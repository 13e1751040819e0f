//! Queue configuration, read from a TOML file.
//!
//! ```toml
//! check_again_after_secs = 5
//! worker_alive_report_timeout_secs = 60
//! stuck_buckets_check_interval_secs = 30
//! nothing_to_dequeue = "wait-for-all-queues-to-deplete"
//!
//! [[workers]]
//! id = "mac-mini-1"
//! number_of_parallel_buckets = 2
//! alive_report_interval_secs = 10
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use etcetera::{app_strategy, AppStrategy, AppStrategyArgs};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use tq_utils::net_protocol::workers::{WorkerConfiguration, WorkerId};

use crate::nothing_to_dequeue::{CheckLater, NothingToDequeueBehavior, WaitForAllQueuesToDeplete};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("worker {0} is configured more than once")]
    DuplicateWorker(WorkerId),
    #[error("worker {0} must be able to process at least one bucket")]
    NoParallelBuckets(WorkerId),
    #[error("worker {0} reports alive less often than the alive report timeout allows")]
    AliveReportIntervalTooLong(WorkerId),
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NothingToDequeuePolicy {
    #[default]
    WaitForAllQueuesToDeplete,
    CheckLater,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfigEntry {
    pub id: WorkerId,
    pub number_of_parallel_buckets: u32,
    pub alive_report_interval_secs: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub check_again_after_secs: u64,
    pub worker_alive_report_timeout_secs: u64,
    pub stuck_buckets_check_interval_secs: u64,
    pub nothing_to_dequeue: NothingToDequeuePolicy,
    pub workers: Vec<WorkerConfigEntry>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            check_again_after_secs: 5,
            worker_alive_report_timeout_secs: 60,
            stuck_buckets_check_interval_secs: 30,
            nothing_to_dequeue: NothingToDequeuePolicy::default(),
            workers: vec![],
        }
    }
}

impl QueueConfig {
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let toml_str = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_str)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_again_after_secs == 0 {
            return Err(ConfigError::Zero("check_again_after_secs"));
        }
        if self.worker_alive_report_timeout_secs == 0 {
            return Err(ConfigError::Zero("worker_alive_report_timeout_secs"));
        }
        if self.stuck_buckets_check_interval_secs == 0 {
            return Err(ConfigError::Zero("stuck_buckets_check_interval_secs"));
        }

        let mut seen = HashSet::new();
        for worker in &self.workers {
            if !seen.insert(&worker.id) {
                return Err(ConfigError::DuplicateWorker(worker.id.clone()));
            }
            if worker.number_of_parallel_buckets == 0 {
                return Err(ConfigError::NoParallelBuckets(worker.id.clone()));
            }
            if worker.alive_report_interval_secs == 0
                || worker.alive_report_interval_secs >= self.worker_alive_report_timeout_secs
            {
                return Err(ConfigError::AliveReportIntervalTooLong(worker.id.clone()));
            }
        }
        Ok(())
    }

    pub fn check_again_after(&self) -> Duration {
        Duration::from_secs(self.check_again_after_secs)
    }

    pub fn worker_alive_report_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_alive_report_timeout_secs)
    }

    pub fn stuck_buckets_check_interval(&self) -> Duration {
        Duration::from_secs(self.stuck_buckets_check_interval_secs)
    }

    /// What each configured worker is told when it registers.
    pub fn worker_configurations(&self) -> HashMap<WorkerId, WorkerConfiguration> {
        self.workers
            .iter()
            .map(|worker| {
                let configuration = WorkerConfiguration {
                    number_of_parallel_buckets: worker.number_of_parallel_buckets,
                    alive_report_interval: Duration::from_secs(worker.alive_report_interval_secs),
                    check_again_after: self.check_again_after(),
                };
                (worker.id.clone(), configuration)
            })
            .collect()
    }

    pub fn nothing_to_dequeue_behavior(&self) -> Arc<dyn NothingToDequeueBehavior> {
        let check_after = self.check_again_after();
        match self.nothing_to_dequeue {
            NothingToDequeuePolicy::WaitForAllQueuesToDeplete => {
                Arc::new(WaitForAllQueuesToDeplete { check_after })
            }
            NothingToDequeuePolicy::CheckLater => Arc::new(CheckLater { check_after }),
        }
    }
}

/// `$XDG_CONFIG_HOME/tq/queue.toml`, or its `~/.config` fallback.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let strategy = app_strategy::Xdg::new(AppStrategyArgs {
        top_level_domain: "dev".to_string(),
        author: "tq".to_string(),
        app_name: "tq".to_string(),
    })?;
    Ok(strategy.config_dir().join("queue.toml"))
}
