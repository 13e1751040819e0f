use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use derive_more::Display;
use serde_derive::{Deserialize, Serialize};

use super::buckets::BucketId;

/// ID of a worker in the fleet. Workers identify themselves with it on every request.
#[derive(Serialize, Deserialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Display)]
pub struct WorkerId(pub String);

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// A named capability a worker declares about itself, e.g. `os.version = 16.4`.
#[derive(Serialize, Deserialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct WorkerCapability {
    pub name: String,
    pub value: String,
}

impl WorkerCapability {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

pub type WorkerCapabilities = BTreeSet<WorkerCapability>;

/// A constraint over the value of a single capability.
#[derive(Serialize, Deserialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum WorkerCapabilityConstraint {
    /// The capability must be declared, with any value.
    Present,
    /// The capability must not be declared.
    Absent,
    Equal(String),
    LessThan(String),
    GreaterThan(String),
    All(Vec<WorkerCapabilityConstraint>),
    Any(Vec<WorkerCapabilityConstraint>),
    Not(Box<WorkerCapabilityConstraint>),
}

#[derive(Serialize, Deserialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct WorkerCapabilityRequirement {
    pub capability_name: String,
    pub constraint: WorkerCapabilityConstraint,
}

impl fmt::Display for WorkerCapabilityRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.capability_name, self.constraint)
    }
}

/// What a worker is told when it registers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfiguration {
    /// How many buckets the worker may execute at once.
    pub number_of_parallel_buckets: u32,
    /// How often the worker must report that it is alive.
    pub alive_report_interval: Duration,
    /// How long the worker should wait after being told to check again later.
    pub check_again_after: Duration,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    NotRegistered,
    Alive,
    /// Registered, but has not reported in within the alive-report timeout.
    Silent,
    /// Disabled by an operator.
    Blocked,
}

/// Point-in-time view of a worker's liveness.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WorkerAliveness {
    pub status: WorkerStatus,
    /// The buckets the worker last said it was processing, plus those handed out since.
    pub bucket_ids_being_processed: BTreeSet<BucketId>,
}

impl WorkerAliveness {
    pub fn not_registered() -> Self {
        Self {
            status: WorkerStatus::NotRegistered,
            bucket_ids_being_processed: Default::default(),
        }
    }

    /// Whether the worker can be expected to pick up work right now.
    pub fn is_in_working_condition(&self) -> bool {
        self.status == WorkerStatus::Alive
    }
}
