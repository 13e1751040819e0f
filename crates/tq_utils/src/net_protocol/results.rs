use std::collections::HashSet;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::time::EpochMillis;

use super::buckets::{BucketId, TestEntry};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TestException {
    pub reason: String,
    pub file_path: Option<String>,
    pub line: Option<u32>,
}

impl TestException {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            file_path: None,
            line: None,
        }
    }
}

/// The outcome of a single run of a test.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TestRunResult {
    pub succeeded: bool,
    pub exceptions: Vec<TestException>,
    pub duration: Duration,
    pub start_time: EpochMillis,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TestEntryResult {
    pub test_entry: TestEntry,
    pub test_run_results: Vec<TestRunResult>,
}

impl TestEntryResult {
    pub fn with_run_results(test_entry: TestEntry, test_run_results: Vec<TestRunResult>) -> Self {
        Self {
            test_entry,
            test_run_results,
        }
    }

    /// Result for a test the worker was asked to run but never reported on.
    /// Having no runs, it counts as a failure.
    pub fn lost(test_entry: TestEntry) -> Self {
        Self {
            test_entry,
            test_run_results: vec![],
        }
    }

    pub fn is_lost(&self) -> bool {
        self.test_run_results.is_empty()
    }

    /// A test succeeded if any of its runs did.
    pub fn succeeded(&self) -> bool {
        self.test_run_results.iter().any(|run| run.succeeded)
    }
}

/// Everything a worker reports back for one bucket.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TestingResult {
    pub bucket_id: BucketId,
    pub unfiltered_results: Vec<TestEntryResult>,
}

impl TestingResult {
    pub fn new(bucket_id: BucketId, unfiltered_results: Vec<TestEntryResult>) -> Self {
        Self {
            bucket_id,
            unfiltered_results,
        }
    }

    /// The entries of `expected` that have no result here.
    pub fn lost_test_entries<'a>(
        &self,
        expected: impl IntoIterator<Item = &'a TestEntry>,
    ) -> Vec<TestEntry> {
        let reported: HashSet<&TestEntry> = self
            .unfiltered_results
            .iter()
            .map(|result| &result.test_entry)
            .collect();

        expected
            .into_iter()
            .filter(|entry| !reported.contains(entry))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::net_protocol::buckets::{BucketId, TestEntry, TestName};
    use crate::time::EpochMillis;

    use super::{TestEntryResult, TestRunResult, TestingResult};

    fn entry(name: &str) -> TestEntry {
        TestEntry::new(TestName::new("Class", name))
    }

    fn run(succeeded: bool) -> TestRunResult {
        TestRunResult {
            succeeded,
            exceptions: vec![],
            duration: Duration::from_millis(5),
            start_time: EpochMillis::from_millis(0),
        }
    }

    #[test]
    fn any_successful_run_makes_the_entry_succeed() {
        let flaky = TestEntryResult::with_run_results(entry("a"), vec![run(false), run(true)]);
        let failing = TestEntryResult::with_run_results(entry("b"), vec![run(false)]);

        assert!(flaky.succeeded());
        assert!(!failing.succeeded());
    }

    #[test]
    fn lost_entries_are_failures() {
        let lost = TestEntryResult::lost(entry("a"));

        assert!(lost.is_lost());
        assert!(!lost.succeeded());
    }

    #[test]
    fn lost_test_entries_are_the_unreported_ones() {
        let result = TestingResult::new(
            BucketId::from("b"),
            vec![TestEntryResult::with_run_results(entry("a"), vec![run(true)])],
        );

        let expected = [entry("a"), entry("b"), entry("c")];

        assert_eq!(
            result.lost_test_entries(expected.iter()),
            vec![entry("b"), entry("c")]
        );
    }
}
