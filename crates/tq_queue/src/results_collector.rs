use parking_lot::Mutex;
use tq_utils::net_protocol::results::TestingResult;

/// Append-only record of a job's final results.
#[derive(Default, Debug)]
pub struct ResultsCollector {
    results: Mutex<Vec<TestingResult>>,
}

impl ResultsCollector {
    pub fn append(&self, testing_result: TestingResult) {
        self.results.lock().push(testing_result);
    }

    pub fn collected_results(&self) -> Vec<TestingResult> {
        self.results.lock().clone()
    }
}
