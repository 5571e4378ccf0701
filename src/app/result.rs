use crate::app::unit::TestDefinition;
use crate::connection::Exchange;
use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Fail,
    Error,
    Skip,
    Omit,
    Todo,
    /// Suspended until a callback arrives.
    Wait,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResultError {
    #[error("'{0}' is not a test result status")]
    UnknownStatus(String),
    #[error("A waiting result must name the endpoint it waits at")]
    WaitWithoutEndpoint,
}

/// Outcome of one executed test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub name: String,
    pub index: usize,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_at_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to_url: Option<String>,
}

/// Aggregate outcome of one run of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceResult {
    pub run_id: Uuid,
    pub sequence_name: String,
    pub status: Status,
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub omitted: usize,
    pub todo: usize,
    pub required_passed: usize,
    pub required_total: usize,
    pub optional_passed: usize,
    pub optional_total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_at_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to_url: Option<String>,
    pub next_test_index: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "pass",
            Status::Fail => "fail",
            Status::Error => "error",
            Status::Skip => "skip",
            Status::Omit => "omit",
            Status::Todo => "todo",
            Status::Wait => "wait",
        }
    }
}

impl FromStr for Status {
    type Err = ResultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(Status::Pass),
            "fail" => Ok(Status::Fail),
            "error" => Ok(Status::Error),
            "skip" => Ok(Status::Skip),
            "omit" => Ok(Status::Omit),
            "todo" => Ok(Status::Todo),
            "wait" => Ok(Status::Wait),
            _ => Err(ResultError::UnknownStatus(s.to_owned())),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TestResult {
    /// Builds a terminal result. Waiting results go through [`TestResult::waiting`].
    pub fn new(
        definition: &TestDefinition,
        test_id: impl Into<String>,
        status: Status,
        message: impl Into<String>,
    ) -> Result<Self, ResultError> {
        if status == Status::Wait {
            return Err(ResultError::WaitWithoutEndpoint);
        }
        Ok(Self::with_status(definition, test_id.into(), status, message.into()))
    }

    pub fn waiting(
        definition: &TestDefinition,
        test_id: impl Into<String>,
        endpoint: impl Into<String>,
        redirect_to_url: Option<String>,
    ) -> Self {
        let endpoint = endpoint.into();
        let mut result = Self::with_status(
            definition,
            test_id.into(),
            Status::Wait,
            format!("Waiting for callback at /{}", endpoint),
        );
        result.wait_at_endpoint = Some(endpoint);
        result.redirect_to_url = redirect_to_url;
        result
    }

    pub(crate) fn with_status(
        definition: &TestDefinition,
        test_id: String,
        status: Status,
        message: String,
    ) -> Self {
        Self {
            test_id,
            name: definition.name.clone(),
            index: definition.index,
            required: !definition.optional,
            reference: definition.reference.clone(),
            description: definition.description.clone(),
            status,
            message,
            details: None,
            warnings: Vec::new(),
            exchanges: Vec::new(),
            wait_at_endpoint: None,
            redirect_to_url: None,
        }
    }

    pub fn with_details(mut self, details: Option<String>) -> Self {
        self.details = details;
        self
    }

    pub fn is_waiting(&self) -> bool {
        self.status == Status::Wait
    }
}

impl SequenceResult {
    pub fn new(run_id: Uuid, sequence_name: impl Into<String>) -> Self {
        Self {
            run_id,
            sequence_name: sequence_name.into(),
            status: Status::Pass,
            results: Vec::new(),
            passed: 0,
            failed: 0,
            errored: 0,
            skipped: 0,
            omitted: 0,
            todo: 0,
            required_passed: 0,
            required_total: 0,
            optional_passed: 0,
            optional_total: 0,
            wait_at_endpoint: None,
            redirect_to_url: None,
            next_test_index: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Records a waiting result and marks the run suspended. The waiting
    /// result is kept out of the counts until it is resolved.
    pub fn suspend(mut self, result: TestResult, next_test_index: usize) -> Self {
        self.wait_at_endpoint = result.wait_at_endpoint.clone();
        self.redirect_to_url = result.redirect_to_url.clone();
        self.next_test_index = next_test_index;
        self.results.push(result);
        self.status = Status::Wait;
        self
    }

    /// Turns the trailing waiting result into a pass and folds it in.
    pub fn resolve_wait(mut self, message: impl Into<String>) -> Self {
        self.wait_at_endpoint = None;
        self.redirect_to_url = None;
        match self.results.pop() {
            Some(mut waiting) if waiting.is_waiting() => {
                waiting.status = Status::Pass;
                waiting.message = message.into();
                fold(self, waiting)
            }
            Some(other) => {
                self.results.push(other);
                self.status = aggregate(&self.results);
                self
            }
            None => self,
        }
    }

    pub fn finish(mut self) -> Self {
        self.status = aggregate(&self.results);
        self.wait_at_endpoint = None;
        self.redirect_to_url = None;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn is_waiting(&self) -> bool {
        self.status == Status::Wait
    }
}

fn aggregate(results: &[TestResult]) -> Status {
    let statuses = results.iter().map(|result| result.status);
    if statuses.clone().any(|status| status == Status::Error) {
        Status::Error
    } else if statuses.clone().any(|status| status == Status::Fail) {
        Status::Fail
    } else {
        Status::Pass
    }
}

/// Appends `test` to `sequence`, updating counts and the overall status.
pub fn fold(mut sequence: SequenceResult, test: TestResult) -> SequenceResult {
    if test.is_waiting() {
        let next = test.index + 1;
        return sequence.suspend(test, next);
    }
    match test.status {
        Status::Pass => sequence.passed += 1,
        Status::Fail => sequence.failed += 1,
        Status::Error => sequence.errored += 1,
        Status::Skip => sequence.skipped += 1,
        Status::Omit => sequence.omitted += 1,
        Status::Todo => sequence.todo += 1,
        Status::Wait => {}
    }
    if test.required {
        sequence.required_total += 1;
        if test.status == Status::Pass {
            sequence.required_passed += 1;
        }
    } else {
        sequence.optional_total += 1;
        if test.status == Status::Pass {
            sequence.optional_passed += 1;
        }
    }
    sequence.next_test_index = test.index + 1;
    sequence.results.push(test);
    sequence.status = aggregate(&sequence.results);
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(index: usize, optional: bool) -> TestDefinition {
        TestDefinition::builder()
            .id(format!("{:02}", index + 1))
            .name(format!("test {}", index))
            .index(index)
            .optional(optional)
            .build()
            .unwrap()
    }

    fn result(index: usize, status: Status) -> TestResult {
        let definition = definition(index, false);
        TestResult::with_status(&definition, definition.id.clone(), status, String::new())
    }

    #[test]
    fn test_status_parsing_rejects_unknown_values() {
        assert_eq!("skip".parse::<Status>(), Ok(Status::Skip));
        assert_eq!(
            "passed".parse::<Status>(),
            Err(ResultError::UnknownStatus("passed".to_owned()))
        );
    }

    #[test]
    fn test_new_rejects_wait_without_endpoint() {
        let definition = definition(0, false);
        assert_eq!(
            TestResult::new(&definition, "X-01", Status::Wait, "").unwrap_err(),
            ResultError::WaitWithoutEndpoint
        );
        assert!(TestResult::new(&definition, "X-01", Status::Omit, "").is_ok());
    }

    #[test]
    fn test_fold_aggregates_error_over_fail_over_pass() {
        let sequence = SequenceResult::new(Uuid::new_v4(), "S");
        let sequence = fold(sequence, result(0, Status::Pass));
        assert_eq!(sequence.status, Status::Pass);
        let sequence = fold(sequence, result(1, Status::Skip));
        assert_eq!(sequence.status, Status::Pass);
        let sequence = fold(sequence, result(2, Status::Fail));
        assert_eq!(sequence.status, Status::Fail);
        let sequence = fold(sequence, result(3, Status::Error));
        assert_eq!(sequence.status, Status::Error);
        let sequence = fold(sequence, result(4, Status::Pass));
        assert_eq!(sequence.status, Status::Error);

        assert_eq!(sequence.passed, 2);
        assert_eq!(sequence.failed, 1);
        assert_eq!(sequence.errored, 1);
        assert_eq!(sequence.skipped, 1);
        assert_eq!(sequence.required_total, 5);
        assert_eq!(sequence.required_passed, 2);
        assert_eq!(sequence.next_test_index, 5);
    }

    #[test]
    fn test_optional_results_are_counted_separately() {
        let optional = definition(0, true);
        let test = TestResult::with_status(&optional, "X-01".to_owned(), Status::Pass, String::new());
        let sequence = fold(SequenceResult::new(Uuid::new_v4(), "S"), test);
        assert_eq!(sequence.optional_total, 1);
        assert_eq!(sequence.optional_passed, 1);
        assert_eq!(sequence.required_total, 0);
    }

    #[test]
    fn test_wait_is_not_aggregated_until_resolved() {
        let definition = definition(1, false);
        let sequence = fold(SequenceResult::new(Uuid::new_v4(), "S"), result(0, Status::Fail));
        let waiting = TestResult::waiting(&definition, "X-02", "redirect", None);
        let sequence = sequence.suspend(waiting, 2);

        assert_eq!(sequence.status, Status::Wait);
        assert_eq!(sequence.wait_at_endpoint.as_deref(), Some("redirect"));
        assert_eq!(sequence.failed, 1);
        assert_eq!(sequence.passed, 0);
        assert_eq!(sequence.results.len(), 2);

        let sequence = sequence.resolve_wait("callback received");
        assert_eq!(sequence.status, Status::Fail);
        assert_eq!(sequence.passed, 1);
        assert_eq!(sequence.results[1].status, Status::Pass);
        assert_eq!(sequence.wait_at_endpoint, None);
    }

    #[test]
    fn test_finish_stamps_completion() {
        let sequence = fold(SequenceResult::new(Uuid::new_v4(), "S"), result(0, Status::Todo));
        let sequence = sequence.finish();
        assert_eq!(sequence.status, Status::Pass);
        assert!(sequence.completed_at.is_some());
    }
}
