use crate::app::context::Instance;
use crate::app::result::{fold, SequenceResult, Status, TestResult};
use crate::app::sequence::SequenceDefinition;
use crate::app::suspension::{CallbackParams, Suspension};
use crate::app::unit::{TestContext, TestDefinition};
use crate::app::validator::ResourceValidator;
use crate::connection::HttpClient;
use derivative::*;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Where a run stopped: either finished, or paused for a callback.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Completed(SequenceResult),
    Suspended(Suspension),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Suspension belongs to sequence '{found}', not '{expected}'")]
    SequenceMismatch { expected: String, found: String },
    #[error("Suspension cursor {cursor} is past the end of a {len}-test sequence")]
    CursorOutOfRange { cursor: usize, len: usize },
}

/// Drives sequences through their tests, one at a time, in order.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Engine {
    #[derivative(Debug = "ignore")]
    client: Arc<dyn HttpClient>,
    #[derivative(Debug = "ignore")]
    validator: Arc<dyn ResourceValidator>,
}

impl RunState {
    pub fn is_suspended(&self) -> bool {
        matches!(self, RunState::Suspended(_))
    }
}

impl Engine {
    pub fn new(client: Arc<dyn HttpClient>, validator: Arc<dyn ResourceValidator>) -> Self {
        Self { client, validator }
    }

    /// Starts a fresh run of `sequence`.
    pub fn run(&self, sequence: &SequenceDefinition, instance: &mut Instance, run_id: Uuid) -> RunState {
        info!("Starting sequence '{}' (run {})", sequence.name, run_id);
        let result = SequenceResult::new(run_id, sequence.name.clone());
        if let Some(reason) = sequence.unmet_precondition(instance) {
            warn!("Skipping sequence '{}': {}", sequence.name, reason);
            return RunState::Completed(fold(result, precondition_skip(sequence, reason)).finish());
        }
        self.drive(sequence, result, 0, None, instance)
    }

    /// Continues a suspended run with the parameters its callback delivered.
    /// Tests before the cursor are not executed again.
    pub fn resume(
        &self,
        sequence: &SequenceDefinition,
        suspension: Suspension,
        params: CallbackParams,
        instance: &mut Instance,
    ) -> Result<RunState, EngineError> {
        if suspension.sequence_name != sequence.name {
            return Err(EngineError::SequenceMismatch {
                expected: sequence.name.clone(),
                found: suspension.sequence_name,
            });
        }
        if suspension.next_index > sequence.len() {
            return Err(EngineError::CursorOutOfRange {
                cursor: suspension.next_index,
                len: sequence.len(),
            });
        }
        debug!(
            "Resuming '{}' at test #{} with {} parameter(s)",
            sequence.name,
            suspension.next_index,
            params.len()
        );
        let result = suspension
            .result
            .resolve_wait(format!("Received callback at /{}", suspension.endpoint));
        Ok(self.drive(sequence, result, suspension.next_index, Some(&params), instance))
    }

    fn drive(
        &self,
        sequence: &SequenceDefinition,
        mut result: SequenceResult,
        start: usize,
        params: Option<&CallbackParams>,
        instance: &mut Instance,
    ) -> RunState {
        let run_id = result.run_id;
        for unit in &sequence.tests()[start..] {
            let now = Instant::now();
            let mut ctx = TestContext::new(
                instance,
                self.client.as_ref(),
                self.validator.as_ref(),
                params,
                run_id,
            );
            let mut test = unit.execute(&mut ctx);
            info!(
                "[{}] {} {}: {} ({} ms)",
                sequence.name,
                test.test_id,
                test.status,
                test.message,
                now.elapsed().as_millis()
            );

            if test.is_waiting() {
                if !sequence.suspendable {
                    error!(
                        "Test {} requested a callback but '{}' cannot be suspended",
                        test.test_id, sequence.name
                    );
                    test.status = Status::Error;
                    test.message = format!(
                        "Sequence '{}' cannot wait for a callback at /{}",
                        sequence.name,
                        test.wait_at_endpoint.take().unwrap_or_default()
                    );
                    test.redirect_to_url = None;
                    result = fold(result, test);
                    continue;
                }
                let next_index = unit.definition.index + 1;
                let endpoint = test.wait_at_endpoint.clone().unwrap_or_default();
                let redirect_to = test.redirect_to_url.clone();
                result = result.suspend(test, next_index);
                info!(
                    "Sequence '{}' suspended, waiting at /{}",
                    sequence.name, endpoint
                );
                return RunState::Suspended(Suspension::new(result, next_index, endpoint, redirect_to));
            }
            result = fold(result, test);
        }
        let result = result.finish();
        info!(
            "Finished sequence '{}' with status {}: {} passed, {} failed, {} errored, {} skipped",
            sequence.name, result.status, result.passed, result.failed, result.errored, result.skipped
        );
        RunState::Completed(result)
    }
}

fn precondition_skip(sequence: &SequenceDefinition, reason: String) -> TestResult {
    let definition = TestDefinition {
        id: "PRE".to_owned(),
        name: format!("{} preconditions", sequence.title),
        reference: None,
        description: None,
        index: 0,
        optional: false,
    };
    let test_id = format!("{}-{}", sequence.id_prefix, definition.id);
    TestResult::with_status(&definition, test_id, Status::Skip, reason)
}
