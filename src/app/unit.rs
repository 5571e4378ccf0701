use crate::app::context::Instance;
use crate::app::result::{Status, TestResult};
use crate::app::signal::{Outcome, Signal};
use crate::app::suspension::CallbackParams;
use crate::app::validator::ResourceValidator;
use crate::connection::{Exchange, HttpClient, Request};
use derivative::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

/// Static metadata of one test.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into))]
pub struct TestDefinition {
    /// Identifier local to the sequence, e.g. `01`.
    pub id: String,
    pub name: String,
    #[builder(default, setter(into, strip_option))]
    pub reference: Option<String>,
    #[builder(default, setter(into, strip_option))]
    pub description: Option<String>,
    #[builder(default)]
    pub index: usize,
    #[builder(default)]
    pub optional: bool,
}

impl TestDefinition {
    pub fn builder() -> TestDefinitionBuilder {
        TestDefinitionBuilder::default()
    }
}

pub type TestBody = Arc<dyn Fn(&mut TestContext<'_>) -> Outcome + Send + Sync>;

/// A test definition paired with its body.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct TestUnit {
    pub definition: TestDefinition,
    /// Namespaced id, `<prefix>-<id>`.
    pub test_id: String,
    #[derivative(Debug = "ignore")]
    body: TestBody,
}

/// Everything a test body can reach while it runs.
pub struct TestContext<'a> {
    pub instance: &'a mut Instance,
    client: &'a dyn HttpClient,
    validator: &'a dyn ResourceValidator,
    params: Option<&'a CallbackParams>,
    run_id: Uuid,
    warnings: Vec<String>,
    exchanges: Vec<Exchange>,
}

impl TestUnit {
    pub fn new(definition: TestDefinition, test_id: String, body: TestBody) -> Self {
        Self {
            definition,
            test_id,
            body,
        }
    }

    /// Runs the body and classifies whatever it produced. Never panics and
    /// never returns an unclassified failure.
    pub fn execute(&self, ctx: &mut TestContext<'_>) -> TestResult {
        let body = &self.body;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (**body)(ctx))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(Signal::fatal(panic_message(payload))),
        };
        let mut result = self.classify(outcome);
        result.warnings = std::mem::take(&mut ctx.warnings);
        result.exchanges = std::mem::take(&mut ctx.exchanges);
        result
    }

    fn classify(&self, outcome: Outcome) -> TestResult {
        let test_id = self.test_id.clone();
        match outcome {
            Ok(()) => TestResult::with_status(&self.definition, test_id, Status::Pass, String::new()),
            Err(Signal::Wait {
                endpoint,
                redirect_to,
            }) => TestResult::waiting(&self.definition, test_id, endpoint, redirect_to),
            Err(signal) => {
                let details = signal.details().map(str::to_owned);
                TestResult::with_status(&self.definition, test_id, signal.status(), signal.to_string())
                    .with_details(details)
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test panicked".to_owned()
    }
}

impl<'a> TestContext<'a> {
    pub fn new(
        instance: &'a mut Instance,
        client: &'a dyn HttpClient,
        validator: &'a dyn ResourceValidator,
        params: Option<&'a CallbackParams>,
        run_id: Uuid,
    ) -> Self {
        Self {
            instance,
            client,
            validator,
            params,
            run_id,
            warnings: Vec::new(),
            exchanges: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn validator(&self) -> &dyn ResourceValidator {
        self.validator
    }

    /// Parameters delivered by the callback that resumed this run.
    pub fn params(&self) -> Option<&CallbackParams> {
        self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .and_then(|params| params.get(name))
            .map(String::as_str)
    }

    /// Sends `request` and records the exchange on the running test.
    pub fn send(&mut self, request: Request) -> Result<Exchange, Signal> {
        let exchange = self.client.send(request)?;
        self.exchanges.push(exchange.clone());
        Ok(exchange)
    }

    /// GETs a URL rendered from `template` against the instance, with the
    /// bearer token when one has been issued.
    pub fn fhir_get(&mut self, template: &str) -> Result<Exchange, Signal> {
        let url = self.instance.render(template)?;
        let mut request = Request::get(url);
        if let Some(token) = self.instance.get_str("access_token") {
            request = request.bearer(token);
        }
        self.send(request)
    }

    /// Runs `check`; an assertion failure is recorded as a warning instead
    /// of failing the test. Other signals propagate.
    pub fn warning<F>(&mut self, check: F) -> Outcome
    where
        F: FnOnce(&mut Self) -> Outcome,
    {
        match check(self) {
            Err(Signal::AssertionFailure { message, .. }) => {
                debug!("Warning recorded: {}", message);
                self.warnings.push(message);
                Ok(())
            }
            other => other,
        }
    }
}
